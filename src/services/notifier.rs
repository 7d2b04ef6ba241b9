//! Local notifications for region enter/exit
//!
//! When enabled, every emitted enter/exit event asks a formatter for a
//! message. A `None` message skips the notification; the structured event is
//! delivered regardless. Sinks receive the message plus user info carrying
//! the region record and the event name.

use crate::domain::event::RegionEvent;
use crate::domain::record::BeaconRecord;
use crate::domain::region::RegionWatch;
use crate::infra::metrics::Metrics;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

/// Builds the notification text for an enter/exit event
pub trait NotificationFormatter: Send + Sync {
    fn format(&self, region: &RegionWatch, event: RegionEvent) -> Option<String>;
}

/// Receives posted notifications; must not block
pub trait NotificationSink: Send + Sync {
    fn post(&self, notification: LocalNotification);
}

/// A notification ready for delivery
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalNotification {
    pub message: String,
    pub region: BeaconRecord,
    pub event: &'static str,
}

/// Formatter driven by `{identifier}` templates
///
/// An empty template disables the message for that event.
#[derive(Debug, Clone)]
pub struct TemplateFormatter {
    enter: String,
    exit: String,
}

pub const DEFAULT_ENTER_TEMPLATE: &str = "Entered {identifier}";
pub const DEFAULT_EXIT_TEMPLATE: &str = "Exited {identifier}";

impl TemplateFormatter {
    pub fn new(enter: impl Into<String>, exit: impl Into<String>) -> Self {
        Self { enter: enter.into(), exit: exit.into() }
    }
}

impl Default for TemplateFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_ENTER_TEMPLATE, DEFAULT_EXIT_TEMPLATE)
    }
}

impl NotificationFormatter for TemplateFormatter {
    fn format(&self, region: &RegionWatch, event: RegionEvent) -> Option<String> {
        let template = match event {
            RegionEvent::Enter => &self.enter,
            RegionEvent::Exit => &self.exit,
        };
        if template.is_empty() {
            return None;
        }
        Some(template.replace("{identifier}", &region.identifier))
    }
}

/// Sink that only logs, used when no outbound channel is configured
#[derive(Debug, Default)]
pub struct LogNotificationSink;

impl NotificationSink for LogNotificationSink {
    fn post(&self, notification: LocalNotification) {
        info!(
            identifier = %notification.region.identifier,
            event = %notification.event,
            message = %notification.message,
            "local_notification"
        );
    }
}

/// Posts local notifications for enter/exit events
#[derive(Clone)]
pub struct Notifier {
    enabled: bool,
    formatter: Arc<dyn NotificationFormatter>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<Metrics>,
}

impl Notifier {
    pub fn new(
        enabled: bool,
        formatter: Arc<dyn NotificationFormatter>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { enabled, formatter, sink, metrics }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Post a notification for `event` on `region`, if enabled and formatted
    ///
    /// Returns true if a notification was handed to the sink.
    pub fn notify(&self, region: &RegionWatch, event: RegionEvent) -> bool {
        if !self.enabled {
            return false;
        }

        let Some(message) = self.formatter.format(region, event) else {
            debug!(identifier = %region.identifier, event = %event.as_str(), "notification_skipped");
            self.metrics.record_notification_skipped();
            return false;
        };

        self.sink.post(LocalNotification {
            message,
            region: BeaconRecord::from_region(region),
            event: event.as_str(),
        });
        self.metrics.record_notification_posted();
        true
    }
}
