//! Typed fan-out channel for stable beacon events
//!
//! Every subscriber gets its own bounded mpsc channel. Delivery never blocks
//! the router: if a subscriber's channel is full the event is dropped for that
//! subscriber only, counted, and warned about at most once per second.

use crate::domain::event::{epoch_ms, BeaconEvent};
use crate::domain::record::BeaconRecord;
use crate::infra::metrics::Metrics;
use crate::services::notifier::{LocalNotification, NotificationSink};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Minimum spacing between drop warnings per subscriber
const DROP_WARN_INTERVAL_MS: u64 = 1000;

struct Subscriber {
    name: String,
    tx: mpsc::Sender<BeaconEvent>,
    dropped: AtomicU64,
    last_warn_ms: AtomicU64,
}

impl Subscriber {
    fn offer(&self, event: BeaconEvent, metrics: &Metrics) {
        metrics.record_event_offered();
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                metrics.record_event_dropped();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                let now = epoch_ms();
                let last = self.last_warn_ms.load(Ordering::Relaxed);
                if now.saturating_sub(last) >= DROP_WARN_INTERVAL_MS
                    && self
                        .last_warn_ms
                        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    warn!(
                        subscriber = %self.name,
                        identifier = %event.identifier(),
                        kind = %event.kind(),
                        dropped_total = %dropped,
                        "event_dropped"
                    );
                }
            }
            Err(TrySendError::Closed(event)) => {
                debug!(subscriber = %self.name, kind = %event.kind(), "event_subscriber_closed");
            }
        }
    }
}

/// Collects subscribers before the router starts
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    metrics: Arc<Metrics>,
}

impl EventBus {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { subscribers: Vec::new(), metrics }
    }

    /// Add a subscriber with its own bounded buffer
    pub fn subscribe(&mut self, name: &str, capacity: usize) -> mpsc::Receiver<BeaconEvent> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers.push(Subscriber {
            name: name.to_string(),
            tx,
            dropped: AtomicU64::new(0),
            last_warn_ms: AtomicU64::new(0),
        });
        rx
    }

    /// Freeze the subscriber list into a cloneable sender
    pub fn into_sender(self) -> EventSender {
        EventSender { subscribers: self.subscribers.into(), metrics: self.metrics }
    }
}

/// Sender handle for stable events
///
/// Clone this to share across router shards. Non-blocking.
#[derive(Clone)]
pub struct EventSender {
    subscribers: Arc<[Subscriber]>,
    metrics: Arc<Metrics>,
}

impl EventSender {
    /// Deliver `event` to every subscriber
    pub fn send(&self, event: BeaconEvent) {
        self.metrics.record_event_emitted(&event);
        let Some((last, rest)) = self.subscribers.split_last() else {
            return;
        };
        for subscriber in rest {
            subscriber.offer(event.clone(), &self.metrics);
        }
        last.offer(event, &self.metrics);
    }

    /// Number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Error details carried by `ranging_failed` payloads
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: i32,
    pub message: String,
}

/// Wire form of a stable event for MQTT and the JSONL log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventPayload {
    /// Site identifier
    pub site: String,
    /// Timestamp (epoch ms)
    pub ts: u64,
    /// Event kind (region_entered, region_exited, nearest_changed, beacon_ranged, ranging_failed)
    pub t: &'static str,
    /// Region identifier
    pub region: String,
    /// New nearest beacon (nearest_changed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nearest: Option<BeaconRecord>,
    /// Ranged beacon (beacon_ranged)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon: Option<BeaconRecord>,
    /// Provider failure (ranging_failed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
}

impl EventPayload {
    pub fn from_event(event: &BeaconEvent, site: &str) -> Self {
        let mut payload = Self {
            site: site.to_string(),
            ts: epoch_ms(),
            t: event.kind(),
            region: event.identifier().to_string(),
            nearest: None,
            beacon: None,
            error: None,
        };
        match event {
            BeaconEvent::RegionEntered { .. } | BeaconEvent::RegionExited { .. } => {}
            BeaconEvent::NearestBeaconChanged { identifier, identity } => {
                payload.nearest = Some(BeaconRecord::from_identity(identifier, identity));
            }
            BeaconEvent::BeaconRanged { identifier, sample } => {
                payload.beacon = Some(BeaconRecord::from_sample(identifier, sample));
            }
            BeaconEvent::RangingFailed { error, .. } => {
                payload.error =
                    Some(ErrorPayload { code: error.error_code(), message: error.to_string() });
            }
        }
        payload
    }
}

/// Notification sink that forwards to a bounded channel (drop if full)
pub struct ChannelNotificationSink {
    tx: mpsc::Sender<LocalNotification>,
    metrics: Arc<Metrics>,
}

impl ChannelNotificationSink {
    pub fn new(tx: mpsc::Sender<LocalNotification>, metrics: Arc<Metrics>) -> Self {
        Self { tx, metrics }
    }
}

impl NotificationSink for ChannelNotificationSink {
    fn post(&self, notification: LocalNotification) {
        self.metrics.record_event_offered();
        if let Err(e) = self.tx.try_send(notification) {
            self.metrics.record_event_dropped();
            warn!(error = %e, "notification_dropped");
        }
    }
}

/// Create a notification channel pair
pub fn create_notification_channel(
    buffer_size: usize,
    metrics: Arc<Metrics>,
) -> (ChannelNotificationSink, mpsc::Receiver<LocalNotification>) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    (ChannelNotificationSink::new(tx, metrics), rx)
}
