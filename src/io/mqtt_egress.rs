//! MQTT publisher for stable beacon events
//!
//! Publishes to topics for downstream consumers:
//! - beacons/events - Stable events as `EventPayload` JSON (QoS 0)
//! - beacons/notifications - Local notifications (QoS 1)

use crate::domain::event::BeaconEvent;
use crate::infra::config::Config;
use crate::io::event_channel::EventPayload;
use crate::services::notifier::LocalNotification;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Notification as published, with site and timestamp
#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    site: &'a str,
    ts: u64,
    #[serde(flatten)]
    notification: &'a LocalNotification,
}

/// MQTT publisher actor
///
/// Receives events and notifications from the router and publishes them.
pub struct MqttPublisher {
    client: AsyncClient,
    events: mpsc::Receiver<BeaconEvent>,
    notifications: Option<mpsc::Receiver<LocalNotification>>,
    site_id: String,
    events_topic: String,
    notifications_topic: String,
}

impl MqttPublisher {
    /// Create a new MQTT publisher
    ///
    /// Connects with its own client to the configured MQTT host/port.
    pub fn new(
        config: &Config,
        events: mpsc::Receiver<BeaconEvent>,
        notifications: Option<mpsc::Receiver<LocalNotification>>,
    ) -> Self {
        let client_id = format!("beacon-egress-{}", std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => info!("mqtt_egress_connected"),
                    Ok(Event::Incoming(Packet::PubAck(_))) => debug!("mqtt_egress_puback"),
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_egress_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Self {
            client,
            events,
            notifications,
            site_id: config.site_id().to_string(),
            events_topic: config.mqtt_egress_events_topic().to_string(),
            notifications_topic: config.mqtt_egress_notifications_topic().to_string(),
        }
    }

    /// Run the publisher loop until shutdown or until the router goes away
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            events = %self.events_topic,
            notifications = %self.notifications_topic,
            "mqtt_egress_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_egress_shutdown");
                        while let Ok(event) = self.events.try_recv() {
                            self.publish_event(&event).await;
                        }
                        return;
                    }
                }
                event = self.events.recv() => {
                    match event {
                        Some(event) => self.publish_event(&event).await,
                        None => return,
                    }
                }
                Some(notification) = recv_notification(&mut self.notifications) => {
                    self.publish_notification(&notification).await;
                }
            }
        }
    }

    async fn publish_event(&self, event: &BeaconEvent) {
        let payload = EventPayload::from_event(event, &self.site_id);
        match serde_json::to_vec(&payload) {
            Ok(json) => {
                if let Err(e) =
                    self.client.publish(&self.events_topic, QoS::AtMostOnce, false, json).await
                {
                    debug!(error = %e, kind = %payload.t, "mqtt_egress_event_failed");
                }
            }
            Err(e) => error!(error = %e, "mqtt_egress_encode_failed"),
        }
    }

    async fn publish_notification(&self, notification: &LocalNotification) {
        let payload = notification_payload(&self.site_id, notification);
        match serde_json::to_vec(&payload) {
            Ok(json) => {
                if let Err(e) = self
                    .client
                    .publish(&self.notifications_topic, QoS::AtLeastOnce, false, json)
                    .await
                {
                    error!(error = %e, "mqtt_egress_notification_failed");
                }
            }
            Err(e) => error!(error = %e, "mqtt_egress_encode_failed"),
        }
    }
}

fn notification_payload<'a>(
    site: &'a str,
    notification: &'a LocalNotification,
) -> NotificationPayload<'a> {
    NotificationPayload { site, ts: crate::domain::event::epoch_ms(), notification }
}

/// Pending forever when notifications are not wired
async fn recv_notification(
    rx: &mut Option<mpsc::Receiver<LocalNotification>>,
) -> Option<LocalNotification> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
