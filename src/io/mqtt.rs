//! MQTT bridge to the radio stack
//!
//! The radio bridge publishes raw region signals, ranging cycles, failures
//! and authorization changes as JSON on the raw topic. The gateway answers
//! with watch/unwatch control messages on the control topic.
//!
//! Raw messages are forwarded to the router without awaiting, so the MQTT
//! eventloop is never blocked by a busy shard. Ranging cycles may be dropped
//! under load; region signals and failures are not.
//!
//! An authorization revocation is reported as a `RangingFailed` for every
//! active watch.

use crate::domain::identity::BeaconIdentity;
use crate::domain::record::BeaconRecord;
use crate::domain::region::{RegionState, Subscription};
use crate::domain::sample::BeaconSample;
use crate::error::ProviderError;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::dispatch::RouterHandle;
use crate::services::provider::RangingProvider;
use crate::services::router::clock_now;
use parking_lot::{Mutex, RwLock};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Authorization state reported by the radio bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    #[default]
    Authorized,
    Denied,
    Restricted,
    Disabled,
}

impl AuthorizationStatus {
    /// Error that `watch` fails with under this status
    pub fn as_error(self) -> Option<ProviderError> {
        match self {
            Self::Authorized => None,
            Self::Denied => Some(ProviderError::AuthorizationDenied),
            Self::Restricted => Some(ProviderError::AuthorizationRestricted),
            Self::Disabled => Some(ProviderError::LocationServicesDisabled),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Authorized => "authorized",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::Disabled => "disabled",
        }
    }
}

/// Message on the raw topic, tagged by `type`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RawMessage {
    /// Boundary crossing (`state` is enter/exit or inside/outside)
    Region { identifier: String, state: String },
    /// One ranging cycle
    Ranging {
        identifier: String,
        #[serde(default)]
        beacons: Vec<BeaconRecord>,
    },
    /// Provider could not monitor or range a region
    Failure { identifier: String, code: i32 },
    /// Authorization change for the whole radio stack
    Authorization { status: AuthorizationStatus },
}

/// Parse a raw bridge message
pub fn parse_raw_message(payload: &[u8]) -> Result<RawMessage, serde_json::Error> {
    serde_json::from_slice(payload)
}

/// Control message published on watch/unwatch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlMessage {
    pub op: &'static str,
    pub subscription: Uuid,
    pub identifier: String,
    pub uuid: String,
    pub major: Option<u16>,
    pub minor: Option<u16>,
}

impl ControlMessage {
    fn watch(subscription: &Subscription, identity: &BeaconIdentity) -> Self {
        Self {
            op: "watch",
            subscription: subscription.id,
            identifier: subscription.identifier.clone(),
            uuid: identity.uuid_string(),
            major: identity.major,
            minor: identity.minor,
        }
    }
}

/// Ranging provider that drives the radio bridge over MQTT
pub struct MqttRangingProvider {
    client: AsyncClient,
    control_topic: String,
    authorization: RwLock<AuthorizationStatus>,
    /// Active watches by subscription id, replayed after a reconnect
    active: Mutex<FxHashMap<Uuid, ControlMessage>>,
}

impl MqttRangingProvider {
    pub fn new(client: AsyncClient, control_topic: &str) -> Self {
        Self {
            client,
            control_topic: control_topic.to_string(),
            authorization: RwLock::new(AuthorizationStatus::Authorized),
            active: Mutex::new(FxHashMap::default()),
        }
    }

    pub fn authorization(&self) -> AuthorizationStatus {
        *self.authorization.read()
    }

    /// Record a new authorization status
    ///
    /// Returns the identifiers of active watches affected when the status
    /// changes to one that refuses ranging. Watches stay registered.
    pub fn set_authorization(&self, status: AuthorizationStatus) -> Vec<String> {
        let previous = std::mem::replace(&mut *self.authorization.write(), status);
        if previous == status {
            return Vec::new();
        }
        if status.as_error().is_none() {
            info!(from = %previous.as_str(), to = %status.as_str(), "authorization_changed");
            return Vec::new();
        }

        let mut revoked: Vec<String> =
            self.active.lock().values().map(|m| m.identifier.clone()).collect();
        revoked.sort_unstable();
        revoked.dedup();
        warn!(
            from = %previous.as_str(),
            to = %status.as_str(),
            regions = %revoked.len(),
            "authorization_changed"
        );
        revoked
    }

    /// Number of registrations the bridge should currently hold
    pub fn active_watches(&self) -> usize {
        self.active.lock().len()
    }

    fn publish(&self, message: &ControlMessage) -> Result<(), ProviderError> {
        let json =
            serde_json::to_vec(message).map_err(|e| ProviderError::Transport(e.to_string()))?;
        self.client
            .try_publish(&self.control_topic, QoS::AtLeastOnce, false, json)
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }

    /// Re-send every active watch, e.g. after the broker connection was re-established
    pub fn republish_watches(&self) -> usize {
        let messages: Vec<ControlMessage> = self.active.lock().values().cloned().collect();
        let mut sent = 0;
        for message in &messages {
            match self.publish(message) {
                Ok(()) => sent += 1,
                Err(e) => {
                    warn!(identifier = %message.identifier, error = %e, "watch_republish_failed")
                }
            }
        }
        if sent > 0 {
            info!(watches = %sent, "watches_republished");
        }
        sent
    }
}

impl RangingProvider for MqttRangingProvider {
    fn watch(
        &self,
        identifier: &str,
        identity: &BeaconIdentity,
    ) -> Result<Subscription, ProviderError> {
        if let Some(error) = self.authorization().as_error() {
            return Err(error);
        }

        let subscription = Subscription::new(identifier);
        let message = ControlMessage::watch(&subscription, identity);
        self.publish(&message)?;
        self.active.lock().insert(subscription.id, message);

        debug!(identifier = %identifier, subscription = %subscription.id, "bridge_watch_sent");
        Ok(subscription)
    }

    fn unwatch(&self, subscription: &Subscription) {
        let Some(mut message) = self.active.lock().remove(&subscription.id) else {
            return;
        };
        message.op = "unwatch";
        if let Err(e) = self.publish(&message) {
            warn!(identifier = %subscription.identifier, error = %e, "bridge_unwatch_failed");
        }
    }
}

/// Build the MQTT client used for both ingest and control
pub fn create_mqtt_client(config: &Config) -> (AsyncClient, EventLoop) {
    let client_id = format!("beacon-gateway-{}", config.site_id());
    let mut options = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    options.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        options.set_credentials(username, password);
    }

    AsyncClient::new(options, 256)
}

/// Route one raw payload; returns false if it could not be parsed or was dropped
pub fn handle_raw_payload(
    payload: &[u8],
    router: &RouterHandle,
    provider: &MqttRangingProvider,
    metrics: &Metrics,
) -> bool {
    let message = match parse_raw_message(payload) {
        Ok(message) => message,
        Err(e) => {
            metrics.record_ingest_malformed();
            debug!(error = %e, bytes = %payload.len(), "raw_message_malformed");
            return false;
        }
    };

    match message {
        RawMessage::Region { identifier, state } => match state.parse::<RegionState>() {
            Ok(state) => router.region_signal(&identifier, state),
            Err(e) => {
                metrics.record_ingest_malformed();
                debug!(identifier = %identifier, error = %e, "raw_region_state_invalid");
                false
            }
        },
        RawMessage::Ranging { identifier, beacons } => {
            let observed_at = clock_now();
            let samples: Vec<BeaconSample> = beacons
                .iter()
                .filter_map(|record| match record.to_sample(observed_at) {
                    Ok(sample) => Some(sample),
                    Err(e) => {
                        debug!(identifier = %identifier, error = %e, "ranged_record_skipped");
                        None
                    }
                })
                .collect();
            router.ranging_update(&identifier, samples)
        }
        RawMessage::Failure { identifier, code } => {
            router.ranging_failed(&identifier, ProviderError::from_code(code))
        }
        RawMessage::Authorization { status } => {
            let revoked = provider.set_authorization(status);
            if let Some(error) = status.as_error() {
                for identifier in &revoked {
                    router.ranging_failed(identifier, error.clone());
                }
            }
            true
        }
    }
}

/// Run the MQTT eventloop, feeding raw messages to the router
///
/// Subscribes to the raw topic on every connect and replays active watches
/// so the bridge recovers after a broker restart.
pub async fn run_mqtt_ingest(
    client: AsyncClient,
    mut eventloop: EventLoop,
    raw_topic: String,
    router: RouterHandle,
    provider: Arc<MqttRangingProvider>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    let _ = client.try_disconnect();
                    return;
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if publish.topic == raw_topic {
                            handle_raw_payload(&publish.payload, &router, &provider, &metrics);
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(topic = %raw_topic, "mqtt_connected");
                        if let Err(e) = client.try_subscribe(raw_topic.as_str(), QoS::AtMostOnce) {
                            error!(error = %e, topic = %raw_topic, "mqtt_subscribe_failed");
                        }
                        provider.republish_watches();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}
