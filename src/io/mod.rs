//! IO modules - external system interfaces
//!
//! - `event_channel` - Subscriber fan-out for stable beacon events
//! - `mqtt` - MQTT bridge to the radio stack (raw ingest, watch control)
//! - `mqtt_egress` - MQTT publisher for events and notifications
//! - `egress` - Event log to file (JSONL format)
//! - `prometheus` - Prometheus metrics HTTP endpoint

pub mod egress;
pub mod event_channel;
pub mod mqtt;
pub mod mqtt_egress;
pub mod prometheus;

pub use egress::EventLog;
pub use event_channel::{
    create_notification_channel, ChannelNotificationSink, ErrorPayload, EventBus, EventPayload,
    EventSender,
};
pub use mqtt::{MqttRangingProvider, RawMessage};
pub use mqtt_egress::MqttPublisher;
