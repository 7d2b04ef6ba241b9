//! Infrastructure - configuration, metrics, and broker
//!
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free router and ingest metrics
//! - `broker` - Embedded MQTT broker (rumqttd) for single-box deployments

pub mod broker;
pub mod config;
pub mod metrics;

pub use config::{Config, RegionConfig};
pub use metrics::{Metrics, MetricsSummary};
