//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use crate::services::notifier::{DEFAULT_ENTER_TEMPLATE, DEFAULT_EXIT_TEMPLATE};
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier (e.g., "store-12")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "gateway".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    /// Topic carrying raw provider messages from the radio bridge
    #[serde(default = "default_raw_topic")]
    pub topic: String,
    /// Topic for watch/unwatch control messages to the radio bridge
    #[serde(default = "default_control_topic")]
    pub control_topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_raw_topic(),
            control_topic: default_control_topic(),
            username: None,
            password: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_raw_topic() -> String {
    "beacons/raw".to_string()
}

fn default_control_topic() -> String {
    "beacons/control".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Debounce interval for regions that do not set their own (0 disables)
    #[serde(default = "default_monitoring_interval_ms")]
    pub default_monitoring_interval_ms: u64,
    /// Number of router tasks; identifiers are hashed across them
    #[serde(default = "default_shards")]
    pub shards: usize,
    /// Per-shard command queue capacity
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
    /// Per-subscriber event queue capacity
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_monitoring_interval_ms: default_monitoring_interval_ms(),
            shards: default_shards(),
            command_buffer: default_command_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_monitoring_interval_ms() -> u64 {
    5000
}

fn default_shards() -> usize {
    1
}

fn default_command_buffer() -> usize {
    1024
}

fn default_event_buffer() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationsConfig {
    /// Post local notifications for enter/exit
    #[serde(default)]
    pub enabled: bool,
    /// Message template for enter; `{identifier}` is replaced, empty disables
    #[serde(default = "default_enter_template")]
    pub enter_template: String,
    /// Message template for exit; `{identifier}` is replaced, empty disables
    #[serde(default = "default_exit_template")]
    pub exit_template: String,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enter_template: default_enter_template(),
            exit_template: default_exit_template(),
        }
    }
}

fn default_enter_template() -> String {
    DEFAULT_ENTER_TEMPLATE.to_string()
}

fn default_exit_template() -> String {
    DEFAULT_EXIT_TEMPLATE.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EgressConfig {
    /// File path for the event log (JSONL format, empty disables)
    #[serde(default = "default_egress_file")]
    pub file: String,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self { file: default_egress_file() }
    }
}

fn default_egress_file() -> String {
    "beacon-events.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for stable beacon events (QoS 0)
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
    /// Topic for local notifications (QoS 1)
    #[serde(default = "default_notifications_topic")]
    pub notifications_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            events_topic: default_events_topic(),
            notifications_topic: default_notifications_topic(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_events_topic() -> String {
    "beacons/events".to_string()
}

fn default_notifications_topic() -> String {
    "beacons/notifications".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval(), prometheus_port: default_prometheus_port() }
    }
}

fn default_metrics_interval() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Run the embedded MQTT broker
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_broker_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
}

fn default_broker_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_broker_port() -> u16 {
    1883
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_broker_bind_address(),
            port: default_broker_port(),
        }
    }
}

/// A region monitored from startup
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RegionConfig {
    pub identifier: String,
    pub uuid: String,
    #[serde(default)]
    pub major: Option<u16>,
    #[serde(default)]
    pub minor: Option<u16>,
    /// Overrides the router default when set
    #[serde(default)]
    pub monitoring_interval_ms: Option<u64>,
}

impl RegionConfig {
    /// Debounce interval for this region
    pub fn interval(&self, default: Duration) -> Duration {
        self.monitoring_interval_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_control_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    default_monitoring_interval_ms: u64,
    router_shards: usize,
    command_buffer: usize,
    event_buffer: usize,
    notifications_enabled: bool,
    enter_template: String,
    exit_template: String,
    egress_file: String,
    mqtt_egress_enabled: bool,
    mqtt_egress_events_topic: String,
    mqtt_egress_notifications_topic: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    broker_enabled: bool,
    broker_bind_address: String,
    broker_port: u16,
    regions: Vec<RegionConfig>,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_control_topic: toml_config.mqtt.control_topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            default_monitoring_interval_ms: toml_config.router.default_monitoring_interval_ms,
            router_shards: toml_config.router.shards.max(1),
            command_buffer: toml_config.router.command_buffer.max(1),
            event_buffer: toml_config.router.event_buffer.max(1),
            notifications_enabled: toml_config.notifications.enabled,
            enter_template: toml_config.notifications.enter_template,
            exit_template: toml_config.notifications.exit_template,
            egress_file: toml_config.egress.file,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_events_topic: toml_config.mqtt_egress.events_topic,
            mqtt_egress_notifications_topic: toml_config.mqtt_egress.notifications_topic,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            broker_enabled: toml_config.broker.enabled,
            broker_bind_address: toml_config.broker.bind_address,
            broker_port: toml_config.broker.port,
            regions: toml_config.regions,
            config_file: config_file.to_string(),
        }
    }

    /// Determine config file path from the CLI flag or environment
    pub fn resolve_config_path(cli: Option<&str>) -> String {
        if let Some(path) = cli {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("Failed to parse config")?;
        Ok(Self::from_toml(toml_config, "inline"))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, &path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path, error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_control_topic(&self) -> &str {
        &self.mqtt_control_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn default_monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.default_monitoring_interval_ms)
    }

    pub fn router_shards(&self) -> usize {
        self.router_shards
    }

    pub fn command_buffer(&self) -> usize {
        self.command_buffer
    }

    pub fn event_buffer(&self) -> usize {
        self.event_buffer
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn enter_template(&self) -> &str {
        &self.enter_template
    }

    pub fn exit_template(&self) -> &str {
        &self.exit_template
    }

    pub fn egress_file(&self) -> &str {
        &self.egress_file
    }

    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_events_topic(&self) -> &str {
        &self.mqtt_egress_events_topic
    }

    pub fn mqtt_egress_notifications_topic(&self) -> &str {
        &self.mqtt_egress_notifications_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn broker_enabled(&self) -> bool {
        self.broker_enabled
    }

    pub fn broker_bind_address(&self) -> &str {
        &self.broker_bind_address
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn regions(&self) -> &[RegionConfig] {
        &self.regions
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to set the router shard count
    pub fn with_router_shards(mut self, shards: usize) -> Self {
        self.router_shards = shards.max(1);
        self
    }

    /// Builder method to set the per-shard command buffer
    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity.max(1);
        self
    }

    /// Builder method to set the default monitoring interval
    pub fn with_default_monitoring_interval(mut self, interval: Duration) -> Self {
        self.default_monitoring_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder method for tests to enable notifications
    #[cfg(test)]
    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }
}
