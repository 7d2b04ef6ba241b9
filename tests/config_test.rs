//! Integration tests for configuration loading

use beacon_gateway::infra::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[site]
id = "store-12"

[mqtt]
host = "bridge-host"
port = 1884
topic = "radio/raw"
control_topic = "radio/control"

[router]
default_monitoring_interval_ms = 2500
shards = 4
command_buffer = 512

[notifications]
enabled = true
enter_template = "Welcome to {identifier}"
exit_template = ""

[egress]
file = ""

[mqtt_egress]
enabled = false

[metrics]
interval_secs = 15
prometheus_port = 9091

[[regions]]
identifier = "lobby"
uuid = "E2C56DB5-DFFB-48D2-B060-D0F5A71096E0"
major = 1

[[regions]]
identifier = "till-3"
uuid = "e2c56db5-dffb-48d2-b060-d0f5a71096e0"
major = 1
minor = 3
monitoring_interval_ms = 0
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.site_id(), "store-12");
    assert_eq!(config.mqtt_host(), "bridge-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.mqtt_topic(), "radio/raw");
    assert_eq!(config.mqtt_control_topic(), "radio/control");
    assert_eq!(config.default_monitoring_interval(), Duration::from_millis(2500));
    assert_eq!(config.router_shards(), 4);
    assert_eq!(config.command_buffer(), 512);
    assert_eq!(config.event_buffer(), 1024);
    assert!(config.notifications_enabled());
    assert_eq!(config.enter_template(), "Welcome to {identifier}");
    assert_eq!(config.exit_template(), "");
    assert_eq!(config.egress_file(), "");
    assert!(!config.mqtt_egress_enabled());
    assert_eq!(config.prometheus_port(), 9091);
    assert!(!config.broker_enabled());

    let regions = config.regions();
    assert_eq!(regions.len(), 2);
    assert_eq!(regions[0].identifier, "lobby");
    assert_eq!(regions[0].major, Some(1));
    assert_eq!(regions[0].interval(config.default_monitoring_interval()), Duration::from_millis(2500));
    assert_eq!(regions[1].minor, Some(3));
    assert_eq!(regions[1].interval(config.default_monitoring_interval()), Duration::ZERO);
    assert!(config.config_file().ends_with(temp_file.path().file_name().unwrap().to_str().unwrap()));
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.mqtt_host(), "localhost");
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.router_shards(), 1);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_invalid_file_falls_back_to_defaults() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[router\nshards = ").unwrap();
    temp_file.flush().unwrap();

    assert!(Config::from_file(temp_file.path()).is_err());

    let config = Config::load_from_path(temp_file.path().to_str().unwrap());
    assert_eq!(config.default_monitoring_interval(), Duration::from_secs(5));
}

#[test]
fn test_region_missing_uuid_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[[regions]]\nidentifier = \"lobby\"\n").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{err:#}").contains("uuid"));
}
