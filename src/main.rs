//! Beacon gateway - region monitoring and nearest-beacon event routing
//!
//! Consumes raw region signals and ranging cycles from a radio bridge over
//! MQTT, debounces enter/exit, tracks the nearest beacon per region, and
//! publishes stable events.
//!
//! Module structure:
//! - `domain/` - Core types (identity, samples, region state, events)
//! - `io/` - External interfaces (MQTT bridge, egress, Prometheus)
//! - `services/` - Router shards, debouncer, nearest tracking, notifications
//! - `infra/` - Infrastructure (Config, Metrics, Broker)

use anyhow::Context;
use beacon_gateway::infra::{Config, Metrics};
use beacon_gateway::io::mqtt::{create_mqtt_client, run_mqtt_ingest};
use beacon_gateway::io::{
    create_notification_channel, EventBus, EventLog, MqttPublisher, MqttRangingProvider,
};
use beacon_gateway::services::notifier::{LogNotificationSink, NotificationSink};
use beacon_gateway::services::{spawn_router, Notifier, RouterHandle, TemplateFormatter};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Beacon gateway - debounced region events from raw beacon signals
#[derive(Parser, Debug)]
#[command(name = "beacon-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

/// Start every region listed in the config; failures are logged and skipped
async fn start_configured_regions(config: &Config, router: &RouterHandle) -> usize {
    let mut started = 0;
    for region in config.regions() {
        let result = router
            .start_monitoring_uuid(
                &region.identifier,
                &region.uuid,
                region.major,
                region.minor,
                region.interval(router.default_interval()),
            )
            .await;

        match result {
            Ok(()) => started += 1,
            Err(e) => warn!(
                identifier = %region.identifier,
                error = %e,
                code = %e.error_code(),
                "configured_region_failed"
            ),
        }
    }
    started
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // RUST_LOG overrides the default level (info)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = Config::load_from_path(&Config::resolve_config_path(args.config.as_deref()));

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "beacon_gateway_starting");
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        mqtt_host = %config.mqtt_host(),
        mqtt_port = %config.mqtt_port(),
        raw_topic = %config.mqtt_topic(),
        control_topic = %config.mqtt_control_topic(),
        shards = %config.router_shards(),
        default_interval_ms = %config.default_monitoring_interval().as_millis(),
        regions = %config.regions().len(),
        prometheus_port = %config.prometheus_port(),
        "config_loaded"
    );

    if config.broker_enabled() {
        beacon_gateway::infra::broker::start_embedded_broker(&config)
            .context("Failed to start embedded broker")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    // Event subscribers must be registered before the router starts
    let mut bus = EventBus::new(metrics.clone());
    let mut sink_tasks = Vec::new();

    if !config.egress_file().is_empty() {
        let rx = bus.subscribe("event_log", config.event_buffer());
        let log = EventLog::new(config.egress_file(), config.site_id());
        sink_tasks.push(tokio::spawn(log.run(rx, shutdown_rx.clone())));
    }

    let notification_sink: Arc<dyn NotificationSink> = if config.mqtt_egress_enabled() {
        let events_rx = bus.subscribe("mqtt_egress", config.event_buffer());
        let (sink, notifications_rx) =
            create_notification_channel(config.event_buffer(), metrics.clone());
        let publisher = MqttPublisher::new(&config, events_rx, Some(notifications_rx));
        sink_tasks.push(tokio::spawn(publisher.run(shutdown_rx.clone())));
        Arc::new(sink)
    } else {
        Arc::new(LogNotificationSink)
    };

    let notifier = Notifier::new(
        config.notifications_enabled(),
        Arc::new(TemplateFormatter::new(config.enter_template(), config.exit_template())),
        notification_sink,
        metrics.clone(),
    );

    // One MQTT session carries raw ingest and watch control
    let (client, eventloop) = create_mqtt_client(&config);
    let provider = Arc::new(MqttRangingProvider::new(client.clone(), config.mqtt_control_topic()));

    let (router, shard_tasks) = spawn_router(
        &config,
        provider.clone(),
        bus.into_sender(),
        Some(notifier),
        metrics.clone(),
    );

    let ingest = tokio::spawn(run_mqtt_ingest(
        client,
        eventloop,
        config.mqtt_topic().to_string(),
        router.clone(),
        provider,
        metrics.clone(),
        shutdown_rx.clone(),
    ));

    let started = start_configured_regions(&config, &router).await;
    info!(started = %started, configured = %config.regions().len(), "configured_regions_started");

    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let site_id = config.site_id().to_string();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = beacon_gateway::io::prometheus::start_metrics_server(
                prometheus_port,
                prom_metrics,
                site_id,
                prom_shutdown,
            )
            .await
            {
                error!(error = %e, "prometheus_server_error");
            }
        });
    }

    let metrics_clone = metrics.clone();
    let metrics_interval = Duration::from_secs(config.metrics_interval_secs().max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(metrics_interval);
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    // Shards stop once the ingest task and this handle are gone
    let _ = ingest.await;
    drop(router);
    for task in shard_tasks {
        let _ = task.await;
    }

    for task in sink_tasks {
        if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
            warn!("sink_shutdown_timeout");
        }
    }

    metrics.report().log();
    info!("beacon_gateway_shutdown_complete");
    Ok(())
}
