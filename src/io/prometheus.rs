//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics and a
//! liveness probe at /health. Uses hyper for the HTTP server.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Counter family with one series per `kind` label
fn write_labeled_counter(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    series: &[(&str, u64)],
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} counter");
    for (kind, val) in series {
        let _ = writeln!(output, "{name}{{site=\"{site}\",kind=\"{kind}\"}} {val}");
    }
}

fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {}", avg * count);
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.report();
    let mut output = String::with_capacity(4096);

    write_router_metrics(&mut output, site_id, &summary);
    write_event_metrics(&mut output, site_id, &summary);
    write_drop_metrics(&mut output, site_id, &summary);

    output
}

fn write_router_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "beacon_commands_total",
        "Router commands processed",
        MetricType::Counter,
        site,
        summary.commands_total,
    );
    write_gauge_f64(
        output,
        "beacon_commands_per_sec",
        "Router commands per second since last report",
        site,
        summary.commands_per_sec,
    );
    write_histogram(
        output,
        "beacon_command_latency_us",
        "Router command handling latency in microseconds",
        site,
        &summary.lat_buckets,
        summary.avg_latency_us,
    );
    write_metric(
        output,
        "beacon_active_regions",
        "Regions currently monitored",
        MetricType::Gauge,
        site,
        summary.active_regions,
    );
    write_metric(
        output,
        "beacon_pending_transitions",
        "Deferred transitions waiting for their deadline",
        MetricType::Gauge,
        site,
        summary.pending_timers,
    );
    write_metric(
        output,
        "beacon_region_signals_total",
        "Raw enter/exit signals received",
        MetricType::Counter,
        site,
        summary.region_signals_total,
    );
    write_metric(
        output,
        "beacon_ranging_updates_total",
        "Raw ranging cycles received",
        MetricType::Counter,
        site,
        summary.ranging_updates_total,
    );
    write_metric(
        output,
        "beacon_samples_total",
        "Beacon samples received in ranging cycles",
        MetricType::Counter,
        site,
        summary.samples_total,
    );
    write_metric(
        output,
        "beacon_unknown_region_signals_total",
        "Raw input for identifiers that are not monitored",
        MetricType::Counter,
        site,
        summary.unknown_region_signals,
    );
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_labeled_counter(
        output,
        "beacon_events_total",
        "Stable events emitted by kind",
        site,
        &[
            ("region_entered", summary.regions_entered),
            ("region_exited", summary.regions_exited),
            ("nearest_changed", summary.nearest_changed),
            ("beacon_ranged", summary.beacons_ranged),
            ("ranging_failed", summary.ranging_failed),
        ],
    );
    write_labeled_counter(
        output,
        "beacon_debounce_total",
        "Debounce decisions by outcome",
        site,
        &[
            ("suppressed", summary.signals_suppressed),
            ("rescheduled", summary.transitions_rescheduled),
            ("deferred_fired", summary.deferred_fired),
            ("deferred_dropped", summary.deferred_dropped),
        ],
    );
    write_labeled_counter(
        output,
        "beacon_notifications_total",
        "Local notifications by outcome",
        site,
        &[("posted", summary.notifications_posted), ("skipped", summary.notifications_skipped)],
    );
}

fn write_drop_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "beacon_events_dropped_total",
        "Events dropped because a subscriber channel was full",
        MetricType::Counter,
        site,
        summary.events_dropped,
    );
    write_gauge_f64(
        output,
        "beacon_event_drop_ratio",
        "Dropped events over offered events",
        site,
        summary.event_drop_ratio,
    );
    write_metric(
        output,
        "beacon_ingest_dropped_total",
        "Raw signals dropped because a router shard was full",
        MetricType::Counter,
        site,
        summary.ingest_dropped,
    );
    write_gauge_f64(
        output,
        "beacon_ingest_drop_ratio",
        "Dropped raw signals over received raw signals",
        site,
        summary.ingest_drop_ratio,
    );
    write_metric(
        output,
        "beacon_ingest_malformed_total",
        "Raw messages that could not be parsed",
        MetricType::Counter,
        site,
        summary.ingest_malformed,
    );
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    metrics: Arc<Metrics>,
    site_id: Arc<String>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => text_response(
            StatusCode::OK,
            "text/plain; version=0.0.4; charset=utf-8",
            format_prometheus_metrics(&metrics, &site_id),
        ),
        (&Method::GET, "/health") => {
            text_response(StatusCode::OK, "text/plain", "ok".to_string())
        }
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string()),
    };
    Ok(response)
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    metrics: Arc<Metrics>,
    site_id: String,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    let site_id = Arc::new(site_id);

    info!(port = %port, site = %site_id, "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let metrics = metrics.clone();
                        let site_id = site_id.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_request(req, metrics.clone(), site_id.clone())
                            });

                            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
