//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::event::BeaconEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

#[inline]
fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps periodic counters to get a consistent snapshot.
pub struct Metrics {
    /// Router commands handled (monotonic)
    commands_total: AtomicU64,
    /// Commands since last report (reset on report)
    commands_since_report: AtomicU64,
    /// Sum of handling latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max handling latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Command handling latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Raw enter/exit signals for monitored regions
    region_signals_total: AtomicU64,
    /// Ranging updates for monitored regions
    ranging_updates_total: AtomicU64,
    /// Samples carried by those updates
    samples_total: AtomicU64,
    /// Signals for identifiers that are not monitored
    unknown_region_signals: AtomicU64,
    /// Emitted events by kind
    regions_entered: AtomicU64,
    regions_exited: AtomicU64,
    nearest_changed: AtomicU64,
    beacons_ranged: AtomicU64,
    ranging_failed: AtomicU64,
    /// Signals equal to the current state
    signals_suppressed: AtomicU64,
    /// Transitions deferred to the end of the interval
    transitions_rescheduled: AtomicU64,
    /// Deferred transitions that fired and emitted
    deferred_fired: AtomicU64,
    /// Deferred transitions that fired with no net change
    deferred_dropped: AtomicU64,
    /// Events offered to subscriber channels
    events_offered: AtomicU64,
    /// Events dropped because a subscriber channel was full
    events_dropped: AtomicU64,
    /// Raw provider messages received by the ingest
    ingest_received: AtomicU64,
    /// Raw provider messages dropped because a router shard was full
    ingest_dropped: AtomicU64,
    /// Raw provider messages that failed to parse
    ingest_malformed: AtomicU64,
    /// Local notifications posted
    notifications_posted: AtomicU64,
    /// Local notifications skipped by the formatter
    notifications_skipped: AtomicU64,
    /// Currently monitored regions (gauge)
    active_regions: AtomicU64,
    /// Armed deferred-transition timers (gauge)
    pending_timers: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            commands_total: AtomicU64::new(0),
            commands_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            region_signals_total: AtomicU64::new(0),
            ranging_updates_total: AtomicU64::new(0),
            samples_total: AtomicU64::new(0),
            unknown_region_signals: AtomicU64::new(0),
            regions_entered: AtomicU64::new(0),
            regions_exited: AtomicU64::new(0),
            nearest_changed: AtomicU64::new(0),
            beacons_ranged: AtomicU64::new(0),
            ranging_failed: AtomicU64::new(0),
            signals_suppressed: AtomicU64::new(0),
            transitions_rescheduled: AtomicU64::new(0),
            deferred_fired: AtomicU64::new(0),
            deferred_dropped: AtomicU64::new(0),
            events_offered: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            ingest_received: AtomicU64::new(0),
            ingest_dropped: AtomicU64::new(0),
            ingest_malformed: AtomicU64::new(0),
            notifications_posted: AtomicU64::new(0),
            notifications_skipped: AtomicU64::new(0),
            active_regions: AtomicU64::new(0),
            pending_timers: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a router command was handled with given latency (lock-free)
    #[inline]
    pub fn record_command_processed(&self, latency_us: u64) {
        self.commands_total.fetch_add(1, Ordering::Relaxed);
        self.commands_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);

        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn commands_total(&self) -> u64 {
        self.commands_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_region_signal(&self) {
        self.region_signals_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ranging_update(&self, samples: usize) {
        self.ranging_updates_total.fetch_add(1, Ordering::Relaxed);
        self.samples_total.fetch_add(samples as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_unknown_region(&self) {
        self.unknown_region_signals.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an emitted event by kind
    #[inline]
    pub fn record_event_emitted(&self, event: &BeaconEvent) {
        let counter = match event {
            BeaconEvent::RegionEntered { .. } => &self.regions_entered,
            BeaconEvent::RegionExited { .. } => &self.regions_exited,
            BeaconEvent::NearestBeaconChanged { .. } => &self.nearest_changed,
            BeaconEvent::BeaconRanged { .. } => &self.beacons_ranged,
            BeaconEvent::RangingFailed { .. } => &self.ranging_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_signal_suppressed(&self) {
        self.signals_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition_rescheduled(&self) {
        self.transitions_rescheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fired deferred transition; `emitted` is false when it had no net change
    #[inline]
    pub fn record_deferred_fired(&self, emitted: bool) {
        if emitted {
            self.deferred_fired.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deferred_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_event_offered(&self) {
        self.events_offered.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event dropped due to a full subscriber channel (lock-free)
    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_ingest_received(&self) {
        self.ingest_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a raw provider message dropped due to a full router shard (lock-free)
    #[inline]
    pub fn record_ingest_dropped(&self) {
        self.ingest_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn ingest_dropped(&self) -> u64 {
        self.ingest_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_ingest_malformed(&self) {
        self.ingest_malformed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_posted(&self) {
        self.notifications_posted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification_skipped(&self) {
        self.notifications_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn region_started(&self) {
        self.active_regions.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the active region gauge, saturating at zero
    #[inline]
    pub fn region_stopped(&self) {
        let _ = self.active_regions.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            v.checked_sub(1)
        });
    }

    #[inline]
    pub fn active_regions(&self) -> u64 {
        self.active_regions.load(Ordering::Relaxed)
    }

    /// Adjust the armed timer gauge by `delta`, saturating at zero
    #[inline]
    pub fn adjust_pending_timers(&self, delta: i64) {
        let _ = self.pending_timers.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
            Some(v.saturating_add_signed(delta))
        });
    }

    /// Report metrics and reset periodic counters
    pub fn report(&self) -> MetricsSummary {
        let now = Instant::now();
        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = now.duration_since(*last).as_secs_f64();
            *last = now;
            elapsed
        };

        let commands_total = self.commands_total.load(Ordering::Relaxed);
        let commands_since = self.commands_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let commands_per_sec =
            if elapsed_secs > 0.0 { commands_since as f64 / elapsed_secs } else { 0.0 };
        let avg_latency = if commands_since > 0 { latency_sum / commands_since } else { 0 };

        let events_offered = self.events_offered.load(Ordering::Relaxed);
        let events_dropped = self.events_dropped.load(Ordering::Relaxed);
        let ingest_received = self.ingest_received.load(Ordering::Relaxed);
        let ingest_dropped = self.ingest_dropped.load(Ordering::Relaxed);

        MetricsSummary {
            commands_total,
            commands_per_sec,
            avg_latency_us: avg_latency,
            max_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            region_signals_total: self.region_signals_total.load(Ordering::Relaxed),
            ranging_updates_total: self.ranging_updates_total.load(Ordering::Relaxed),
            samples_total: self.samples_total.load(Ordering::Relaxed),
            unknown_region_signals: self.unknown_region_signals.load(Ordering::Relaxed),
            regions_entered: self.regions_entered.load(Ordering::Relaxed),
            regions_exited: self.regions_exited.load(Ordering::Relaxed),
            nearest_changed: self.nearest_changed.load(Ordering::Relaxed),
            beacons_ranged: self.beacons_ranged.load(Ordering::Relaxed),
            ranging_failed: self.ranging_failed.load(Ordering::Relaxed),
            signals_suppressed: self.signals_suppressed.load(Ordering::Relaxed),
            transitions_rescheduled: self.transitions_rescheduled.load(Ordering::Relaxed),
            deferred_fired: self.deferred_fired.load(Ordering::Relaxed),
            deferred_dropped: self.deferred_dropped.load(Ordering::Relaxed),
            events_offered,
            events_dropped,
            event_drop_ratio: ratio(events_dropped, events_offered),
            ingest_received,
            ingest_dropped,
            ingest_drop_ratio: ratio(ingest_dropped, ingest_received),
            ingest_malformed: self.ingest_malformed.load(Ordering::Relaxed),
            notifications_posted: self.notifications_posted.load(Ordering::Relaxed),
            notifications_skipped: self.notifications_skipped.load(Ordering::Relaxed),
            active_regions: self.active_regions.load(Ordering::Relaxed),
            pending_timers: self.pending_timers.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for egress)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub commands_total: u64,
    pub commands_per_sec: f64,
    pub avg_latency_us: u64,
    pub max_latency_us: u64,
    /// Command handling latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub region_signals_total: u64,
    pub ranging_updates_total: u64,
    pub samples_total: u64,
    pub unknown_region_signals: u64,
    pub regions_entered: u64,
    pub regions_exited: u64,
    pub nearest_changed: u64,
    pub beacons_ranged: u64,
    pub ranging_failed: u64,
    pub signals_suppressed: u64,
    pub transitions_rescheduled: u64,
    pub deferred_fired: u64,
    pub deferred_dropped: u64,
    pub events_offered: u64,
    pub events_dropped: u64,
    /// events_dropped / events_offered
    pub event_drop_ratio: f64,
    pub ingest_received: u64,
    pub ingest_dropped: u64,
    /// ingest_dropped / ingest_received
    pub ingest_drop_ratio: f64,
    pub ingest_malformed: u64,
    pub notifications_posted: u64,
    pub notifications_skipped: u64,
    pub active_regions: u64,
    pub pending_timers: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            commands_total = %self.commands_total,
            commands_per_sec = format!("{:.1}", self.commands_per_sec),
            avg_latency_us = %self.avg_latency_us,
            max_latency_us = %self.max_latency_us,
            p99_us = %self.lat_p99_us,
            active_regions = %self.active_regions,
            pending_timers = %self.pending_timers,
            entered = %self.regions_entered,
            exited = %self.regions_exited,
            nearest_changed = %self.nearest_changed,
            suppressed = %self.signals_suppressed,
            rescheduled = %self.transitions_rescheduled,
            events_dropped = %self.events_dropped,
            ingest_dropped = %self.ingest_dropped,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.commands_total(), 0);
        assert_eq!(metrics.active_regions(), 0);
    }

    #[test]
    fn test_record_command() {
        let metrics = Metrics::new();

        metrics.record_command_processed(100);
        assert_eq!(metrics.commands_total(), 1);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 100);

        metrics.record_command_processed(200);
        assert_eq!(metrics.commands_total(), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();

        metrics.record_command_processed(100);
        metrics.record_command_processed(200);
        metrics.record_command_processed(300);
        metrics.region_started();
        metrics.region_started();

        let summary = metrics.report();

        assert_eq!(summary.commands_total, 3);
        assert_eq!(summary.avg_latency_us, 200);
        assert_eq!(summary.max_latency_us, 300);
        assert_eq!(summary.active_regions, 2);

        assert_eq!(metrics.commands_since_report.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.latency_max_us.load(Ordering::Relaxed), 0);
        // Monotonic counters survive
        assert_eq!(metrics.report().commands_total, 3);
    }

    #[test]
    fn test_report_empty() {
        let summary = Metrics::new().report();

        assert_eq!(summary.commands_total, 0);
        assert_eq!(summary.avg_latency_us, 0);
        assert_eq!(summary.event_drop_ratio, 0.0);
        assert_eq!(summary.ingest_drop_ratio, 0.0);
    }

    #[test]
    fn test_event_counters_by_kind() {
        let metrics = Metrics::new();
        metrics.record_event_emitted(&BeaconEvent::RegionEntered { identifier: "a".into() });
        metrics.record_event_emitted(&BeaconEvent::RegionExited { identifier: "a".into() });
        metrics.record_event_emitted(&BeaconEvent::RegionEntered { identifier: "b".into() });
        metrics.record_event_emitted(&BeaconEvent::RangingFailed {
            identifier: "b".into(),
            error: ProviderError::CannotRange,
        });

        let summary = metrics.report();
        assert_eq!(summary.regions_entered, 2);
        assert_eq!(summary.regions_exited, 1);
        assert_eq!(summary.ranging_failed, 1);
        assert_eq!(summary.nearest_changed, 0);
    }

    #[test]
    fn test_drop_ratios() {
        let metrics = Metrics::new();
        for _ in 0..4 {
            metrics.record_event_offered();
            metrics.record_ingest_received();
        }
        metrics.record_event_dropped();
        metrics.record_ingest_dropped();
        metrics.record_ingest_dropped();

        let summary = metrics.report();
        assert_eq!(summary.event_drop_ratio, 0.25);
        assert_eq!(summary.ingest_drop_ratio, 0.5);
    }

    #[test]
    fn test_gauges_saturate_at_zero() {
        let metrics = Metrics::new();
        metrics.region_stopped();
        assert_eq!(metrics.active_regions(), 0);

        metrics.adjust_pending_timers(2);
        metrics.adjust_pending_timers(-3);
        assert_eq!(metrics.report().pending_timers, 0);
    }

    #[test]
    fn test_deferred_outcomes() {
        let metrics = Metrics::new();
        metrics.record_deferred_fired(true);
        metrics.record_deferred_fired(false);
        metrics.record_deferred_fired(false);

        let summary = metrics.report();
        assert_eq!(summary.deferred_fired, 1);
        assert_eq!(summary.deferred_dropped, 2);
    }

    #[test]
    fn test_concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(Metrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = metrics.clone();
            handles.push(thread::spawn(move || {
                for i in 0..1000 {
                    m.record_command_processed(i as u64);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(metrics.commands_total(), 10_000);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(51201), 10);
    }

    #[test]
    fn test_percentile_computation() {
        let metrics = Metrics::new();
        for _ in 0..100 {
            metrics.record_command_processed(150);
        }

        let summary = metrics.report();
        assert_eq!(summary.lat_p50_us, 200);
        assert_eq!(summary.lat_p99_us, 200);
    }
}
