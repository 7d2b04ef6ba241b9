//! Region lifecycle and beacon event routing
//!
//! The BeaconEventRouter is the central processor that coordinates:
//! - Region watch management (start/stop monitoring, provider registration)
//! - Enter/exit debouncing (immediate emission or deferred transitions)
//! - Nearest beacon tracking (stable identity changes only)
//! - Event delivery (subscriber fan-out and local notifications)
//!
//! One router owns a disjoint set of identifiers. All work for an identifier
//! runs on the task that owns it, which also owns its deferred-transition
//! timers, so stopping a region cancels its timer synchronously.

mod handlers;
#[cfg(test)]
mod tests;

use crate::domain::identity::BeaconIdentity;
use crate::domain::region::{RegionSnapshot, RegionState, RegionWatch};
use crate::domain::sample::BeaconSample;
use crate::error::{BeaconError, ProviderError};
use crate::infra::metrics::Metrics;
use crate::io::EventSender;
use crate::services::notifier::Notifier;
use crate::services::provider::RangingProvider;
use crate::services::timer_wheel::TimerWheel;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::info;

/// Work item for a router task
#[derive(Debug)]
pub enum RouterCommand {
    /// Begin monitoring a region
    Start {
        identifier: String,
        identity: BeaconIdentity,
        interval: Duration,
        reply: oneshot::Sender<Result<(), BeaconError>>,
    },
    /// Stop monitoring a region; replies false if it was not monitored
    Stop { identifier: String, reply: oneshot::Sender<bool> },
    /// Raw enter/exit signal from the provider
    RegionSignal { identifier: String, state: RegionState, at: Instant },
    /// Raw ranging cycle from the provider
    Ranging { identifier: String, samples: Vec<BeaconSample>, at: Instant },
    /// Provider could not monitor or range a region
    RangingFailed { identifier: String, error: ProviderError },
    /// Snapshot of active regions
    ListRegions { reply: oneshot::Sender<Vec<RegionSnapshot>> },
    /// Toggle local notifications
    SetNotifications { enabled: bool },
}

/// Current time on the tokio clock, as a std instant
///
/// Follows tokio's paused clock in tests.
#[inline]
pub fn clock_now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Central processor for region monitoring and event emission
pub struct BeaconEventRouter {
    /// Active regions by identifier
    pub(crate) watches: FxHashMap<String, RegionWatch>,
    /// Deferred transition deadlines
    pub(crate) timers: TimerWheel,
    /// Registration interface of the ranging provider
    pub(crate) provider: Arc<dyn RangingProvider>,
    /// Stable event fan-out
    pub(crate) events: EventSender,
    /// Local notifications for enter/exit (optional)
    pub(crate) notifier: Option<Notifier>,
    /// Metrics collector
    pub(crate) metrics: Arc<Metrics>,
    /// Shard index, for logs
    pub(crate) shard: usize,
}

impl BeaconEventRouter {
    pub fn new(
        provider: Arc<dyn RangingProvider>,
        events: EventSender,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            watches: FxHashMap::default(),
            timers: TimerWheel::new(),
            provider,
            events,
            notifier: None,
            metrics,
            shard: 0,
        }
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_shard(mut self, shard: usize) -> Self {
        self.shard = shard;
        self
    }

    /// Consume commands until the channel closes, firing deferred
    /// transitions as their deadlines pass
    ///
    /// `signals` carries region signals and failures; it is always drained
    /// ahead of `rx`.
    pub async fn run(
        &mut self,
        mut rx: mpsc::Receiver<RouterCommand>,
        mut signals: mpsc::UnboundedReceiver<RouterCommand>,
    ) {
        info!(shard = %self.shard, "router_started");
        let mut signals_open = true;

        loop {
            let deadline = self.timers.next_deadline();
            tokio::select! {
                biased;
                signal = signals.recv(), if signals_open => {
                    match signal {
                        Some(cmd) => self.handle_command(cmd),
                        None => signals_open = false,
                    }
                }
                cmd = rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd),
                        None => break,
                    }
                }
                _ = sleep_until_deadline(deadline) => {
                    self.fire_due_timers(clock_now());
                }
            }
        }

        while let Ok(cmd) = signals.try_recv() {
            self.handle_command(cmd);
        }
        info!(shard = %self.shard, regions = %self.watches.len(), "router_stopped");
    }

    /// Process a single command, dispatching to the appropriate handler
    pub fn handle_command(&mut self, cmd: RouterCommand) {
        let started = Instant::now();

        match cmd {
            RouterCommand::Start { identifier, identity, interval, reply } => {
                let result = self.start_monitoring(&identifier, identity, interval);
                let _ = reply.send(result);
            }
            RouterCommand::Stop { identifier, reply } => {
                let stopped = self.stop_monitoring(&identifier);
                let _ = reply.send(stopped);
            }
            RouterCommand::RegionSignal { identifier, state, at } => {
                self.on_raw_region_signal(&identifier, state, at);
            }
            RouterCommand::Ranging { identifier, samples, at } => {
                self.on_raw_ranging_update(&identifier, samples, at);
            }
            RouterCommand::RangingFailed { identifier, error } => {
                self.on_ranging_failed(&identifier, error);
            }
            RouterCommand::ListRegions { reply } => {
                let _ = reply.send(self.regions());
            }
            RouterCommand::SetNotifications { enabled } => {
                self.set_posts_local_notification(enabled);
            }
        }

        let latency_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.metrics.record_command_processed(latency_us);
    }

    /// Snapshot of active regions, ordered by identifier
    pub fn regions(&self) -> Vec<RegionSnapshot> {
        let mut regions: Vec<RegionSnapshot> =
            self.watches.values().map(RegionSnapshot::from).collect();
        regions.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        regions
    }

    /// Earliest deferred-transition deadline
    #[inline]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Enable or disable local notifications (no-op without a notifier)
    pub fn set_posts_local_notification(&mut self, enabled: bool) {
        if let Some(notifier) = self.notifier.as_mut() {
            notifier.set_enabled(enabled);
            info!(shard = %self.shard, enabled = %enabled, "local_notifications_toggled");
        }
    }

    /// Get current active region count
    #[inline]
    pub fn active_regions(&self) -> usize {
        self.watches.len()
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at.into()).await,
        None => std::future::pending::<()>().await,
    }
}
