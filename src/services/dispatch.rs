//! Router shards and the handle that feeds them
//!
//! Each identifier hashes to exactly one shard, a tokio task owning its own
//! `BeaconEventRouter`. All work for an identifier is therefore serialized,
//! while different identifiers can be processed in parallel.
//!
//! Control operations (start, stop, list) wait for the shard's reply.
//! Ranging cycles use `try_send`: when a shard is full the cycle is dropped
//! with a rate-limited warning instead of stalling the ingest. Region
//! signals and failures carry state, so they travel on a separate unbounded
//! per-shard queue that the shard drains first and never drops.

use crate::domain::event::epoch_ms;
use crate::domain::identity::BeaconIdentity;
use crate::domain::region::{RegionSnapshot, RegionState};
use crate::domain::sample::BeaconSample;
use crate::error::{BeaconError, ProviderError};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::EventSender;
use crate::services::notifier::Notifier;
use crate::services::provider::RangingProvider;
use crate::services::router::{clock_now, BeaconEventRouter, RouterCommand};
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Minimum spacing between ingest drop warnings
const DROP_WARN_INTERVAL_MS: u64 = 1000;

/// Shard owning `identifier` among `shards` shards
#[inline]
pub fn shard_index(identifier: &str, shards: usize) -> usize {
    let mut hasher = FxHasher::default();
    identifier.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

/// Both queues into one shard
#[derive(Clone)]
struct ShardSender {
    commands: mpsc::Sender<RouterCommand>,
    signals: mpsc::UnboundedSender<RouterCommand>,
}

/// Cloneable front-end to the router shards
#[derive(Clone)]
pub struct RouterHandle {
    shards: Arc<[ShardSender]>,
    metrics: Arc<Metrics>,
    default_interval: Duration,
    last_drop_warn_ms: Arc<AtomicU64>,
}

impl RouterHandle {
    #[inline]
    fn shard(&self, identifier: &str) -> &ShardSender {
        &self.shards[shard_index(identifier, self.shards.len())]
    }

    /// Number of router shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Interval used when a caller does not pick one
    pub fn default_interval(&self) -> Duration {
        self.default_interval
    }

    async fn request<T>(
        &self,
        identifier: &str,
        make: impl FnOnce(oneshot::Sender<T>) -> RouterCommand,
    ) -> Result<T, BeaconError> {
        let (reply, rx) = oneshot::channel();
        self.shard(identifier).commands.send(make(reply)).await.map_err(|_| BeaconError::RouterUnavailable)?;
        rx.await.map_err(|_| BeaconError::RouterUnavailable)
    }

    /// Begin monitoring `identity` under `identifier`
    pub async fn start_monitoring(
        &self,
        identifier: &str,
        identity: BeaconIdentity,
        interval: Duration,
    ) -> Result<(), BeaconError> {
        identity.validate()?;
        let identifier_owned = identifier.to_string();
        self.request(identifier, |reply| RouterCommand::Start {
            identifier: identifier_owned,
            identity,
            interval,
            reply,
        })
        .await?
    }

    /// Begin monitoring from textual identity parts
    pub async fn start_monitoring_uuid(
        &self,
        identifier: &str,
        uuid: &str,
        major: Option<u16>,
        minor: Option<u16>,
        interval: Duration,
    ) -> Result<(), BeaconError> {
        let identity = BeaconIdentity::parse(uuid, major, minor)?;
        self.start_monitoring(identifier, identity, interval).await
    }

    /// Stop monitoring `identifier`; `Ok(false)` if it was not monitored
    ///
    /// Once this returns, no event for `identifier` will be emitted.
    pub async fn stop_monitoring(&self, identifier: &str) -> Result<bool, BeaconError> {
        let identifier_owned = identifier.to_string();
        self.request(identifier, |reply| RouterCommand::Stop { identifier: identifier_owned, reply })
            .await
    }

    /// Snapshot of all active regions across shards, ordered by identifier
    pub async fn regions(&self) -> Result<Vec<RegionSnapshot>, BeaconError> {
        let mut all = Vec::new();
        for shard in self.shards.iter() {
            let (reply, rx) = oneshot::channel();
            shard
                .commands
                .send(RouterCommand::ListRegions { reply })
                .await
                .map_err(|_| BeaconError::RouterUnavailable)?;
            all.extend(rx.await.map_err(|_| BeaconError::RouterUnavailable)?);
        }
        all.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(all)
    }

    /// Enable or disable local notifications on every shard
    pub async fn set_posts_local_notification(&self, enabled: bool) -> Result<(), BeaconError> {
        for shard in self.shards.iter() {
            shard
                .commands
                .send(RouterCommand::SetNotifications { enabled })
                .await
                .map_err(|_| BeaconError::RouterUnavailable)?;
        }
        Ok(())
    }

    /// Forward a raw enter/exit signal, stamped now
    ///
    /// Never dropped; returns false only if the router has shut down.
    pub fn region_signal(&self, identifier: &str, state: RegionState) -> bool {
        let cmd = RouterCommand::RegionSignal {
            identifier: identifier.to_string(),
            state,
            at: clock_now(),
        };
        self.deliver(identifier, cmd)
    }

    /// Forward a raw ranging cycle, stamped now
    ///
    /// Returns false if the cycle was dropped.
    pub fn ranging_update(&self, identifier: &str, samples: Vec<BeaconSample>) -> bool {
        let cmd =
            RouterCommand::Ranging { identifier: identifier.to_string(), samples, at: clock_now() };
        self.offer(identifier, cmd)
    }

    /// Forward a provider failure for a region; never dropped
    pub fn ranging_failed(&self, identifier: &str, error: ProviderError) -> bool {
        let cmd = RouterCommand::RangingFailed { identifier: identifier.to_string(), error };
        self.deliver(identifier, cmd)
    }

    fn deliver(&self, identifier: &str, cmd: RouterCommand) -> bool {
        self.metrics.record_ingest_received();

        if self.shard(identifier).signals.send(cmd).is_err() {
            debug!(identifier = %identifier, "router_closed");
            return false;
        }
        true
    }

    fn offer(&self, identifier: &str, cmd: RouterCommand) -> bool {
        self.metrics.record_ingest_received();

        match self.shard(identifier).commands.try_send(cmd) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.metrics.record_ingest_dropped();
                let now = epoch_ms();
                let last = self.last_drop_warn_ms.load(Ordering::Relaxed);
                if now.saturating_sub(last) >= DROP_WARN_INTERVAL_MS
                    && self
                        .last_drop_warn_ms
                        .compare_exchange(last, now, Ordering::Relaxed, Ordering::Relaxed)
                        .is_ok()
                {
                    warn!(
                        identifier = %identifier,
                        dropped_total = %self.metrics.ingest_dropped(),
                        "router_signal_dropped"
                    );
                }
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(identifier = %identifier, "router_closed");
                false
            }
        }
    }
}

/// Spawn the router shards
///
/// Returns the handle (for producers) and the shard tasks. The tasks end
/// when every clone of the handle has been dropped.
pub fn spawn_router(
    config: &Config,
    provider: Arc<dyn RangingProvider>,
    events: EventSender,
    notifier: Option<Notifier>,
    metrics: Arc<Metrics>,
) -> (RouterHandle, Vec<JoinHandle<()>>) {
    let shard_count = config.router_shards().max(1);
    let mut senders = Vec::with_capacity(shard_count);
    let mut tasks = Vec::with_capacity(shard_count);

    for shard in 0..shard_count {
        let (tx, rx) = mpsc::channel(config.command_buffer().max(1));
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let mut router = BeaconEventRouter::new(provider.clone(), events.clone(), metrics.clone())
            .with_shard(shard);
        if let Some(notifier) = &notifier {
            router = router.with_notifier(notifier.clone());
        }
        tasks.push(tokio::spawn(async move { router.run(rx, signals_rx).await }));
        senders.push(ShardSender { commands: tx, signals: signals_tx });
    }

    info!(
        shards = %shard_count,
        command_buffer = %config.command_buffer(),
        default_interval_ms = %config.default_monitoring_interval().as_millis(),
        "router_spawned"
    );

    let handle = RouterHandle {
        shards: senders.into(),
        metrics,
        default_interval: config.default_monitoring_interval(),
        last_drop_warn_ms: Arc::new(AtomicU64::new(0)),
    };
    (handle, tasks)
}
