//! Command handlers for the BeaconEventRouter
//!
//! Each handler processes one kind of input, updating region state and
//! emitting stable events.

use super::BeaconEventRouter;
use crate::domain::event::{BeaconEvent, RegionEvent};
use crate::domain::identity::BeaconIdentity;
use crate::domain::region::{PendingTransition, RegionState, RegionWatch};
use crate::domain::sample::BeaconSample;
use crate::error::{BeaconError, ProviderError};
use crate::io::EventSender;
use crate::services::debouncer::{self, Decision};
use crate::services::nearest;
use crate::services::notifier::Notifier;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

impl BeaconEventRouter {
    /// Begin monitoring `identity` under `identifier`
    ///
    /// The new region starts outside. Provider refusals are returned as-is
    /// and never retried.
    pub fn start_monitoring(
        &mut self,
        identifier: &str,
        identity: BeaconIdentity,
        interval: Duration,
    ) -> Result<(), BeaconError> {
        identity.validate()?;

        if self.watches.contains_key(identifier) {
            debug!(identifier = %identifier, "monitoring_duplicate");
            return Err(BeaconError::DuplicateIdentifier(identifier.to_string()));
        }

        let subscription = self.provider.watch(identifier, &identity).map_err(|e| {
            warn!(identifier = %identifier, error = %e, code = %e.error_code(), "provider_watch_refused");
            BeaconError::from(e)
        })?;

        self.watches.insert(
            identifier.to_string(),
            RegionWatch::new(identifier, identity, interval, subscription),
        );
        self.metrics.region_started();

        info!(
            shard = %self.shard,
            identifier = %identifier,
            identity = %identity,
            interval_ms = %interval.as_millis(),
            "monitoring_started"
        );
        Ok(())
    }

    /// Begin monitoring from textual identity parts
    pub fn start_monitoring_uuid(
        &mut self,
        identifier: &str,
        uuid: &str,
        major: Option<u16>,
        minor: Option<u16>,
        interval: Duration,
    ) -> Result<(), BeaconError> {
        let identity = BeaconIdentity::parse(uuid, major, minor)?;
        self.start_monitoring(identifier, identity, interval)
    }

    /// Stop monitoring `identifier`
    ///
    /// Cancels any deferred transition before returning, so no further event
    /// for this identifier is emitted. Returns false if it was not monitored.
    pub fn stop_monitoring(&mut self, identifier: &str) -> bool {
        let Some(watch) = self.watches.remove(identifier) else {
            debug!(identifier = %identifier, "stop_unknown_region");
            return false;
        };

        if self.timers.cancel(identifier).is_some() {
            self.metrics.adjust_pending_timers(-1);
        }
        self.provider.unwatch(&watch.subscription);
        self.metrics.region_stopped();

        info!(
            shard = %self.shard,
            identifier = %identifier,
            state = %watch.state().as_str(),
            had_pending = %watch.pending.is_some(),
            "monitoring_stopped"
        );
        true
    }

    /// Handle a raw enter/exit signal
    pub fn on_raw_region_signal(&mut self, identifier: &str, state: RegionState, now: Instant) {
        // Deadlines that passed before this signal settle first
        self.fire_due_timers(now);
        self.metrics.record_region_signal();

        let Some(watch) = self.watches.get_mut(identifier) else {
            debug!(identifier = %identifier, state = %state.as_str(), "region_signal_ignored");
            self.metrics.record_unknown_region();
            return;
        };

        match debouncer::decide(watch, state, now) {
            Decision::EmitNow => {
                if self.timers.cancel(identifier).is_some() {
                    self.metrics.adjust_pending_timers(-1);
                }
                watch.apply_transition(state, now);
                emit_transition(&self.events, self.notifier.as_ref(), watch, state);
            }
            Decision::Suppress => {
                self.metrics.record_signal_suppressed();
                match watch.pending.as_mut() {
                    Some(pending) if pending.target != state => {
                        // Keeps the deadline; the timer settles to no change
                        pending.target = state;
                        debug!(
                            identifier = %identifier,
                            target = %state.as_str(),
                            "pending_transition_retargeted"
                        );
                    }
                    _ => {
                        debug!(identifier = %identifier, state = %state.as_str(), "region_signal_suppressed");
                    }
                }
            }
            Decision::Reschedule(at) => {
                watch.pending = Some(PendingTransition { target: state, scheduled_at: at });
                if self.timers.schedule(identifier, at).is_none() {
                    self.metrics.adjust_pending_timers(1);
                }
                self.metrics.record_transition_rescheduled();
                info!(
                    identifier = %identifier,
                    target = %state.as_str(),
                    delay_ms = %at.saturating_duration_since(now).as_millis(),
                    "transition_rescheduled"
                );
            }
        }
    }

    /// Handle one ranging cycle for a region
    ///
    /// Every sample is forwarded as `BeaconRanged`; a change of nearest
    /// identity follows as `NearestBeaconChanged`.
    pub fn on_raw_ranging_update(
        &mut self,
        identifier: &str,
        samples: Vec<BeaconSample>,
        now: Instant,
    ) {
        self.fire_due_timers(now);
        self.metrics.record_ranging_update(samples.len());

        let Some(watch) = self.watches.get_mut(identifier) else {
            debug!(identifier = %identifier, samples = %samples.len(), "ranging_update_ignored");
            self.metrics.record_unknown_region();
            return;
        };

        let changed = nearest::update(watch, &samples);

        for sample in samples {
            self.events
                .send(BeaconEvent::BeaconRanged { identifier: identifier.to_string(), sample });
        }

        if let Some(identity) = changed {
            info!(identifier = %identifier, nearest = %identity, "nearest_changed");
            self.events.send(BeaconEvent::NearestBeaconChanged {
                identifier: identifier.to_string(),
                identity,
            });
        }
    }

    /// Report a provider failure for a region; the watch stays intact
    pub fn on_ranging_failed(&mut self, identifier: &str, error: ProviderError) {
        if !self.watches.contains_key(identifier) {
            debug!(identifier = %identifier, error = %error, "ranging_failure_ignored");
            self.metrics.record_unknown_region();
            return;
        }

        warn!(
            identifier = %identifier,
            error = %error,
            code = %error.error_code(),
            "ranging_failed"
        );
        self.events.send(BeaconEvent::RangingFailed { identifier: identifier.to_string(), error });
    }

    /// Resolve every deferred transition due at `now`, in deadline order
    pub fn fire_due_timers(&mut self, now: Instant) {
        if self.timers.next_deadline().map_or(true, |at| at > now) {
            return;
        }

        for identifier in self.timers.take_due(now) {
            self.metrics.adjust_pending_timers(-1);

            let Some(watch) = self.watches.get_mut(&identifier) else {
                debug!(identifier = %identifier, "timer_for_unmonitored_region");
                continue;
            };

            match debouncer::resolve(watch, now) {
                Some(state) => {
                    self.metrics.record_deferred_fired(true);
                    emit_transition(&self.events, self.notifier.as_ref(), watch, state);
                }
                None => {
                    self.metrics.record_deferred_fired(false);
                    debug!(
                        identifier = %identifier,
                        state = %watch.state().as_str(),
                        "deferred_transition_dropped"
                    );
                }
            }
        }
    }
}

/// Emit the enter/exit event for a transition that was just applied
fn emit_transition(
    events: &EventSender,
    notifier: Option<&Notifier>,
    watch: &RegionWatch,
    state: RegionState,
) {
    let identifier = watch.identifier.clone();
    let (event, region_event) = match state {
        RegionState::Inside => (BeaconEvent::RegionEntered { identifier }, RegionEvent::Enter),
        RegionState::Outside => (BeaconEvent::RegionExited { identifier }, RegionEvent::Exit),
    };

    info!(identifier = %watch.identifier, event = %region_event.as_str(), "region_transition");
    events.send(event);

    if let Some(notifier) = notifier {
        notifier.notify(watch, region_event);
    }
}
