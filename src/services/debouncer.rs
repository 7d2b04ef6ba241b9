//! Region transition debouncing
//!
//! Collapses enter/exit flapping near a region boundary into one settled
//! transition per `monitoring_interval`:
//! - A signal matching the current state never emits
//! - The first change after a quiet interval emits immediately
//! - Changes inside the interval are deferred to `last_transition_at + interval`,
//!   keeping only the latest target (last write wins)
//! - When the deferred timer fires, it emits only if the target still differs
//!   from the live state

use crate::domain::region::{RegionState, RegionWatch};
use std::time::Instant;

/// Outcome of a raw enter/exit signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Emit the transition now
    EmitNow,
    /// Nothing to emit
    Suppress,
    /// Defer the transition until the given instant
    Reschedule(Instant),
}

/// Decide what to do with a raw signal for `watch` at `now`
pub fn decide(watch: &RegionWatch, signal: RegionState, now: Instant) -> Decision {
    if signal == watch.state() {
        return Decision::Suppress;
    }

    if watch.monitoring_interval.is_zero() {
        return Decision::EmitNow;
    }

    match watch.last_transition_at {
        None => Decision::EmitNow,
        Some(last) if now.saturating_duration_since(last) >= watch.monitoring_interval => {
            Decision::EmitNow
        }
        Some(last) => Decision::Reschedule(last + watch.monitoring_interval),
    }
}

/// Resolve a fired deferred transition
///
/// Returns the state to emit, or `None` when the pending target already
/// matches the live state (the net change was none). The pending transition
/// is consumed either way.
pub fn resolve(watch: &mut RegionWatch, now: Instant) -> Option<RegionState> {
    let pending = watch.pending.take()?;
    if pending.target == watch.state() {
        return None;
    }
    watch.apply_transition(pending.target, now);
    Some(pending.target)
}
