//! Per-region monitoring state

use crate::domain::identity::BeaconIdentity;
use serde::Serialize;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Inside/outside state of a monitored region
///
/// Raw provider signals are expressed as the state they ask for:
/// "entered" is `Inside`, "exited" is `Outside`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionState {
    Outside,
    Inside,
}

impl RegionState {
    #[inline]
    pub fn from_inside(inside: bool) -> Self {
        if inside {
            RegionState::Inside
        } else {
            RegionState::Outside
        }
    }

    #[inline]
    pub fn is_inside(self) -> bool {
        self == RegionState::Inside
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionState::Outside => "outside",
            RegionState::Inside => "inside",
        }
    }
}

impl std::str::FromStr for RegionState {
    type Err = String;

    /// Accepts both signal names (enter/exit) and state names (inside/outside)
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "enter" | "entered" | "inside" => Ok(RegionState::Inside),
            "exit" | "exited" | "outside" => Ok(RegionState::Outside),
            other => Err(format!("unknown region state '{other}'")),
        }
    }
}

/// Handle returned by the ranging provider when a region is watched
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pub id: Uuid,
    pub identifier: String,
}

impl Subscription {
    pub fn new(identifier: &str) -> Self {
        Self { id: Uuid::now_v7(), identifier: identifier.to_string() }
    }
}

/// A deferred transition waiting for the debounce interval to elapse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTransition {
    pub target: RegionState,
    pub scheduled_at: Instant,
}

/// State of one actively monitored region
#[derive(Debug, Clone)]
pub struct RegionWatch {
    pub identifier: String,
    pub identity: BeaconIdentity,
    pub monitoring_interval: Duration,
    pub currently_inside: bool,
    pub last_transition_at: Option<Instant>,
    pub nearest: Option<BeaconIdentity>,
    pub pending: Option<PendingTransition>,
    pub subscription: Subscription,
}

impl RegionWatch {
    /// New watch, always starting outside
    pub fn new(
        identifier: &str,
        identity: BeaconIdentity,
        monitoring_interval: Duration,
        subscription: Subscription,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            identity,
            monitoring_interval,
            currently_inside: false,
            last_transition_at: None,
            nearest: None,
            pending: None,
            subscription,
        }
    }

    #[inline]
    pub fn state(&self) -> RegionState {
        RegionState::from_inside(self.currently_inside)
    }

    /// Record an emitted transition
    #[inline]
    pub(crate) fn apply_transition(&mut self, target: RegionState, now: Instant) {
        self.currently_inside = target.is_inside();
        self.last_transition_at = Some(now);
        self.pending = None;
    }
}

/// Read-only view of a watch for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionSnapshot {
    pub identifier: String,
    pub identity: String,
    pub state: RegionState,
    pub nearest: Option<String>,
    pub monitoring_interval_ms: u64,
    pub pending: Option<RegionState>,
}

impl From<&RegionWatch> for RegionSnapshot {
    fn from(watch: &RegionWatch) -> Self {
        Self {
            identifier: watch.identifier.clone(),
            identity: watch.identity.to_string(),
            state: watch.state(),
            nearest: watch.nearest.map(|n| n.to_string()),
            monitoring_interval_ms: u64::try_from(watch.monitoring_interval.as_millis())
                .unwrap_or(u64::MAX),
            pending: watch.pending.map(|p| p.target),
        }
    }
}
