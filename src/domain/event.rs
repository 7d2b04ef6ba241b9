//! Stable events produced by the router

use crate::domain::identity::BeaconIdentity;
use crate::domain::sample::BeaconSample;
use crate::error::ProviderError;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    let elapsed = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Enter or exit, as reported to notification hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionEvent {
    Enter,
    Exit,
}

impl RegionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegionEvent::Enter => "enter",
            RegionEvent::Exit => "exit",
        }
    }
}

/// Event delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum BeaconEvent {
    RegionEntered { identifier: String },
    RegionExited { identifier: String },
    NearestBeaconChanged { identifier: String, identity: BeaconIdentity },
    BeaconRanged { identifier: String, sample: BeaconSample },
    RangingFailed { identifier: String, error: ProviderError },
}

impl BeaconEvent {
    /// Identifier of the region the event belongs to
    pub fn identifier(&self) -> &str {
        match self {
            BeaconEvent::RegionEntered { identifier }
            | BeaconEvent::RegionExited { identifier }
            | BeaconEvent::NearestBeaconChanged { identifier, .. }
            | BeaconEvent::BeaconRanged { identifier, .. }
            | BeaconEvent::RangingFailed { identifier, .. } => identifier,
        }
    }

    /// Short event kind used in payloads and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            BeaconEvent::RegionEntered { .. } => "region_entered",
            BeaconEvent::RegionExited { .. } => "region_exited",
            BeaconEvent::NearestBeaconChanged { .. } => "nearest_changed",
            BeaconEvent::BeaconRanged { .. } => "beacon_ranged",
            BeaconEvent::RangingFailed { .. } => "ranging_failed",
        }
    }

    /// The enter/exit view of a region transition event
    pub fn region_event(&self) -> Option<RegionEvent> {
        match self {
            BeaconEvent::RegionEntered { .. } => Some(RegionEvent::Enter),
            BeaconEvent::RegionExited { .. } => Some(RegionEvent::Exit),
            _ => None,
        }
    }
}
