//! Domain models - beacon identities, observations, and region state
//!
//! This module contains the canonical data types used throughout the system:
//! - `BeaconIdentity` - UUID/major/minor identity or region pattern
//! - `BeaconSample` - one raw ranging observation
//! - `RegionWatch` - per-region monitoring state owned by the router
//! - `BeaconEvent` - stable events delivered to subscribers
//! - `BeaconRecord` - flat key-value form of identities and samples

pub mod event;
pub mod identity;
pub mod record;
pub mod region;
pub mod sample;

// Re-export commonly used types at module level
pub use event::{epoch_ms, BeaconEvent, RegionEvent};
pub use identity::BeaconIdentity;
pub use record::{BeaconRecord, RecordError};
pub use region::{PendingTransition, RegionSnapshot, RegionState, RegionWatch, Subscription};
pub use sample::{BeaconSample, Proximity};
