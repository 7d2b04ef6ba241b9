//! Flat key-value beacon record
//!
//! Used for the `region` entry of notification user info, for ranged
//! beacons in provider messages, and for `beacon_ranged` payloads:
//!
//! ```json
//! {"uuid":"e2c5...","identifier":"lobby","major":1,"minor":null,
//!  "accuracy":0.8,"proximity":"near","rssi":-61}
//! ```

use crate::domain::identity::{parse_uuid, BeaconIdentity};
use crate::domain::region::RegionWatch;
use crate::domain::sample::{BeaconSample, Proximity};
use crate::error::IdentityError;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use thiserror::Error;

/// Why a record could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error("beacon record is missing '{0}'")]
    MissingField(&'static str),
}

/// Accuracy written for an unknown distance
pub const UNKNOWN_ACCURACY: f64 = -1.0;

/// Plain record form of a beacon identity or observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconRecord {
    pub uuid: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub major: Option<u16>,
    #[serde(default)]
    pub minor: Option<u16>,
    #[serde(default)]
    pub accuracy: f64,
    #[serde(default = "default_proximity")]
    pub proximity: Proximity,
    #[serde(default)]
    pub rssi: i32,
}

fn default_proximity() -> Proximity {
    Proximity::Unknown
}

impl BeaconRecord {
    /// Record for an identity (no signal data)
    pub fn from_identity(identifier: &str, identity: &BeaconIdentity) -> Self {
        Self {
            uuid: identity.uuid_string(),
            identifier: identifier.to_string(),
            major: identity.major,
            minor: identity.minor,
            accuracy: 0.0,
            proximity: Proximity::Unknown,
            rssi: 0,
        }
    }

    /// Record for a monitored region
    pub fn from_region(watch: &RegionWatch) -> Self {
        Self::from_identity(&watch.identifier, &watch.identity)
    }

    /// Record for a ranged beacon
    ///
    /// Non-finite accuracy is written as -1 (unknown); JSON has no NaN.
    pub fn from_sample(identifier: &str, sample: &BeaconSample) -> Self {
        let accuracy = if sample.accuracy.is_finite() { sample.accuracy } else { UNKNOWN_ACCURACY };
        Self {
            uuid: sample.identity.uuid_string(),
            identifier: identifier.to_string(),
            major: sample.identity.major,
            minor: sample.identity.minor,
            accuracy,
            proximity: sample.proximity,
            rssi: sample.rssi,
        }
    }

    /// Decode the identity part, keeping wildcards
    pub fn to_identity(&self) -> Result<BeaconIdentity, RecordError> {
        Ok(BeaconIdentity::parse(&self.uuid, self.major, self.minor)?)
    }

    /// Decode an observation; major and minor must be concrete
    pub fn to_sample(&self, observed_at: Instant) -> Result<BeaconSample, RecordError> {
        let uuid = parse_uuid(&self.uuid)?;
        let major = self.major.ok_or(RecordError::MissingField("major"))?;
        let minor = self.minor.ok_or(RecordError::MissingField("minor"))?;
        Ok(BeaconSample::new(
            BeaconIdentity::observed(uuid, major, minor),
            self.rssi,
            self.proximity,
            self.accuracy,
            observed_at,
        ))
    }
}
