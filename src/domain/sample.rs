//! Raw beacon observations

use crate::domain::identity::BeaconIdentity;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Coarse distance classification reported by the radio stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Proximity {
    Immediate,
    Near,
    Far,
    Unknown,
}

impl Proximity {
    /// Higher is closer; `Unknown` loses to every known bucket
    #[inline]
    pub fn rank(self) -> u8 {
        match self {
            Proximity::Immediate => 3,
            Proximity::Near => 2,
            Proximity::Far => 1,
            Proximity::Unknown => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Proximity::Immediate => "immediate",
            Proximity::Near => "near",
            Proximity::Far => "far",
            Proximity::Unknown => "unknown",
        }
    }
}

impl std::str::FromStr for Proximity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "immediate" => Ok(Proximity::Immediate),
            "near" => Ok(Proximity::Near),
            "far" => Ok(Proximity::Far),
            "unknown" => Ok(Proximity::Unknown),
            other => Err(format!("unknown proximity '{other}'")),
        }
    }
}

/// One raw observation of a beacon during a ranging cycle
#[derive(Debug, Clone, PartialEq)]
pub struct BeaconSample {
    pub identity: BeaconIdentity,
    /// Signal strength in dBm, more negative is weaker
    pub rssi: i32,
    pub proximity: Proximity,
    /// Estimated distance in meters; negative means the radio could not estimate
    pub accuracy: f64,
    pub observed_at: Instant,
}

impl BeaconSample {
    #[inline]
    pub fn new(
        identity: BeaconIdentity,
        rssi: i32,
        proximity: Proximity,
        accuracy: f64,
        observed_at: Instant,
    ) -> Self {
        Self { identity, rssi, proximity, accuracy, observed_at }
    }

    /// Accuracy usable for ordering, `None` when unknown
    #[inline]
    pub fn known_accuracy(&self) -> Option<f64> {
        (self.accuracy >= 0.0).then_some(self.accuracy)
    }
}
