//! Beacon identity: UUID plus optional major/minor filter

use crate::error::IdentityError;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Length of the canonical hyphenated UUID text
const UUID_TEXT_LEN: usize = 36;

/// UUID/major/minor identity of a beacon or a region pattern
///
/// A region may leave `major` (and then `minor`) absent to match every
/// beacon of the UUID. An observed beacon always has both set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BeaconIdentity {
    pub uuid: Uuid,
    pub major: Option<u16>,
    pub minor: Option<u16>,
}

impl BeaconIdentity {
    /// Parse and validate a region identity
    pub fn parse(uuid: &str, major: Option<u16>, minor: Option<u16>) -> Result<Self, IdentityError> {
        let identity = Self { uuid: parse_uuid(uuid)?, major, minor };
        identity.validate()?;
        Ok(identity)
    }

    /// Identity of a concrete observed beacon
    #[inline]
    pub fn observed(uuid: Uuid, major: u16, minor: u16) -> Self {
        Self { uuid, major: Some(major), minor: Some(minor) }
    }

    /// Check the wildcard invariant: minor requires major
    pub fn validate(&self) -> Result<(), IdentityError> {
        if self.major.is_none() && self.minor.is_some() {
            return Err(IdentityError::MinorWithoutMajor);
        }
        Ok(())
    }

    /// Canonical lowercase hyphenated UUID text
    #[inline]
    pub fn uuid_string(&self) -> String {
        self.uuid.hyphenated().to_string()
    }

    /// True if both major and minor are set
    #[inline]
    pub fn is_concrete(&self) -> bool {
        self.major.is_some() && self.minor.is_some()
    }

    /// Registration-time matching: absent fields act as wildcards
    pub fn matches(&self, observed: &BeaconIdentity) -> bool {
        self.uuid == observed.uuid
            && self.major.map_or(true, |m| observed.major == Some(m))
            && self.minor.map_or(true, |m| observed.minor == Some(m))
    }
}

impl Ord for BeaconIdentity {
    fn cmp(&self, other: &Self) -> Ordering {
        // Uuid orders by bytes, which matches lowercase hex text order
        self.uuid
            .cmp(&other.uuid)
            .then_with(|| self.major.cmp(&other.major))
            .then_with(|| self.minor.cmp(&other.minor))
    }
}

impl PartialOrd for BeaconIdentity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BeaconIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uuid.hyphenated())?;
        match (self.major, self.minor) {
            (Some(major), Some(minor)) => write!(f, "/{major}/{minor}"),
            (Some(major), None) => write!(f, "/{major}/*"),
            _ => write!(f, "/*/*"),
        }
    }
}

/// Parse the 36-character hyphenated UUID form, any case
pub fn parse_uuid(text: &str) -> Result<Uuid, IdentityError> {
    let trimmed = text.trim();
    if trimmed.len() != UUID_TEXT_LEN {
        return Err(IdentityError::MalformedUuid(text.to_string()));
    }
    Uuid::try_parse(trimmed).map_err(|_| IdentityError::MalformedUuid(text.to_string()))
}
