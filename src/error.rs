//! Error types for beacon monitoring
//!
//! - `IdentityError` - malformed beacon identities (bad UUID, illegal wildcard)
//! - `ProviderError` - refusals and failures reported by the ranging provider
//! - `BeaconError` - everything `start_monitoring` and the router handle can return
//!
//! Numeric codes follow the beacon manager's error domain so radio bridges
//! and consumers can exchange them as plain integers.

use serde::Serialize;
use thiserror::Error;

/// Why a beacon identity was rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The UUID is not in the 36-character hyphenated textual form
    #[error("invalid beacon UUID '{0}': expected xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx")]
    MalformedUuid(String),

    /// A minor value was given without a major value
    #[error("invalid beacon region: minor is set but major is absent")]
    MinorWithoutMajor,
}

impl IdentityError {
    #[inline]
    pub fn error_code(&self) -> i32 {
        match self {
            Self::MalformedUuid(_) => -1100,
            Self::MinorWithoutMajor => -1101,
        }
    }
}

/// Failure reported by the ranging provider
///
/// Carried inside `RangingFailed` events, so it is `Clone` and serializable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderError {
    /// Region monitoring is not available on this platform/session
    #[error("beacon region monitoring is not available")]
    CannotMonitor,

    /// Ranging is not available on this platform/session
    #[error("beacon ranging is not available")]
    CannotRange,

    /// Location services are switched off
    #[error("location services are not enabled")]
    LocationServicesDisabled,

    /// The user denied location access
    #[error("location access denied")]
    AuthorizationDenied,

    /// Location access is restricted by policy
    #[error("location access restricted")]
    AuthorizationRestricted,

    /// The provider could not be reached
    #[error("provider transport error: {0}")]
    Transport(String),
}

impl ProviderError {
    /// Machine-readable code for bridges and event payloads
    #[inline]
    pub fn error_code(&self) -> i32 {
        match self {
            Self::CannotMonitor => -1001,
            Self::CannotRange => -1002,
            Self::Transport(_) => -1003,
            Self::LocationServicesDisabled => -100,
            Self::AuthorizationDenied => -101,
            Self::AuthorizationRestricted => -102,
        }
    }

    /// Map a code received from a radio bridge back to an error
    pub fn from_code(code: i32) -> Self {
        match code {
            -1001 => Self::CannotMonitor,
            -1002 => Self::CannotRange,
            -100 => Self::LocationServicesDisabled,
            -101 => Self::AuthorizationDenied,
            -102 => Self::AuthorizationRestricted,
            other => Self::Transport(format!("provider error code {other}")),
        }
    }

    #[inline]
    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Self::LocationServicesDisabled | Self::AuthorizationDenied | Self::AuthorizationRestricted
        )
    }
}

/// Error returned by monitoring operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BeaconError {
    // =========================================================================
    // CALLER ERRORS
    // =========================================================================
    /// The region identity is malformed
    #[error(transparent)]
    InvalidIdentity(#[from] IdentityError),

    /// The identifier is already being monitored
    #[error("region '{0}' is already being monitored")]
    DuplicateIdentifier(String),

    // =========================================================================
    // PROVIDER ERRORS
    // =========================================================================
    /// The provider cannot watch this region
    #[error("ranging provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Location services are switched off
    #[error("location services are not enabled")]
    LocationServicesDisabled,

    /// The user denied location access
    #[error("location access denied")]
    AuthorizationDenied,

    /// Location access is restricted by policy
    #[error("location access restricted")]
    AuthorizationRestricted,

    // =========================================================================
    // RUNTIME ERRORS
    // =========================================================================
    /// The router task is gone (shutdown or panic)
    #[error("beacon router is not running")]
    RouterUnavailable,
}

impl From<ProviderError> for BeaconError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::LocationServicesDisabled => Self::LocationServicesDisabled,
            ProviderError::AuthorizationDenied => Self::AuthorizationDenied,
            ProviderError::AuthorizationRestricted => Self::AuthorizationRestricted,
            other => Self::ProviderUnavailable(other.to_string()),
        }
    }
}

impl BeaconError {
    /// Returns `true` if the caller passed bad input
    #[inline]
    pub fn is_caller_error(&self) -> bool {
        matches!(self, Self::InvalidIdentity(_) | Self::DuplicateIdentifier(_))
    }

    /// Returns `true` if re-authorization by the platform layer may fix this
    #[inline]
    pub fn is_authorization_error(&self) -> bool {
        matches!(
            self,
            Self::LocationServicesDisabled | Self::AuthorizationDenied | Self::AuthorizationRestricted
        )
    }

    /// Machine-readable code for logs and API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidIdentity(IdentityError::MalformedUuid(_)) => "INVALID_UUID",
            Self::InvalidIdentity(IdentityError::MinorWithoutMajor) => "INVALID_BEACON_REGION",
            Self::DuplicateIdentifier(_) => "DUPLICATE_IDENTIFIER",
            Self::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            Self::LocationServicesDisabled => "LOCATION_SERVICES_NOT_ENABLED",
            Self::AuthorizationDenied => "LOCATION_SERVICES_DENIED",
            Self::AuthorizationRestricted => "LOCATION_SERVICES_RESTRICTED",
            Self::RouterUnavailable => "ROUTER_UNAVAILABLE",
        }
    }
}
