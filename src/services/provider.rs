//! Ranging provider seam
//!
//! The radio stack that detects beacon broadcasts is external. The router
//! only needs to register and unregister regions with it; raw signals come
//! back through the `RouterHandle`.

use crate::domain::identity::BeaconIdentity;
use crate::domain::region::Subscription;
use crate::error::ProviderError;
use parking_lot::Mutex;

/// Registration interface of the external ranging provider
pub trait RangingProvider: Send + Sync {
    /// Start monitoring and ranging `identity` under `identifier`
    fn watch(
        &self,
        identifier: &str,
        identity: &BeaconIdentity,
    ) -> Result<Subscription, ProviderError>;

    /// Stop a previous registration
    fn unwatch(&self, subscription: &Subscription);
}

/// In-memory provider for tests and offline runs
///
/// Records every registration and can be told to refuse the next ones.
#[derive(Debug, Default)]
pub struct MockRangingProvider {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    refuse_with: Option<ProviderError>,
    watched: Vec<(String, BeaconIdentity)>,
    unwatched: Vec<Subscription>,
}

impl MockRangingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent `watch` calls fail with `error` (`None` to accept again)
    pub fn refuse_with(&self, error: Option<ProviderError>) {
        self.state.lock().refuse_with = error;
    }

    /// Identifiers and identities registered so far
    pub fn watched(&self) -> Vec<(String, BeaconIdentity)> {
        self.state.lock().watched.clone()
    }

    /// Subscriptions released so far
    pub fn unwatched(&self) -> Vec<Subscription> {
        self.state.lock().unwatched.clone()
    }
}

impl RangingProvider for MockRangingProvider {
    fn watch(
        &self,
        identifier: &str,
        identity: &BeaconIdentity,
    ) -> Result<Subscription, ProviderError> {
        let mut state = self.state.lock();
        if let Some(err) = &state.refuse_with {
            return Err(err.clone());
        }
        state.watched.push((identifier.to_string(), *identity));
        Ok(Subscription::new(identifier))
    }

    fn unwatch(&self, subscription: &Subscription) {
        self.state.lock().unwatched.push(subscription.clone());
    }
}
