//! Services - region monitoring logic and state management
//!
//! - `router` - Region lifecycle and event routing (one instance per shard)
//! - `dispatch` - Router shards and the handle that feeds them
//! - `debouncer` - Enter/exit debounce decisions
//! - `nearest` - Nearest beacon selection
//! - `timer_wheel` - Deferred transition deadlines
//! - `notifier` - Local notifications for enter/exit
//! - `provider` - Ranging provider seam

pub mod debouncer;
pub mod dispatch;
pub mod nearest;
pub mod notifier;
pub mod provider;
pub mod router;
pub mod timer_wheel;

pub use dispatch::{spawn_router, RouterHandle};
pub use notifier::{Notifier, TemplateFormatter};
pub use provider::{MockRangingProvider, RangingProvider};
pub use router::{BeaconEventRouter, RouterCommand};
