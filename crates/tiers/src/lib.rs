//! Tier client contracts and reference-counted hot storage for the
//! Permafrost storage coordinator.
//!
//! The coordinator core consumes the hot and cold tiers only through the
//! traits defined here; concrete network clients are injected at daemon
//! startup. The one piece of real machinery in this crate is
//! [`HotStorage`], which layers per-user strong/staged pin reference
//! counting over a physical [`HotClient`].

pub mod error;
pub mod hot;
pub mod traits;

pub use error::{TierError, TierResult};
pub use hot::HotStorage;
pub use traits::{
    ColdStore, ColdStoreResult, FetchInfo, FetchParams, HotClient, NoopNotifier, Notifier,
    WalletManager,
};
