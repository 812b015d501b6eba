//! Deal records manager and chain deal-watcher for the Permafrost
//! storage coordinator.

pub mod error;
pub mod metrics;
pub mod records;
pub mod watcher;

pub use error::{DealsError, DealsResult};
pub use records::DealRecords;
pub use watcher::{DealUpdateSource, DealWatcher, RECONNECT_DELAY};
