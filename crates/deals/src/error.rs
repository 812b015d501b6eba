//! Deals crate error types.

use thiserror::Error;

/// Errors from the deal watcher and records manager.
#[derive(Debug, Error)]
pub enum DealsError {
    #[error("sink is already subscribed to this proposal")]
    ActiveSubscription,

    #[error("subscription not found")]
    SubscriptionNotFound,

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("deal update source error: {0}")]
    Source(String),

    #[error(transparent)]
    Metadata(#[from] permafrost_metadata::MetadataError),
}

/// Result type for deals operations.
pub type DealsResult<T> = std::result::Result<T, DealsError>;
