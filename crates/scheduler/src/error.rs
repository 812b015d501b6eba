//! Scheduler and coordinator error types.

use thiserror::Error;

/// Errors surfaced by the scheduler and the coordinator API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("cid already has a stored config, use the override flag")]
    MustOverride,

    #[error("can't remove cid, disable it from hot and cold storage first")]
    ActiveInStorage,

    #[error("hot storage is disabled for the cid")]
    HotStorageDisabled,

    #[error("provided replaced cid isn't managed")]
    ReplacedCidNotFound,

    #[error("job is already in a terminal status")]
    JobAlreadyFinal,

    #[error("operation timed out")]
    Timeout,

    #[error("operation canceled")]
    Canceled,

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error(transparent)]
    Core(#[from] permafrost_core::Error),

    #[error(transparent)]
    Metadata(#[from] permafrost_metadata::MetadataError),

    #[error(transparent)]
    Tier(#[from] permafrost_tiers::TierError),

    #[error(transparent)]
    Deals(#[from] permafrost_deals::DealsError),
}

/// Result type for scheduler operations.
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
