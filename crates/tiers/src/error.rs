//! Tier client and hot storage error types.

use thiserror::Error;

/// Errors from tier clients and the reference-counting hot storage.
#[derive(Debug, Error)]
pub enum TierError {
    #[error("cid isn't pinned by the user")]
    UnpinnedCid,

    #[error("replace source isn't pinned by the user")]
    ReplaceFromNotPinned,

    #[error("on-chain deal not found, may not exist or have been slashed")]
    OnChainDealNotFound,

    #[error("operation timed out")]
    Timeout,

    #[error("operation canceled")]
    Canceled,

    #[error("hot tier client error: {0}")]
    Hot(String),

    #[error("cold tier client error: {0}")]
    Cold(String),

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error(transparent)]
    Metadata(#[from] permafrost_metadata::MetadataError),
}

/// Result type for tier operations.
pub type TierResult<T> = std::result::Result<T, TierError>;
