//! Core domain types and shared logic for the Permafrost storage coordinator.
//!
//! This crate defines the canonical data model used across all other crates:
//! - User, job, retrieval, and content identifiers
//! - Declarative storage configurations and their validation
//! - Storage and retrieval jobs with their lifecycle statuses
//! - Per-cid storage info (hot and cold state)
//! - Deal records journaled for every proposal and retrieval
//! - Chain-side deal update snapshots

pub mod action;
pub mod config;
pub mod deal;
pub mod error;
pub mod ids;
pub mod info;
pub mod job;
pub mod pin;
pub mod records;

pub use action::{RetrievalAction, StorageAction};
pub use config::{
    ColdConfig, FilConfig, HotConfig, IpfsConfig, NotificationConfig, RenewConfig, SchedulerConfig,
    StorageConfig,
};
pub use deal::{DealState, DealUpdate};
pub use error::{Error, Result};
pub use ids::{Cid, JobId, RetrievalId, UserId};
pub use info::{ColdInfo, FilInfo, FilStorage, HotInfo, IpfsHotInfo, RetrievalInfo, StorageInfo};
pub use job::{DealError, Job, JobStatus, LogEntry, RetrievalJob};
pub use pin::{PinEntry, PinnedCid};
pub use records::{DealRecordsFilter, RetrievalDealInfo, RetrievalDealRecord, StorageDealRecord};

/// Minimum deal duration accepted by the cold tier, in epochs (~180 days).
pub const MIN_DEAL_DURATION: i64 = 518_400;

/// Expected duration between two consecutive chain epochs.
pub const AVG_BLOCK_TIME: std::time::Duration = std::time::Duration::from_secs(30);

/// Default upper bound on waiting for a started deal to reach a terminal
/// on-chain state before declaring it failed.
pub const DEFAULT_DEAL_FINALITY_TIMEOUT: std::time::Duration =
    std::time::Duration::from_secs(10 * 60);
