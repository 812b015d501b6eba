//! Chain-side deal state snapshots.
//!
//! Consumers of deal-watcher notifications must re-query the chain for the
//! authoritative state; these types carry what the chain reports.

use crate::ids::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Market state of a deal as reported by the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DealState {
    /// Proposal sent, not yet accepted.
    Proposed,
    /// Data transfer or sealing in progress.
    Sealing,
    /// Deal is active on-chain.
    Active,
    /// Miner rejected the proposal.
    Rejected,
    /// Deal is failing and will not become active.
    Failing,
    /// Deal errored terminally.
    Error,
    /// Deal was slashed.
    Slashed,
    /// Deal expired.
    Expired,
    /// State the coordinator doesn't interpret.
    Unknown,
}

impl DealState {
    /// Numeric id mirroring the market actor's state enumeration, kept in
    /// journaled records for external consumers.
    pub fn id(self) -> u64 {
        match self {
            DealState::Unknown => 0,
            DealState::Proposed => 1,
            DealState::Sealing => 2,
            DealState::Active => 3,
            DealState::Rejected => 4,
            DealState::Failing => 5,
            DealState::Error => 6,
            DealState::Slashed => 7,
            DealState::Expired => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DealState::Proposed => "StorageDealProposed",
            DealState::Sealing => "StorageDealSealing",
            DealState::Active => "StorageDealActive",
            DealState::Rejected => "StorageDealRejected",
            DealState::Failing => "StorageDealFailing",
            DealState::Error => "StorageDealError",
            DealState::Slashed => "StorageDealSlashed",
            DealState::Expired => "StorageDealExpired",
            DealState::Unknown => "StorageDealUnknown",
        }
    }

    /// True when the deal will never become active.
    pub fn is_terminal_failure(self) -> bool {
        matches!(
            self,
            DealState::Rejected
                | DealState::Failing
                | DealState::Error
                | DealState::Slashed
                | DealState::Expired
        )
    }
}

impl fmt::Display for DealState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deal snapshot from the chain's deal-update stream or a direct query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealUpdate {
    pub proposal_cid: Cid,
    pub state: DealState,
    pub miner: String,
    pub piece_cid: Cid,
    pub size: u64,
    pub price_per_epoch: u64,
    pub start_epoch: u64,
    pub duration: i64,
    pub deal_id: u64,
    /// Epoch the deal became active on-chain; zero until then.
    pub activation_epoch: i64,
    /// Free-form message carried by failing states.
    pub message: String,
}
