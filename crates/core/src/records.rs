//! Journaled deal and retrieval records.

use crate::deal::DealUpdate;
use crate::ids::Cid;
use serde::{Deserialize, Serialize};

/// Journal entry for a single storage-deal proposal.
///
/// Inserted pending with an empty `err_msg` when the proposal is created;
/// moved to final (possibly carrying an error message) when the deal
/// reaches a terminal state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageDealRecord {
    pub root_cid: Cid,
    /// Wallet address that paid for the deal.
    pub addr: String,
    /// Unix seconds of record creation; the listing sort key.
    pub time: i64,
    pub pending: bool,
    /// Non-empty iff the deal failed.
    #[serde(default)]
    pub err_msg: String,
    pub deal_info: DealUpdate,
    /// Unix seconds the data transfer started/ended, when known.
    #[serde(default)]
    pub data_transfer_start: i64,
    #[serde(default)]
    pub data_transfer_end: i64,
    /// Unix seconds sealing started/ended, when known.
    #[serde(default)]
    pub sealing_start: i64,
    #[serde(default)]
    pub sealing_end: i64,
    /// Unix nanoseconds of the last mutation; the sync cursor.
    pub updated_at: i64,
}

impl StorageDealRecord {
    /// A record is failed iff it carries an error message.
    pub fn is_failed(&self) -> bool {
        !self.err_msg.is_empty()
    }
}

/// Journal entry for a single retrieval deal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDealRecord {
    pub id: String,
    /// Wallet address that paid for the retrieval.
    pub addr: String,
    /// Unix seconds of record creation; the listing sort key.
    pub time: i64,
    pub deal_info: RetrievalDealInfo,
    #[serde(default)]
    pub data_transfer_start: i64,
    #[serde(default)]
    pub data_transfer_end: i64,
    /// Non-empty iff the retrieval failed.
    #[serde(default)]
    pub err_msg: String,
    /// Unix nanoseconds of the last mutation; the sync cursor.
    pub updated_at: i64,
}

impl RetrievalDealRecord {
    pub fn is_failed(&self) -> bool {
        !self.err_msg.is_empty()
    }
}

/// Retrieval parameters recorded with the deal.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDealInfo {
    pub root_cid: Cid,
    pub size: u64,
    pub min_price: u64,
    pub payment_interval: u64,
    pub miner: String,
    pub miner_peer_id: String,
}

/// Filter for listing storage or retrieval deal records.
#[derive(Clone, Debug, PartialEq)]
pub struct DealRecordsFilter {
    pub include_pending: bool,
    pub include_final: bool,
    /// When true, only failed records (`err_msg != ""`) are returned.
    pub include_failed: bool,
    /// Restrict to records paid from these wallet addresses. Empty means
    /// no filtering.
    pub from_addrs: Vec<String>,
    /// Restrict to records for these data cids. Empty means no filtering.
    pub data_cids: Vec<Cid>,
    /// Sort ascending by `time`; descending otherwise.
    pub ascending: bool,
}

impl Default for DealRecordsFilter {
    fn default() -> Self {
        Self {
            include_pending: true,
            include_final: true,
            include_failed: false,
            from_addrs: Vec::new(),
            data_cids: Vec::new(),
            ascending: false,
        }
    }
}
