//! Per-(user, cid) storage state views.

use crate::ids::{Cid, JobId, RetrievalId, UserId};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Authoritative last-known storage state of a cid for a user.
///
/// Written only by the reconciliation engine on job success, or seeded by
/// an import; never rolled back by a failed job.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageInfo {
    pub user_id: UserId,
    /// Job that produced this view. May be empty if imported.
    pub job_id: JobId,
    pub cid: Cid,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    pub hot: HotInfo,
    pub cold: ColdInfo,
}

impl StorageInfo {
    /// Default view for a cid never reconciled before: both tiers disabled.
    pub fn new(user_id: UserId, cid: Cid) -> Self {
        Self {
            user_id,
            job_id: JobId::new(""),
            cid,
            created: OffsetDateTime::now_utc(),
            hot: HotInfo::default(),
            cold: ColdInfo::default(),
        }
    }
}

/// Hot-tier state of a cid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HotInfo {
    pub enabled: bool,
    pub size: u64,
    pub ipfs: IpfsHotInfo,
}

/// Pinning-network detail of hot storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IpfsHotInfo {
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
}

impl Default for IpfsHotInfo {
    fn default() -> Self {
        Self {
            created: OffsetDateTime::UNIX_EPOCH,
        }
    }
}

/// Cold-tier state of a cid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ColdInfo {
    pub enabled: bool,
    pub filecoin: FilInfo,
}

/// Deal-market state of a cid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilInfo {
    /// Payload cid of the deals.
    pub data_cid: Cid,
    /// Piece size accounted for payment; usually larger than the raw
    /// data size because of padding.
    pub size: u64,
    /// Known active deals for the data.
    pub proposals: Vec<FilStorage>,
}

/// One replica deal recorded in a cid's cold state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilStorage {
    pub proposal_cid: Cid,
    pub piece_cid: Cid,
    pub deal_id: u64,
    pub miner: String,
    pub duration: i64,
    pub start_epoch: u64,
    pub activation_epoch: i64,
    pub epoch_price: u64,
    /// True once the deal was renewed; a renewed deal may expire safely.
    #[serde(default)]
    pub renewed: bool,
}

impl FilStorage {
    /// Epoch at which the deal stops being active.
    pub fn expiry_epoch(&self) -> i64 {
        self.activation_epoch + self.duration
    }
}

/// Result of an executed cold-tier retrieval.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalInfo {
    pub id: RetrievalId,
    pub user_id: UserId,
    pub data_cid: Cid,
    pub total_paid: u64,
    pub miner: String,
    pub size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}
