//! Persistent job intents.
//!
//! Actions are written together with their job and survive crashes, so the
//! reconciliation engine can resume interrupted work. They are never
//! mutated after creation.

use crate::config::StorageConfig;
use crate::ids::{Cid, RetrievalId, UserId};
use serde::{Deserialize, Serialize};

/// Intent of a storage job: reconcile `cid` against `config`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StorageAction {
    pub user_id: UserId,
    pub cid: Cid,
    pub config: StorageConfig,
    /// When set, the job replaces this previously-managed cid.
    pub replaced_cid: Option<Cid>,
}

/// Intent of a retrieval job: pull data back from the cold tier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalAction {
    pub user_id: UserId,
    pub retrieval_id: RetrievalId,
    pub payload_cid: Cid,
    pub piece_cid: Cid,
    /// Traversal selector forwarded to the cold client.
    pub selector: String,
    pub miners: Vec<String>,
    pub wallet_addr: String,
    pub max_price: u64,
}
