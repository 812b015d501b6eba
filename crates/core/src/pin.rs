//! Hot-tier pin references.

use crate::ids::{Cid, UserId};
use serde::{Deserialize, Serialize};

/// One user's reference on a pinned cid.
///
/// A staged pin is a weak reference: a cid whose entries are all staged is
/// eligible for GC once old enough. The physical hot tier keeps a cid
/// pinned iff at least one entry exists for it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinEntry {
    pub user_id: UserId,
    pub staged: bool,
    /// Unix seconds the entry was created or last refreshed.
    pub created_at: i64,
}

/// All pin references for one cid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PinnedCid {
    pub cid: Cid,
    pub pins: Vec<PinEntry>,
}

impl PinnedCid {
    /// True when every entry is a staged pin, making the cid GC-eligible.
    pub fn all_staged(&self) -> bool {
        !self.pins.is_empty() && self.pins.iter().all(|p| p.staged)
    }

    /// Creation time of the newest entry, or zero for an empty set.
    pub fn newest_entry_at(&self) -> i64 {
        self.pins.iter().map(|p| p.created_at).max().unwrap_or(0)
    }
}
