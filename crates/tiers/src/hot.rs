//! Reference-counted hot storage.
//!
//! Tracks strong and staged pins per (user, cid) on top of a physical
//! [`HotClient`]. The physical tier is pinned iff at least one entry
//! exists for the cid; a cid whose entries are all staged is eligible for
//! GC once old enough.

use crate::error::{TierError, TierResult};
use crate::traits::HotClient;
use bytes::Bytes;
use permafrost_core::{Cid, PinEntry, PinnedCid, UserId};
use permafrost_metadata::PinRepo;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::Mutex;

/// Hot storage with per-user reference counting.
///
/// All mutations run under a single lock, held across the physical client
/// call so a race between concurrent stage/pin/unpin for the same cid can
/// never leave the physical state and the in-memory counts inconsistent.
pub struct HotStorage {
    client: Arc<dyn HotClient>,
    repo: Arc<dyn PinRepo>,
    state: Mutex<HashMap<Cid, PinnedCid>>,
}

impl HotStorage {
    /// Build the storage, reloading persisted pin references.
    pub async fn new(client: Arc<dyn HotClient>, repo: Arc<dyn PinRepo>) -> TierResult<Self> {
        let mut state = HashMap::new();
        for pinned in repo.all_pins().await? {
            state.insert(pinned.cid.clone(), pinned);
        }
        Ok(Self {
            client,
            repo,
            state: Mutex::new(state),
        })
    }

    /// Add raw data and stage-pin it for the user. Returns the data's cid.
    pub async fn stage(&self, user_id: &UserId, data: Bytes) -> TierResult<Cid> {
        let mut state = self.state.lock().await;
        let cid = self.client.stage(data).await?;
        if !state.contains_key(&cid) {
            self.client.pin(&cid).await?;
        }
        self.add_staged_entry(&mut state, user_id, &cid).await?;
        Ok(cid)
    }

    /// Pull cid data from the content-addressed network and stage-pin it.
    /// Used when a cold-only config still needs local availability to
    /// build proposals.
    pub async fn stage_cid(&self, user_id: &UserId, cid: &Cid) -> TierResult<()> {
        let mut state = self.state.lock().await;
        self.client.fetch(cid).await?;
        if !state.contains_key(cid) {
            self.client.pin(cid).await?;
        }
        self.add_staged_entry(&mut state, user_id, cid).await
    }

    /// Strong-pin a cid for the user. Idempotent; a staged entry is
    /// promoted. Returns the stored size.
    pub async fn pin(&self, user_id: &UserId, cid: &Cid) -> TierResult<u64> {
        let mut state = self.state.lock().await;
        let size = self.client.pin(cid).await?;

        let mut pinned = state
            .get(cid)
            .cloned()
            .unwrap_or_else(|| PinnedCid {
                cid: cid.clone(),
                pins: Vec::new(),
            });
        let now = OffsetDateTime::now_utc().unix_timestamp();
        match pinned.pins.iter_mut().find(|p| &p.user_id == user_id) {
            Some(entry) => {
                if !entry.staged {
                    tracing::warn!(user = %user_id, %cid, "re-pinning an already pinned cid");
                }
                entry.staged = false;
                entry.created_at = now;
            }
            None => pinned.pins.push(PinEntry {
                user_id: user_id.clone(),
                staged: false,
                created_at: now,
            }),
        }
        self.persist(&mut state, pinned).await?;
        Ok(size)
    }

    /// Drop the user's entry for a cid; physically unpin when it was the
    /// last one. Returns `UnpinnedCid` if the user holds no entry.
    pub async fn unpin(&self, user_id: &UserId, cid: &Cid) -> TierResult<()> {
        let mut state = self.state.lock().await;
        self.unpin_locked(&mut state, user_id, cid).await
    }

    /// Pin `new_cid` and unpin `old_cid` for the user in one step. Fails
    /// with `ReplaceFromNotPinned` when the user holds no entry for the
    /// old cid. Returns the new cid's size.
    pub async fn replace(&self, user_id: &UserId, old_cid: &Cid, new_cid: &Cid) -> TierResult<u64> {
        let mut state = self.state.lock().await;
        let has_old = state
            .get(old_cid)
            .is_some_and(|p| p.pins.iter().any(|e| &e.user_id == user_id));
        if !has_old {
            return Err(TierError::ReplaceFromNotPinned);
        }

        let size = self.client.pin(new_cid).await?;
        let mut pinned = state
            .get(new_cid)
            .cloned()
            .unwrap_or_else(|| PinnedCid {
                cid: new_cid.clone(),
                pins: Vec::new(),
            });
        let now = OffsetDateTime::now_utc().unix_timestamp();
        match pinned.pins.iter_mut().find(|p| &p.user_id == user_id) {
            Some(entry) => {
                entry.staged = false;
                entry.created_at = now;
            }
            None => pinned.pins.push(PinEntry {
                user_id: user_id.clone(),
                staged: false,
                created_at: now,
            }),
        }
        self.persist(&mut state, pinned).await?;

        self.unpin_locked(&mut state, user_id, old_cid).await?;
        Ok(size)
    }

    /// Whether the user holds any entry (strong or staged) for the cid.
    pub async fn is_pinned(&self, user_id: &UserId, cid: &Cid) -> TierResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .get(cid)
            .is_some_and(|p| p.pins.iter().any(|e| &e.user_id == user_id)))
    }

    /// Snapshot of all pin references.
    pub async fn pinned_cids(&self) -> Vec<PinnedCid> {
        let state = self.state.lock().await;
        let mut all: Vec<PinnedCid> = state.values().cloned().collect();
        all.sort_by(|a, b| a.cid.cmp(&b.cid));
        all
    }

    /// Unpin every cid whose entries are all staged, whose newest entry
    /// predates `before` (unix seconds), and which isn't excluded.
    /// Returns the gc'd cids.
    pub async fn gc_staged(&self, exclude: &[Cid], before: i64) -> TierResult<Vec<Cid>> {
        let mut state = self.state.lock().await;
        let candidates: Vec<Cid> = state
            .values()
            .filter(|p| p.all_staged() && p.newest_entry_at() < before && !exclude.contains(&p.cid))
            .map(|p| p.cid.clone())
            .collect();

        let mut removed = Vec::with_capacity(candidates.len());
        for cid in candidates {
            self.client.unpin(&cid).await?;
            self.repo.delete_pins(&cid).await?;
            state.remove(&cid);
            tracing::info!(%cid, "gc'd staged cid");
            removed.push(cid);
        }
        Ok(removed)
    }

    /// Read back stored cid data.
    pub async fn get(&self, cid: &Cid) -> TierResult<Bytes> {
        self.client.get(cid).await
    }

    async fn unpin_locked(
        &self,
        state: &mut HashMap<Cid, PinnedCid>,
        user_id: &UserId,
        cid: &Cid,
    ) -> TierResult<()> {
        let Some(mut pinned) = state.get(cid).cloned() else {
            return Err(TierError::UnpinnedCid);
        };
        let Some(idx) = pinned.pins.iter().position(|e| &e.user_id == user_id) else {
            return Err(TierError::UnpinnedCid);
        };
        pinned.pins.swap_remove(idx);

        if pinned.pins.is_empty() {
            self.client.unpin(cid).await?;
        }
        self.persist(state, pinned).await
    }

    async fn add_staged_entry(
        &self,
        state: &mut HashMap<Cid, PinnedCid>,
        user_id: &UserId,
        cid: &Cid,
    ) -> TierResult<()> {
        let mut pinned = state
            .get(cid)
            .cloned()
            .unwrap_or_else(|| PinnedCid {
                cid: cid.clone(),
                pins: Vec::new(),
            });
        match pinned.pins.iter_mut().find(|p| &p.user_id == user_id) {
            // A strong pin wins over a re-stage; the cid stays un-GCable.
            Some(entry) if !entry.staged => return Ok(()),
            // Re-staging refreshes the timestamp so the pin survives
            // longer until the next GC.
            Some(entry) => entry.created_at = OffsetDateTime::now_utc().unix_timestamp(),
            None => pinned.pins.push(PinEntry {
                user_id: user_id.clone(),
                staged: true,
                created_at: OffsetDateTime::now_utc().unix_timestamp(),
            }),
        }
        self.persist(state, pinned).await
    }

    async fn persist(
        &self,
        state: &mut HashMap<Cid, PinnedCid>,
        pinned: PinnedCid,
    ) -> TierResult<()> {
        self.repo.put_pins(&pinned.cid, &pinned.pins).await?;
        if pinned.pins.is_empty() {
            state.remove(&pinned.cid);
        } else {
            state.insert(pinned.cid.clone(), pinned);
        }
        Ok(())
    }
}
