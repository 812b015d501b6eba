//! In-memory hot client mock.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use permafrost_core::Cid;
use permafrost_tiers::{HotClient, TierError, TierResult};
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A hot client over process memory. "Network" content is seeded
/// explicitly; `fetch` only succeeds for seeded cids.
#[derive(Default)]
pub struct MemoryHotClient {
    inner: Mutex<Inner>,
    pub pin_calls: AtomicUsize,
    pub unpin_calls: AtomicUsize,
}

#[derive(Default)]
struct Inner {
    /// Data reachable through the content-addressed network.
    network: HashMap<Cid, Bytes>,
    /// Data present on the local node.
    local: HashMap<Cid, Bytes>,
    pinned: HashSet<Cid>,
}

impl MemoryHotClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make cid data reachable through the simulated network.
    pub fn seed_network(&self, data: Bytes) -> Cid {
        let cid = cid_of(&data);
        self.inner.lock().unwrap().network.insert(cid.clone(), data);
        cid
    }

    /// Drop local data and pin, simulating an external unpin + GC.
    pub fn evict_local(&self, cid: &Cid) {
        let mut inner = self.inner.lock().unwrap();
        inner.local.remove(cid);
        inner.pinned.remove(cid);
    }

    pub fn physically_pinned(&self, cid: &Cid) -> bool {
        self.inner.lock().unwrap().pinned.contains(cid)
    }
}

/// Deterministic cid for mock data.
pub fn cid_of(data: &[u8]) -> Cid {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    Cid::new(format!("mem-{:016x}", hasher.finish()))
}

#[async_trait]
impl HotClient for MemoryHotClient {
    async fn pin(&self, cid: &Cid) -> TierResult<u64> {
        self.pin_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let data = match inner.local.get(cid) {
            Some(data) => data.clone(),
            None => match inner.network.get(cid) {
                Some(data) => {
                    let data = data.clone();
                    inner.local.insert(cid.clone(), data.clone());
                    data
                }
                None => return Err(TierError::Hot(format!("cid {cid} not available"))),
            },
        };
        inner.pinned.insert(cid.clone());
        Ok(data.len() as u64)
    }

    async fn unpin(&self, cid: &Cid) -> TierResult<()> {
        self.unpin_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        inner.pinned.remove(cid);
        inner.local.remove(cid);
        Ok(())
    }

    async fn is_pinned(&self, cid: &Cid) -> TierResult<bool> {
        Ok(self.inner.lock().unwrap().pinned.contains(cid))
    }

    async fn stage(&self, data: Bytes) -> TierResult<Cid> {
        let cid = cid_of(&data);
        let mut inner = self.inner.lock().unwrap();
        inner.local.insert(cid.clone(), data.clone());
        inner.network.insert(cid.clone(), data);
        Ok(cid)
    }

    async fn fetch(&self, cid: &Cid) -> TierResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let Some(data) = inner.network.get(cid).cloned() else {
            return Err(TierError::Hot(format!("cid {cid} not found in network")));
        };
        inner.local.insert(cid.clone(), data);
        Ok(())
    }

    async fn get(&self, cid: &Cid) -> TierResult<Bytes> {
        let inner = self.inner.lock().unwrap();
        inner
            .local
            .get(cid)
            .cloned()
            .ok_or_else(|| TierError::Hot(format!("cid {cid} not stored locally")))
    }
}
