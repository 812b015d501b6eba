//! In-process development tiers.
//!
//! `permafrostd` runs against these when no real tier clients are wired
//! in: an in-memory content-addressed hot node and a cold market that
//! activates every proposal after a short delay. Production deployments
//! embed the coordinator crates and inject real clients instead.

use async_trait::async_trait;
use bytes::Bytes;
use permafrost_core::{Cid, DealState, DealUpdate, FilConfig};
use permafrost_deals::{DealUpdateSource, DealsResult};
use permafrost_tiers::{
    ColdStore, ColdStoreResult, FetchInfo, FetchParams, HotClient, TierError, TierResult,
};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// In-memory hot node; data staged here is the only data reachable.
#[derive(Default)]
pub struct DevHotClient {
    inner: Mutex<DevHotState>,
}

#[derive(Default)]
struct DevHotState {
    blobs: HashMap<Cid, Bytes>,
    pinned: HashSet<Cid>,
}

#[async_trait]
impl HotClient for DevHotClient {
    async fn pin(&self, cid: &Cid) -> TierResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(data) = inner.blobs.get(cid).cloned() else {
            return Err(TierError::Hot(format!("cid {cid} not available")));
        };
        inner.pinned.insert(cid.clone());
        Ok(data.len() as u64)
    }

    async fn unpin(&self, cid: &Cid) -> TierResult<()> {
        self.inner.lock().unwrap().pinned.remove(cid);
        Ok(())
    }

    async fn is_pinned(&self, cid: &Cid) -> TierResult<bool> {
        Ok(self.inner.lock().unwrap().pinned.contains(cid))
    }

    async fn stage(&self, data: Bytes) -> TierResult<Cid> {
        let digest = Sha256::digest(&data);
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        let cid = Cid::new(format!("dev{hex}"));
        self.inner.lock().unwrap().blobs.insert(cid.clone(), data);
        Ok(cid)
    }

    async fn fetch(&self, cid: &Cid) -> TierResult<()> {
        let inner = self.inner.lock().unwrap();
        if inner.blobs.contains_key(cid) {
            Ok(())
        } else {
            Err(TierError::Hot(format!("cid {cid} not found in network")))
        }
    }

    async fn get(&self, cid: &Cid) -> TierResult<Bytes> {
        self.inner
            .lock()
            .unwrap()
            .blobs
            .get(cid)
            .cloned()
            .ok_or_else(|| TierError::Hot(format!("cid {cid} not stored")))
    }
}

/// Cold market that accepts every proposal and activates it after one
/// simulated sealing delay.
pub struct DevColdStore {
    deals: Arc<Mutex<HashMap<Cid, DealUpdate>>>,
    updates: mpsc::Sender<DealUpdate>,
    sealing_delay: Duration,
    epoch: Mutex<u64>,
}

/// Dev deal-update stream fed by [`DevColdStore`].
pub struct DevUpdateSource {
    rx: Mutex<Option<mpsc::Receiver<DealUpdate>>>,
}

impl DevColdStore {
    pub fn new(sealing_delay: Duration) -> (Self, DevUpdateSource) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                deals: Arc::new(Mutex::new(HashMap::new())),
                updates: tx,
                sealing_delay,
                epoch: Mutex::new(1_000),
            },
            DevUpdateSource {
                rx: Mutex::new(Some(rx)),
            },
        )
    }
}

#[async_trait]
impl DealUpdateSource for DevUpdateSource {
    async fn updates(&self) -> DealsResult<mpsc::Receiver<DealUpdate>> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| permafrost_deals::DealsError::Source("stream already taken".into()))
    }
}

#[async_trait]
impl ColdStore for DevColdStore {
    async fn store(&self, cid: &Cid, cfg: &FilConfig) -> TierResult<ColdStoreResult> {
        let epoch = *self.epoch.lock().unwrap();
        let mut started = Vec::new();
        for replica in 0..cfg.rep_factor {
            let miner = cfg
                .trusted_miners
                .get(replica)
                .cloned()
                .unwrap_or_else(|| format!("t0{}", 1000 + replica));
            if cfg.excluded_miners.contains(&miner) {
                continue;
            }
            let proposal = Cid::new(format!("proposal-{cid}-{miner}-{epoch}"));
            let sealing = DealUpdate {
                proposal_cid: proposal.clone(),
                state: DealState::Sealing,
                miner,
                piece_cid: Cid::new(format!("piece-{cid}")),
                size: 1 << 20,
                price_per_epoch: cfg.max_price,
                start_epoch: epoch,
                duration: cfg.deal_min_duration,
                deal_id: epoch + replica as u64,
                activation_epoch: 0,
                message: String::new(),
            };
            self.deals
                .lock()
                .unwrap()
                .insert(proposal.clone(), sealing.clone());
            started.push(proposal);

            let deals = self.deals.clone();
            let updates = self.updates.clone();
            let delay = self.sealing_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let mut activated = sealing;
                activated.state = DealState::Active;
                activated.activation_epoch = activated.start_epoch as i64 + 1;
                deals
                    .lock()
                    .unwrap()
                    .insert(activated.proposal_cid.clone(), activated.clone());
                let _ = updates.send(activated).await;
            });
        }
        Ok(ColdStoreResult {
            started,
            rejected: Vec::new(),
            size: 1 << 20,
        })
    }

    async fn deal_state(&self, proposal_cid: &Cid) -> TierResult<DealUpdate> {
        self.deals
            .lock()
            .unwrap()
            .get(proposal_cid)
            .cloned()
            .ok_or(TierError::OnChainDealNotFound)
    }

    async fn current_epoch(&self) -> TierResult<u64> {
        Ok(*self.epoch.lock().unwrap())
    }

    async fn fetch(&self, params: &FetchParams) -> TierResult<FetchInfo> {
        Ok(FetchInfo {
            retrieved_miner: params.miners.first().cloned().unwrap_or_default(),
            funds_spent: 0,
            size: 0,
        })
    }
}
