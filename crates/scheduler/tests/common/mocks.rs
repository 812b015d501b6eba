//! Mock tier clients for scheduler tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use permafrost_core::{Cid, DealError, DealState, DealUpdate, FilConfig};
use permafrost_deals::{DealUpdateSource, DealsResult};
use permafrost_tiers::{
    ColdStore, ColdStoreResult, FetchInfo, FetchParams, HotClient, TierError, TierResult,
};
use std::collections::{HashMap, HashSet};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// In-memory hot client. "Network" content is seeded explicitly; pinning
/// unseeded cids fails like an unreachable cid would.
#[derive(Default)]
pub struct MockHotClient {
    inner: Mutex<HotState>,
    pub pin_calls: AtomicUsize,
}

#[derive(Default)]
struct HotState {
    network: HashMap<Cid, Bytes>,
    local: HashMap<Cid, Bytes>,
    pinned: HashSet<Cid>,
}

impl MockHotClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seed_network(&self, data: Bytes) -> Cid {
        let cid = cid_of(&data);
        self.inner.lock().unwrap().network.insert(cid.clone(), data);
        cid
    }

    /// Drop local data and pin, simulating an external unpin + GC.
    pub fn evict(&self, cid: &Cid) {
        let mut inner = self.inner.lock().unwrap();
        inner.local.remove(cid);
        inner.network.remove(cid);
        inner.pinned.remove(cid);
    }

    pub fn physically_pinned(&self, cid: &Cid) -> bool {
        self.inner.lock().unwrap().pinned.contains(cid)
    }
}

pub fn cid_of(data: &[u8]) -> Cid {
    let mut hasher = DefaultHasher::new();
    data.hash(&mut hasher);
    Cid::new(format!("mock-{:016x}", hasher.finish()))
}

#[async_trait]
impl HotClient for MockHotClient {
    async fn pin(&self, cid: &Cid) -> TierResult<u64> {
        self.pin_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let data = match inner.local.get(cid).or_else(|| inner.network.get(cid)) {
            Some(data) => data.clone(),
            None => return Err(TierError::Hot(format!("cid {cid} not available"))),
        };
        inner.local.insert(cid.clone(), data.clone());
        inner.pinned.insert(cid.clone());
        Ok(data.len() as u64)
    }

    async fn unpin(&self, cid: &Cid) -> TierResult<()> {
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

/// What the mock market does with new proposals.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreMode {
    /// Proposals activate immediately.
    Activate,
    /// Proposals stay sealing until `activate`/`fail_deal` is called.
    Seal,
    /// Every proposal is rejected before starting.
    RejectAll,
}

struct ColdState {
    mode: StoreMode,
    deals: HashMap<Cid, DealUpdate>,
    epoch: u64,
    /// Miners whose proposals fail terminally right after starting.
    failing_miners: HashSet<String>,
    /// Payload served by `fetch`, if any.
    fetch_data: Option<Bytes>,
    fetch_fails: bool,
}

/// Scriptable cold market. Proposals carry deterministic ids; deal state
/// is served from an in-memory chain view the test can mutate.
pub struct MockColdStore {
    state: Mutex<ColdState>,
    hot: Arc<MockHotClient>,
    updates: Mutex<Option<mpsc::Sender<DealUpdate>>>,
    next_deal_id: AtomicU64,
    pub store_calls: AtomicUsize,
}

/// Deal-update stream handing its receiver to the watcher once.
pub struct MockUpdateSource {
    rx: Mutex<Option<mpsc::Receiver<DealUpdate>>>,
}

#[async_trait]
impl DealUpdateSource for MockUpdateSource {
    async fn updates(&self) -> DealsResult<mpsc::Receiver<DealUpdate>> {
        self.rx
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| permafrost_deals::DealsError::Source("stream exhausted".into()))
    }
}

impl MockColdStore {
    pub fn new(hot: Arc<MockHotClient>) -> (Arc<Self>, Arc<MockUpdateSource>) {
        let (tx, rx) = mpsc::channel(64);
        let cold = Arc::new(Self {
            state: Mutex::new(ColdState {
                mode: StoreMode::Activate,
                deals: HashMap::new(),
                epoch: 1_000,
                failing_miners: HashSet::new(),
                fetch_data: None,
                fetch_fails: false,
            }),
            hot,
            updates: Mutex::new(Some(tx)),
            next_deal_id: AtomicU64::new(1),
            store_calls: AtomicUsize::new(0),
        });
        let source = Arc::new(MockUpdateSource {
            rx: Mutex::new(Some(rx)),
        });
        (cold, source)
    }

    pub fn set_mode(&self, mode: StoreMode) {
        self.state.lock().unwrap().mode = mode;
    }

    pub fn set_epoch(&self, epoch: u64) {
        self.state.lock().unwrap().epoch = epoch;
    }

    pub fn fail_miner(&self, miner: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_miners
            .insert(miner.to_string());
    }

    pub fn set_fetch_data(&self, data: Bytes) {
        self.state.lock().unwrap().fetch_data = Some(data);
    }

    pub fn set_fetch_fails(&self, fails: bool) {
        self.state.lock().unwrap().fetch_fails = fails;
    }

    /// Install a deal directly in the mock chain view.
    pub fn seed_deal(&self, update: DealUpdate) {
        self.state
            .lock()
            .unwrap()
            .deals
            .insert(update.proposal_cid.clone(), update);
    }

    /// All proposals the market has seen.
    pub fn proposals(&self) -> Vec<Cid> {
        self.state.lock().unwrap().deals.keys().cloned().collect()
    }

    /// Activate a sealing deal and push the update into the watcher
    /// stream.
    pub async fn activate(&self, proposal: &Cid) {
        let update = {
            let mut state = self.state.lock().unwrap();
            let Some(update) = state.deals.get_mut(proposal) else {
                panic!("unknown proposal {proposal}");
            };
            update.state = DealState::Active;
            update.activation_epoch = update.start_epoch as i64 + 1;
            update.clone()
        };
        self.push_update(update).await;
    }

    /// Fail a sealing deal terminally and push the update.
    pub async fn fail_deal(&self, proposal: &Cid, message: &str) {
        let update = {
            let mut state = self.state.lock().unwrap();
            let Some(update) = state.deals.get_mut(proposal) else {
                panic!("unknown proposal {proposal}");
            };
            update.state = DealState::Error;
            update.message = message.to_string();
            update.clone()
        };
        self.push_update(update).await;
    }

    async fn push_update(&self, update: DealUpdate) {
        let tx = self.updates.lock().unwrap().clone();
        if let Some(tx) = tx {
            let _ = tx.send(update).await;
        }
    }
}

#[async_trait]
impl ColdStore for MockColdStore {
    async fn store(&self, cid: &Cid, cfg: &FilConfig) -> TierResult<ColdStoreResult> {
        self.store_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();

        if state.mode == StoreMode::RejectAll {
            let rejected = (0..cfg.rep_factor)
                .map(|i| DealError {
                    proposal_cid: None,
                    miner: format!("t0{}", 1000 + i),
                    message: "ask rejected".to_string(),
                })
                .collect();
            return Ok(ColdStoreResult {
                started: Vec::new(),
                rejected,
                size: 0,
            });
        }

        let mut started = Vec::new();
        let mut picked = 0usize;
        let mut candidate = 0usize;
        while picked < cfg.rep_factor {
            let miner = match cfg.trusted_miners.get(picked) {
                Some(miner) => miner.clone(),
                None => {
                    let miner = format!("t0{}", 1000 + candidate);
                    candidate += 1;
                    if cfg.excluded_miners.contains(&miner) {
                        continue;
                    }
                    miner
                }
            };
            picked += 1;

            let deal_id = self.next_deal_id.fetch_add(1, Ordering::SeqCst);
            let proposal = Cid::new(format!("prop-{cid}-{miner}-{deal_id}"));
            let failing = state.failing_miners.contains(&miner);
            let state_now = match (state.mode, failing) {
                (_, true) => DealState::Error,
                (StoreMode::Activate, _) => DealState::Active,
                (StoreMode::Seal, _) => DealState::Sealing,
                (StoreMode::RejectAll, _) => unreachable!(),
            };
            let update = DealUpdate {
                proposal_cid: proposal.clone(),
                state: state_now,
                miner: miner.clone(),
                piece_cid: Cid::new(format!("piece-{cid}")),
                size: 1 << 20,
                price_per_epoch: 42,
                start_epoch: state.epoch,
                duration: cfg.deal_min_duration,
                deal_id,
                activation_epoch: if state_now == DealState::Active {
                    state.epoch as i64 + 1
                } else {
                    0
                },
                message: if failing {
                    "mock deal failure".to_string()
                } else {
                    String::new()
                },
            };
            state.deals.insert(proposal.clone(), update);
            started.push(proposal);
        }

        Ok(ColdStoreResult {
            started,
            rejected: Vec::new(),
            size: 1 << 20,
        })
    }

    async fn deal_state(&self, proposal_cid: &Cid) -> TierResult<DealUpdate> {
        self.state
            .lock()
            .unwrap()
            .deals
            .get(proposal_cid)
            .cloned()
            .ok_or(TierError::OnChainDealNotFound)
    }

    async fn current_epoch(&self) -> TierResult<u64> {
        Ok(self.state.lock().unwrap().epoch)
    }

    async fn fetch(&self, params: &FetchParams) -> TierResult<FetchInfo> {
        let (fails, data) = {
            let state = self.state.lock().unwrap();
            (state.fetch_fails, state.fetch_data.clone())
        };
        if fails {
            return Err(TierError::Cold("no providers to retrieve the data".into()));
        }
        let Some(data) = data else {
            return Err(TierError::Cold("no retrievable data configured".into()));
        };
        let size = data.len() as u64;
        // Make the payload reachable in the hot tier, like a market
        // client sharing the node's blockstore would.
        let seeded = self.hot.seed_network(data);
        assert_eq!(
            seeded, params.payload_cid,
            "fetched data must hash to the requested payload cid"
        );
        Ok(FetchInfo {
            retrieved_miner: params
                .miners
                .first()
                .cloned()
                .unwrap_or_else(|| "t01000".to_string()),
            funds_spent: 7,
            size,
        })
    }
}
