//! Tier client contracts consumed by the coordinator core.
//!
//! Concrete clients (an IPFS node behind a pinning API, a Filecoin node
//! with market access, a wallet backend) live outside this repository and
//! are injected at daemon startup. Cancellation and timeouts are applied
//! by the caller around these futures.

use crate::error::TierResult;
use async_trait::async_trait;
use bytes::Bytes;
use permafrost_core::{Cid, DealError, DealUpdate, FilConfig, JobId, NotificationConfig};

/// Physical client of the hot tier's content-addressed blob network.
///
/// Implementations are expected to make `pin`/`unpin` idempotent; the
/// reference-counting layer decides *when* to call them.
#[async_trait]
pub trait HotClient: Send + Sync + 'static {
    /// Pin a cid, pulling it from the network if needed. Returns the
    /// stored size in bytes.
    async fn pin(&self, cid: &Cid) -> TierResult<u64>;

    /// Unpin a cid. Unpinning an unpinned cid is a no-op.
    async fn unpin(&self, cid: &Cid) -> TierResult<()>;

    /// Whether the cid is physically pinned.
    async fn is_pinned(&self, cid: &Cid) -> TierResult<bool>;

    /// Add raw data to the node without pinning; returns its cid.
    async fn stage(&self, data: Bytes) -> TierResult<Cid>;

    /// Pull cid data from the content-addressed network without pinning.
    async fn fetch(&self, cid: &Cid) -> TierResult<()>;

    /// Read back stored cid data.
    async fn get(&self, cid: &Cid) -> TierResult<Bytes>;
}

/// Result of starting cold-tier deals for a cid.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ColdStoreResult {
    /// Proposals accepted by their miners and now unfolding on-chain.
    pub started: Vec<Cid>,
    /// Proposals rejected before starting.
    pub rejected: Vec<DealError>,
    /// Padded piece size accounted for payment.
    pub size: u64,
}

/// Parameters of a cold-tier retrieval.
#[derive(Clone, Debug, PartialEq)]
pub struct FetchParams {
    pub payload_cid: Cid,
    pub piece_cid: Option<Cid>,
    pub wallet_addr: String,
    pub miners: Vec<String>,
    pub max_price: u64,
    /// Traversal selector; empty retrieves the whole DAG.
    pub selector: String,
}

/// Result of a cold-tier retrieval.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FetchInfo {
    pub retrieved_miner: String,
    pub funds_spent: u64,
    pub size: u64,
}

/// Client of the cold tier's decentralized storage market.
#[async_trait]
pub trait ColdStore: Send + Sync + 'static {
    /// Propose deals for a cid per the given config. Miner selection is
    /// the client's concern; the config carries the filters.
    async fn store(&self, cid: &Cid, cfg: &FilConfig) -> TierResult<ColdStoreResult>;

    /// Authoritative chain state of a proposal. Returns
    /// `OnChainDealNotFound` if the deal doesn't exist on-chain anymore.
    async fn deal_state(&self, proposal_cid: &Cid) -> TierResult<DealUpdate>;

    /// Whether a proposal's deal is currently active on-chain.
    async fn is_deal_active(&self, proposal_cid: &Cid) -> TierResult<bool> {
        use crate::error::TierError;
        match self.deal_state(proposal_cid).await {
            Ok(update) => Ok(update.state == permafrost_core::DealState::Active),
            Err(TierError::OnChainDealNotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Current chain epoch.
    async fn current_epoch(&self) -> TierResult<u64>;

    /// Retrieve data back from the market into the hot tier's blobstore.
    async fn fetch(&self, params: &FetchParams) -> TierResult<FetchInfo>;
}

/// Wallet capabilities consumed by the coordinator. Key storage is the
/// implementation's concern.
#[async_trait]
pub trait WalletManager: Send + Sync + 'static {
    async fn new_address(&self, kind: &str) -> TierResult<String>;

    async fn balance(&self, addr: &str) -> TierResult<u128>;

    /// Send funds; returns the message cid.
    async fn send_fil(&self, from: &str, to: &str, amount: u128) -> TierResult<Cid>;

    async fn sign(&self, addr: &str, message: &[u8]) -> TierResult<Vec<u8>>;

    async fn verify(&self, addr: &str, message: &[u8], signature: &[u8]) -> TierResult<bool>;
}

/// Sink for job lifecycle notifications.
#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    /// Associate notification targets with a job at creation time.
    async fn register_job(&self, job_id: &JobId, notifications: &[NotificationConfig]);

    /// Deliver an event to the given targets. Delivery is best-effort.
    async fn alert(&self, event: &str, notifications: &[NotificationConfig]);
}

/// A notifier that drops everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn register_job(&self, _job_id: &JobId, _notifications: &[NotificationConfig]) {}

    async fn alert(&self, _event: &str, _notifications: &[NotificationConfig]) {}
}
