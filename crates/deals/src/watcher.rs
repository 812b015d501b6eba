//! Chain deal-update watcher.
//!
//! Owns exactly one subscription to the chain's global deal-update stream
//! and fans out per-proposal wake-up notifications to in-process
//! subscribers. Subscribers receive notifications, not deal snapshots;
//! they must re-query the chain for authoritative deal state.

use crate::error::{DealsError, DealsResult};
use crate::metrics;
use async_trait::async_trait;
use permafrost_core::{Cid, DealUpdate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Delay before rebuilding the upstream subscription after an unexpected
/// close.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Provider of the chain's global deal-update stream.
#[async_trait]
pub trait DealUpdateSource: Send + Sync + 'static {
    /// Open a fresh stream of deal updates. The receiver closing signals
    /// the stream ended; the watcher will re-subscribe.
    async fn updates(&self) -> DealsResult<mpsc::Receiver<DealUpdate>>;
}

type SubMap = HashMap<Cid, Vec<mpsc::Sender<()>>>;

/// Single long-lived subscriber with per-proposal fan-out and automatic
/// reconnection. The subscriber map is preserved across reconnects.
pub struct DealWatcher {
    subs: Arc<Mutex<SubMap>>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl DealWatcher {
    /// Start the watcher's background loop.
    pub fn new(source: Arc<dyn DealUpdateSource>) -> Self {
        let subs: Arc<Mutex<SubMap>> = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_loop(source, subs.clone(), cancel.clone()));

        Self {
            subs,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Register a sink for notifications about one proposal. Subscribing
    /// the same sink to the same proposal twice is an error.
    pub fn subscribe(&self, sink: mpsc::Sender<()>, proposal_cid: &Cid) -> DealsResult<()> {
        let mut subs = self.subs.lock().unwrap();
        let sinks = subs.entry(proposal_cid.clone()).or_default();
        if sinks.iter().any(|s| s.same_channel(&sink)) {
            return Err(DealsError::ActiveSubscription);
        }
        sinks.push(sink);
        tracing::debug!(%proposal_cid, "subscriber registered");
        Ok(())
    }

    /// Remove a sink's registration for a proposal.
    pub fn unsubscribe(&self, sink: &mpsc::Sender<()>, proposal_cid: &Cid) -> DealsResult<()> {
        let mut subs = self.subs.lock().unwrap();
        let Some(sinks) = subs.get_mut(proposal_cid) else {
            return Err(DealsError::SubscriptionNotFound);
        };
        let Some(idx) = sinks.iter().position(|s| s.same_channel(sink)) else {
            return Err(DealsError::SubscriptionNotFound);
        };
        sinks.swap_remove(idx);
        if sinks.is_empty() {
            subs.remove(proposal_cid);
        }
        Ok(())
    }

    /// Cancel the background loop and wait for it to exit. Dropping the
    /// registered sinks closes every subscriber's channel, which waiting
    /// consumers observe as an unexpected close.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.subs.lock().unwrap().clear();
    }
}

async fn run_loop(
    source: Arc<dyn DealUpdateSource>,
    subs: Arc<Mutex<SubMap>>,
    cancel: CancellationToken,
) {
    loop {
        let mut updates = match source.updates().await {
            Ok(updates) => updates,
            Err(err) => {
                tracing::warn!("rebuilding deal-update stream: {err}");
                if sleep_or_cancel(&cancel, RECONNECT_DELAY).await {
                    return;
                }
                continue;
            }
        };
        tracing::info!("deal watcher subscribed to chain updates");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                maybe = updates.recv() => match maybe {
                    Some(update) => notify(&subs, &update),
                    None => {
                        if cancel.is_cancelled() {
                            return;
                        }
                        metrics::DEAL_UPDATE_STREAM_FAILURES.inc();
                        tracing::warn!("deal-update stream closed unexpectedly");
                        if sleep_or_cancel(&cancel, RECONNECT_DELAY).await {
                            return;
                        }
                        break;
                    }
                },
            }
        }
    }
}

fn notify(subs: &Mutex<SubMap>, update: &DealUpdate) {
    let subs = subs.lock().unwrap();
    let Some(sinks) = subs.get(&update.proposal_cid) else {
        metrics::DEAL_UPDATES_UNTRACKED.inc();
        return;
    };
    metrics::DEAL_UPDATES_TRACKED.inc();
    for sink in sinks {
        if sink.try_send(()).is_err() {
            tracing::warn!(proposal = %update.proposal_cid, "skipping slow deal subscriber");
        }
    }
}

/// Sleep for `delay` unless canceled first; returns true when canceled.
async fn sleep_or_cancel(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}
