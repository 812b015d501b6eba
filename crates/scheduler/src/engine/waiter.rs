//! Waiting on started deals.
//!
//! Each started proposal is watched through a deal-watcher subscription
//! combined with periodic chain polling, bounded by the process-wide
//! finality timeout. Every proposal gets a pending journal record at the
//! start of the wait and a final one when it terminates.

use super::Engine;
use crate::joblog::LogContext;
use permafrost_core::job::unix_nanos_now;
use permafrost_core::{
    AVG_BLOCK_TIME, Cid, DealError, DealState, DealUpdate, FilStorage, StorageDealRecord,
};
use permafrost_metadata::DealRecordRepo;
use permafrost_tiers::TierError;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(crate) const ERR_WATCHING_TIMEOUT: &str = "watching timeout";
pub(crate) const ERR_WATCHING_UNEXPECTED_CLOSE: &str = "watching unexpected closing";
pub(crate) const ERR_WATCHING_CANCELED: &str = "watching canceled";

impl Engine {
    /// Await terminal states for a batch of proposals concurrently.
    pub(crate) async fn wait_for_deals(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        cid: &Cid,
        wallet_addr: &str,
        proposals: &[Cid],
    ) -> (Vec<FilStorage>, Vec<DealError>) {
        self.log.append(ctx, "Watching deals unfold...").await;

        let waits = proposals
            .iter()
            .map(|proposal| self.wait_for_deal(token, ctx, cid, wallet_addr, proposal));
        let results = futures::future::join_all(waits).await;

        let mut ok = Vec::new();
        let mut failed = Vec::new();
        for result in results {
            match result {
                Ok(deal) => ok.push(deal),
                Err(err) => failed.push(err),
            }
        }
        (ok, failed)
    }

    /// Await the terminal state of one proposal.
    ///
    /// Terminal mapping: active on-chain yields the deal's `FilStorage`;
    /// a terminal failure, disappearance from the chain, the finality
    /// timeout, or the watcher closing yield a `DealError`.
    pub(crate) async fn wait_for_deal(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        cid: &Cid,
        wallet_addr: &str,
        proposal: &Cid,
    ) -> Result<FilStorage, DealError> {
        let mut record = StorageDealRecord {
            root_cid: cid.clone(),
            addr: wallet_addr.to_string(),
            time: OffsetDateTime::now_utc().unix_timestamp(),
            pending: true,
            err_msg: String::new(),
            deal_info: unknown_update(proposal),
            data_transfer_start: 0,
            data_transfer_end: 0,
            sealing_start: 0,
            sealing_end: 0,
            updated_at: unix_nanos_now(),
        };
        if let Err(err) = self.store.put_storage_deal(&record).await {
            tracing::error!("journaling pending deal record: {err}");
        }

        // Keep only a weak handle so the watcher holds the sole strong
        // sender; its close drops the channel and we observe it below.
        let (sink, mut notifications) = mpsc::channel::<()>(1);
        let weak_sink = sink.downgrade();
        let mut _poll_only_keepalive = None;
        if let Err(err) = self.watcher.subscribe(sink, proposal) {
            tracing::warn!(%proposal, "deal-watcher subscription failed, polling only: {err}");
            // Fall back to pure polling with a channel that never closes.
            let (keepalive, replacement) = mpsc::channel::<()>(1);
            _poll_only_keepalive = Some(keepalive);
            notifications = replacement;
        }

        let deadline = tokio::time::Instant::now() + self.deal_finality_timeout;
        let mut last_state: Option<DealState> = None;
        let outcome = loop {
            match self.cold.deal_state(proposal).await {
                Ok(update) => {
                    if update.state == DealState::Active {
                        break Ok(update);
                    }
                    if update.state.is_terminal_failure() {
                        let message = if update.message.is_empty() {
                            format!("deal reached terminal state {}", update.state)
                        } else {
                            update.message.clone()
                        };
                        break Err(deal_error(proposal, &update.miner, message));
                    }
                    if last_state != Some(update.state) {
                        last_state = Some(update.state);
                        record.deal_info = update.clone();
                        if let Err(err) = self.store.put_storage_deal(&record).await {
                            tracing::error!("updating pending deal record: {err}");
                        }
                        self.log
                            .append(
                                ctx,
                                format!(
                                    "Deal with miner {} changed state to {}.",
                                    update.miner, update.state
                                ),
                            )
                            .await;
                    }
                }
                Err(TierError::OnChainDealNotFound) => {
                    break Err(deal_error(proposal, "", "deal not found on-chain".to_string()));
                }
                Err(err) => {
                    // Transient chain error; keep polling until the
                    // deadline decides.
                    tracing::warn!(%proposal, "querying deal state: {err}");
                }
            }

            tokio::select! {
                _ = token.cancelled() => {
                    break Err(deal_error(proposal, "", ERR_WATCHING_CANCELED.to_string()));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    break Err(deal_error(proposal, "", ERR_WATCHING_TIMEOUT.to_string()));
                }
                notification = notifications.recv() => {
                    if notification.is_none() {
                        break Err(deal_error(
                            proposal,
                            "",
                            ERR_WATCHING_UNEXPECTED_CLOSE.to_string(),
                        ));
                    }
                    // Notified: re-query immediately for authoritative state.
                }
                _ = tokio::time::sleep(AVG_BLOCK_TIME) => {}
            }
        };

        if let Some(sink) = weak_sink.upgrade() {
            let _ = self.watcher.unsubscribe(&sink, proposal);
        }

        match outcome {
            Ok(update) => {
                self.log
                    .append(
                        ctx,
                        format!(
                            "Deal {} with miner {} is active on-chain.",
                            update.deal_id, update.miner
                        ),
                    )
                    .await;
                record.pending = false;
                record.deal_info = update.clone();
                if let Err(err) = self.store.put_storage_deal(&record).await {
                    tracing::error!("journaling final deal record: {err}");
                }
                Ok(FilStorage {
                    proposal_cid: update.proposal_cid,
                    piece_cid: update.piece_cid,
                    deal_id: update.deal_id,
                    miner: update.miner,
                    duration: update.duration,
                    start_epoch: update.start_epoch,
                    activation_epoch: update.activation_epoch,
                    epoch_price: update.price_per_epoch,
                    renewed: false,
                })
            }
            Err(failure) if failure.message == ERR_WATCHING_CANCELED => {
                // The deal may still complete on-chain; leave the pending
                // record and the started-deals trail for a later resume.
                Err(failure)
            }
            Err(failure) => {
                self.log
                    .append(
                        ctx,
                        format!(
                            "Deal proposal {proposal} with miner {} failed: {}",
                            failure.miner, failure.message
                        ),
                    )
                    .await;
                if let Err(err) = self.store.error_pending_deal(&record, &failure.message).await {
                    tracing::error!("journaling failed deal record: {err}");
                }
                Err(failure)
            }
        }
    }
}

fn deal_error(proposal: &Cid, miner: &str, message: String) -> DealError {
    DealError {
        proposal_cid: Some(proposal.clone()),
        miner: miner.to_string(),
        message,
    }
}

fn unknown_update(proposal: &Cid) -> DealUpdate {
    DealUpdate {
        proposal_cid: proposal.clone(),
        state: DealState::Unknown,
        miner: String::new(),
        piece_cid: Cid::new(""),
        size: 0,
        price_per_epoch: 0,
        start_epoch: 0,
        duration: 0,
        deal_id: 0,
        activation_epoch: 0,
        message: String::new(),
    }
}
