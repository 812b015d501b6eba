//! Deal renewal selection and execution.
//!
//! A proposal is a renewal candidate once it comes within the configured
//! threshold of its expiry epoch (`activation_epoch + duration`). Only as
//! many candidates as needed to restore the rep factor are renewed; a
//! renewed deal keeps its original miner.

use super::{Engine, checked};
use crate::error::{SchedulerError, SchedulerResult};
use crate::joblog::LogContext;
use permafrost_core::{DealError, FilStorage, StorageAction, StorageInfo};
use permafrost_metadata::StorageInfoRepo;
use tokio_util::sync::CancellationToken;

/// Proposals within the renewal threshold of expiry. Already-renewed
/// proposals and imported ones missing activation/duration data are
/// skipped.
pub(crate) fn select_renewable(
    proposals: &[FilStorage],
    threshold_epochs: i64,
    current_epoch: u64,
) -> Vec<FilStorage> {
    proposals
        .iter()
        .filter(|p| {
            !p.renewed
                && p.activation_epoch > 0
                && p.duration > 0
                && p.expiry_epoch() - threshold_epochs <= current_epoch as i64
        })
        .cloned()
        .collect()
}

/// How many renewable proposals actually need renewal to keep the rep
/// factor, given how many young (not-soon-expiring) deals exist.
pub(crate) fn renewal_count(total: usize, renewable: usize, rep_factor: usize) -> usize {
    let young = total - renewable;
    rep_factor.saturating_sub(young).min(renewable)
}

impl Engine {
    /// Step 5b: renew expiring proposals in place, eagerly persisting the
    /// updated info so later failures can't lose the new deals.
    pub(super) async fn execute_renewals(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        curr: &mut StorageInfo,
        action: &StorageAction,
        errors: &mut Vec<DealError>,
    ) -> SchedulerResult<()> {
        let fil_cfg = &action.config.cold.filecoin;
        self.log.append(ctx, "Checking deal renewals...").await;

        let current_epoch = checked(token, async { Ok(self.cold.current_epoch().await?) }).await?;
        let renewable = select_renewable(
            &curr.cold.filecoin.proposals,
            fil_cfg.renew.threshold_epochs,
            current_epoch,
        );
        let count = renewal_count(
            curr.cold.filecoin.proposals.len(),
            renewable.len(),
            fil_cfg.rep_factor,
        );
        if count == 0 {
            self.log.append(ctx, "No deals need renewal.").await;
            return Ok(());
        }
        self.log
            .append(ctx, format!("Renewing {count} expiring deals..."))
            .await;

        let mut renewed = 0usize;
        for old in renewable.into_iter().take(count) {
            match self.renew_deal(token, ctx, action, &old).await {
                Ok(new_proposal) => {
                    if let Some(entry) = curr
                        .cold
                        .filecoin
                        .proposals
                        .iter_mut()
                        .find(|p| p.proposal_cid == old.proposal_cid)
                    {
                        entry.renewed = true;
                    }
                    curr.cold.filecoin.proposals.push(new_proposal);
                    renewed += 1;
                }
                Err(SchedulerError::Canceled) => return Err(SchedulerError::Canceled),
                Err(err) => {
                    self.log
                        .append(
                            ctx,
                            format!(
                                "Deal renewal errored. Miner: {}, cause: {err}",
                                old.miner
                            ),
                        )
                        .await;
                    errors.push(DealError {
                        proposal_cid: Some(old.proposal_cid.clone()),
                        miner: old.miner.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }

        if renewed > 0 {
            // Later top-up work could still fail the job; persist the new
            // deals now so they aren't lost.
            curr.cold.enabled = true;
            self.store.put_storage_info(curr).await?;
            self.log
                .append(
                    ctx,
                    format!("A total of {renewed} new deals were created in the renewal process."),
                )
                .await;
        }
        self.log.append(ctx, "Deal renewal evaluated successfully.").await;
        Ok(())
    }

    /// Re-propose one expiring deal to its original miner.
    async fn renew_deal(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        action: &StorageAction,
        old: &FilStorage,
    ) -> SchedulerResult<FilStorage> {
        let mut cfg = action.config.cold.filecoin.clone();
        cfg.rep_factor = 1;
        cfg.trusted_miners = vec![old.miner.clone()];

        let res = checked(token, async {
            Ok(self.cold.store(&action.cid, &cfg).await?)
        })
        .await?;
        let Some(proposal) = res.started.first() else {
            let message = res
                .rejected
                .first()
                .map(|r| r.message.clone())
                .unwrap_or_else(|| "renewal proposal failed to start".to_string());
            return Err(SchedulerError::JobFailed(message));
        };

        match self
            .wait_for_deal(
                token,
                ctx,
                &action.cid,
                &action.config.cold.filecoin.wallet_addr,
                proposal,
            )
            .await
        {
            Ok(new_deal) => Ok(new_deal),
            Err(deal_error) => {
                if token.is_cancelled() {
                    return Err(SchedulerError::Canceled);
                }
                Err(SchedulerError::JobFailed(deal_error.message))
            }
        }
    }
}
