//! Storage job reconciliation.

use super::{Engine, checked, checked_timeout};
use crate::error::{SchedulerError, SchedulerResult};
use crate::joblog::LogContext;
use permafrost_core::job::unix_nanos_now;
use permafrost_core::{
    Cid, ColdInfo, DealError, FilConfig, FilInfo, FilStorage, HotInfo, IpfsHotInfo, Job,
    RetrievalDealInfo, RetrievalDealRecord, StorageAction, StorageInfo, UserId,
};
use permafrost_metadata::{DealRecordRepo, StorageInfoRepo, TrackedConfigRepo};
use permafrost_tiers::FetchParams;
use std::time::Duration;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

impl Engine {
    /// Execute a storage job. An `Err` return means the job failed;
    /// proposal-level failures that didn't sink the job accumulate in
    /// `errors` either way.
    pub(crate) async fn execute_storage(
        &self,
        token: &CancellationToken,
        action: &StorageAction,
        job: &Job,
        errors: &mut Vec<DealError>,
    ) -> SchedulerResult<StorageInfo> {
        let ctx = LogContext::storage(&action.user_id, &action.cid).with_job(&job.id);

        let mut curr = self
            .refreshed_info(token, &ctx, &action.user_id, &action.cid)
            .await?;

        // A replaced cid stops being tracked for renewal/repair; its
        // records and storage info remain.
        if let Some(replaced) = &action.replaced_cid {
            self.store.remove_tracked(&action.user_id, replaced).await?;
        }

        self.log
            .append(&ctx, "Ensuring hot storage satisfies the configuration...")
            .await;
        curr.hot = self.execute_hot(token, &ctx, &curr, action).await?;
        self.log
            .append(&ctx, "Hot storage execution ran successfully.")
            .await;

        let cold = if action.config.cold.enabled {
            self.log
                .append(&ctx, "Ensuring cold storage satisfies the configuration...")
                .await;
            let cold = self.execute_cold(token, &ctx, &mut curr, action, errors).await?;
            self.log
                .append(&ctx, "Cold storage execution ran successfully.")
                .await;
            cold
        } else {
            self.log
                .append(
                    &ctx,
                    "Cold storage is disabled, existing deals will eventually expire.",
                )
                .await;
            curr.cold.clone()
        };

        // Hot disable runs last so cold reconciliation could still use
        // the locally available data.
        let hot = if !action.config.hot.enabled && curr.hot.enabled {
            checked(token, async {
                Ok(self.hot.unpin(&action.user_id, &action.cid).await?)
            })
            .await?;
            self.log
                .append(&ctx, "Cid successfully removed from hot storage.")
                .await;
            HotInfo::default()
        } else {
            curr.hot.clone()
        };

        Ok(StorageInfo {
            user_id: action.user_id.clone(),
            job_id: job.id.clone(),
            cid: action.cid.clone(),
            created: OffsetDateTime::now_utc(),
            hot,
            cold,
        })
    }

    /// Refresh the stored view of (user, cid) against the actual tiers:
    /// hot enablement from the ref counter, cold proposals dropped when
    /// their deal is no longer on-chain.
    async fn refreshed_info(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        user_id: &UserId,
        cid: &Cid,
    ) -> SchedulerResult<StorageInfo> {
        let mut info = self
            .store
            .get_storage_info(user_id, cid)
            .await?
            .unwrap_or_else(|| StorageInfo::new(user_id.clone(), cid.clone()));

        info.hot.enabled = self.hot.is_pinned(user_id, cid).await?;

        let proposals = std::mem::take(&mut info.cold.filecoin.proposals);
        for proposal in proposals {
            // Imported deals might lack a proposal cid; keep them as-is.
            if !proposal.proposal_cid.is_defined() {
                info.cold.filecoin.proposals.push(proposal);
                continue;
            }
            let active = checked(token, async {
                Ok(self.cold.is_deal_active(&proposal.proposal_cid).await?)
            })
            .await?;
            if active {
                info.cold.filecoin.proposals.push(proposal);
            } else {
                self.log
                    .append(
                        ctx,
                        format!(
                            "Proposal {} is no longer active on-chain, dropping it.",
                            proposal.proposal_cid
                        ),
                    )
                    .await;
            }
        }
        Ok(info)
    }

    /// Steps 3 and 4: satisfy the hot config, unfreezing from the cold
    /// tier when direct fetching fails and the config allows it, and
    /// implicitly staging data for cold-only configs.
    async fn execute_hot(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        curr: &StorageInfo,
        action: &StorageAction,
    ) -> SchedulerResult<HotInfo> {
        let cfg = &action.config.hot;
        let add_timeout = Duration::from_secs(cfg.ipfs.add_timeout_secs);

        if !cfg.enabled {
            // Cold-only configs still need the data locally available to
            // build proposals from.
            if action.config.cold.enabled {
                self.log
                    .append(ctx, "Staging data locally for cold storage...")
                    .await;
                checked_timeout(add_timeout, token, async {
                    Ok(self
                        .hot
                        .stage_cid(&action.user_id, &action.cid)
                        .await?)
                })
                .await
                .map_err(|err| match err {
                    SchedulerError::Canceled => SchedulerError::Canceled,
                    SchedulerError::Timeout => {
                        SchedulerError::JobFailed("staging data for cold storage timed out".into())
                    }
                    other => {
                        SchedulerError::JobFailed(format!("staging data for cold storage: {other}"))
                    }
                })?;
            }
            return Ok(curr.hot.clone());
        }

        if curr.hot.enabled {
            self.log.append(ctx, "No actions needed in hot storage.").await;
            return Ok(curr.hot.clone());
        }

        let pinned = match &action.replaced_cid {
            Some(old_cid) => {
                self.log
                    .append(ctx, format!("Replacing previous pin {old_cid}..."))
                    .await;
                checked_timeout(add_timeout, token, async {
                    Ok(self
                        .hot
                        .replace(&action.user_id, old_cid, &action.cid)
                        .await?)
                })
                .await
            }
            None => {
                checked_timeout(add_timeout, token, async {
                    Ok(self.hot.pin(&action.user_id, &action.cid).await?)
                })
                .await
            }
        };

        let size = match pinned {
            Ok(size) => size,
            Err(SchedulerError::Canceled) => return Err(SchedulerError::Canceled),
            Err(err) => {
                self.log
                    .append(ctx, "Direct fetching from the hot tier network wasn't possible.")
                    .await;
                if !cfg.allow_unfreeze || curr.cold.filecoin.proposals.is_empty() {
                    self.log
                        .append(
                            ctx,
                            "Unfreeze is disabled or active cold-tier deals are unavailable.",
                        )
                        .await;
                    return Err(SchedulerError::JobFailed(format!(
                        "pinning cid in hot storage: {err}"
                    )));
                }
                self.unfreeze(token, ctx, curr, action).await?
            }
        };

        Ok(HotInfo {
            enabled: true,
            size,
            ipfs: IpfsHotInfo {
                created: OffsetDateTime::now_utc(),
            },
        })
    }

    /// Retrieve the data back from the cold tier and pin it.
    async fn unfreeze(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        curr: &StorageInfo,
        action: &StorageAction,
    ) -> SchedulerResult<u64> {
        self.log.append(ctx, "Unfreezing from cold storage...").await;

        let data_cid = if curr.cold.filecoin.data_cid.is_defined() {
            curr.cold.filecoin.data_cid.clone()
        } else {
            action.cid.clone()
        };
        let piece_cid = curr
            .cold
            .filecoin
            .proposals
            .iter()
            .find(|p| p.piece_cid.is_defined())
            .map(|p| p.piece_cid.clone());
        let miners: Vec<String> = curr
            .cold
            .filecoin
            .proposals
            .iter()
            .map(|p| p.miner.clone())
            .collect();
        let params = FetchParams {
            payload_cid: data_cid.clone(),
            piece_cid,
            wallet_addr: action.config.cold.filecoin.wallet_addr.clone(),
            miners,
            max_price: action.config.hot.unfreeze_max_price,
            selector: String::new(),
        };

        let fetched = checked(token, async { Ok(self.cold.fetch(&params).await?) })
            .await
            .map_err(|err| match err {
                SchedulerError::Canceled => SchedulerError::Canceled,
                other => SchedulerError::JobFailed(format!("unfreezing from cold storage: {other}")),
            })?;
        self.log
            .append(
                ctx,
                format!(
                    "Unfrozen successfully from {} with cost {} attoFil, saving in hot storage...",
                    fetched.retrieved_miner, fetched.funds_spent
                ),
            )
            .await;

        let record = RetrievalDealRecord {
            id: String::new(),
            addr: action.config.cold.filecoin.wallet_addr.clone(),
            time: OffsetDateTime::now_utc().unix_timestamp(),
            deal_info: RetrievalDealInfo {
                root_cid: data_cid.clone(),
                size: fetched.size,
                min_price: action.config.hot.unfreeze_max_price,
                payment_interval: 0,
                miner: fetched.retrieved_miner.clone(),
                miner_peer_id: String::new(),
            },
            data_transfer_start: 0,
            data_transfer_end: 0,
            err_msg: String::new(),
            updated_at: unix_nanos_now(),
        };
        if let Err(err) = self.store.put_retrieval_record(&record).await {
            tracing::error!("saving unfreeze retrieval record: {err}");
        }

        let size = checked(token, async {
            Ok(self.hot.pin(&action.user_id, &data_cid).await?)
        })
        .await
        .map_err(|err| match err {
            SchedulerError::Canceled => SchedulerError::Canceled,
            other => SchedulerError::JobFailed(format!("pinning unfrozen cid: {other}")),
        })?;
        Ok(size)
    }

    /// Step 5: cold reconciliation. Resume detached deals, renew
    /// expiring ones, and top replication back up to the rep factor.
    async fn execute_cold(
        &self,
        token: &CancellationToken,
        ctx: &LogContext,
        curr: &mut StorageInfo,
        action: &StorageAction,
        errors: &mut Vec<DealError>,
    ) -> SchedulerResult<ColdInfo> {
        let user_id = &action.user_id;
        let cid = &action.cid;
        let fil_cfg = &action.config.cold.filecoin;

        // 5a. Deals started by a previous run that never saw a terminal
        // state; await them before computing what's missing.
        let detached = self.jobs.get_started_deals(user_id, cid).await?;
        if !detached.is_empty() {
            self.log
                .append(
                    ctx,
                    format!("Resuming {} detached executing deals...", detached.len()),
                )
                .await;
            let (resumed_ok, resumed_failed) = self
                .wait_for_deals(token, ctx, cid, &fil_cfg.wallet_addr, &detached)
                .await;
            self.log
                .append(
                    ctx,
                    format!(
                        "A total of {} resumed deals finished successfully.",
                        resumed_ok.len()
                    ),
                )
                .await;
            errors.extend(resumed_failed);
            let mut proposals = resumed_ok;
            proposals.append(&mut curr.cold.filecoin.proposals);
            curr.cold.filecoin.proposals = proposals;
            if !token.is_cancelled() {
                self.jobs.remove_started_deals(user_id, cid).await?;
            }
        }

        // 5b. Renewals.
        if fil_cfg.renew.enabled {
            if !curr.hot.enabled {
                // Validation rejects this; the engine double-checks since
                // renewals re-propose from the local copy.
                return Err(SchedulerError::JobFailed(
                    "invalid storage configuration, renewals require enabled hot storage".into(),
                ));
            }
            self.execute_renewals(token, ctx, curr, action, errors).await?;
        }

        // 5c. Replication top-up.
        let current = curr.cold.filecoin.proposals.len();
        if current >= fil_cfg.rep_factor {
            self.log
                .append(
                    ctx,
                    "The current replication factor is equal or higher than desired, \
                     avoiding making new deals.",
                )
                .await;
            return Ok(ColdInfo {
                enabled: true,
                filecoin: FilInfo {
                    data_cid: data_cid_for(curr, cid),
                    size: curr.cold.filecoin.size,
                    proposals: curr.cold.filecoin.proposals.clone(),
                },
            });
        }

        let delta = delta_fil_config(fil_cfg, &curr.cold.filecoin.proposals);
        self.log
            .append(
                ctx,
                format!(
                    "Current replication factor is lower than desired, making {} new deals...",
                    delta.rep_factor
                ),
            )
            .await;
        let store_res = checked(token, async { Ok(self.cold.store(cid, &delta).await?) })
            .await
            .map_err(|err| match err {
                SchedulerError::Canceled => SchedulerError::Canceled,
                other => {
                    SchedulerError::JobFailed(format!("starting cold-tier deals: {other}"))
                }
            })?;
        errors.extend(store_res.rejected.iter().cloned());
        for rejected in &store_res.rejected {
            self.log
                .append(
                    ctx,
                    format!(
                        "Proposal with miner {} failed: {}",
                        rejected.miner, rejected.message
                    ),
                )
                .await;
        }
        if store_res.started.is_empty() {
            return Err(SchedulerError::JobFailed("all proposals were rejected".into()));
        }

        // Track started deals durably so a crash can resume them (5a).
        self.jobs
            .add_started_deals(user_id, cid, &store_res.started)
            .await?;

        let (ok_deals, failed_deals) = self
            .wait_for_deals(token, ctx, cid, &fil_cfg.wallet_addr, &store_res.started)
            .await;
        errors.extend(failed_deals.iter().cloned());
        if !token.is_cancelled() {
            self.jobs.remove_started_deals(user_id, cid).await?;
            if ok_deals.is_empty() {
                return Err(SchedulerError::JobFailed("all started deals failed".into()));
            }
        }

        let mut proposals = ok_deals;
        proposals.extend(curr.cold.filecoin.proposals.iter().cloned());
        Ok(ColdInfo {
            enabled: true,
            filecoin: FilInfo {
                data_cid: cid.clone(),
                size: store_res.size,
                proposals,
            },
        })
    }
}

fn data_cid_for(curr: &StorageInfo, cid: &Cid) -> Cid {
    if curr.cold.filecoin.data_cid.is_defined() {
        curr.cold.filecoin.data_cid.clone()
    } else {
        cid.clone()
    }
}

/// Cold config for the missing replicas only: the rep factor shrinks to
/// the gap and miners already holding a proposal are excluded.
pub(crate) fn delta_fil_config(cfg: &FilConfig, proposals: &[FilStorage]) -> FilConfig {
    let mut delta = cfg.clone();
    delta.rep_factor = cfg.rep_factor - proposals.len();
    for proposal in proposals {
        delta.excluded_miners.push(proposal.miner.clone());
    }
    delta
}
