//! Retrieval job execution.

use super::{Engine, checked};
use crate::error::{SchedulerError, SchedulerResult};
use crate::joblog::LogContext;
use permafrost_core::job::unix_nanos_now;
use permafrost_core::{
    RetrievalAction, RetrievalDealInfo, RetrievalDealRecord, RetrievalInfo, RetrievalJob,
};
use permafrost_metadata::DealRecordRepo;
use permafrost_tiers::FetchParams;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

impl Engine {
    /// Execute a retrieval job: pull the payload back from the cold tier
    /// and pin it in the hot tier for the user.
    pub(crate) async fn execute_retrieval(
        &self,
        token: &CancellationToken,
        action: &RetrievalAction,
        job: &RetrievalJob,
    ) -> SchedulerResult<RetrievalInfo> {
        let ctx = LogContext::retrieval(&action.user_id, &action.retrieval_id).with_job(&job.id);
        self.log.append(&ctx, "Fetching data from cold storage...").await;

        let params = FetchParams {
            payload_cid: action.payload_cid.clone(),
            piece_cid: Some(action.piece_cid.clone()),
            wallet_addr: action.wallet_addr.clone(),
            miners: action.miners.clone(),
            max_price: action.max_price,
            selector: action.selector.clone(),
        };
        let started_at = OffsetDateTime::now_utc().unix_timestamp();

        let fetched = match checked(token, async { Ok(self.cold.fetch(&params).await?) }).await {
            Ok(fetched) => fetched,
            Err(SchedulerError::Canceled) => return Err(SchedulerError::Canceled),
            Err(err) => {
                self.record_retrieval(action, started_at, 0, "", &err.to_string())
                    .await;
                self.log
                    .append(&ctx, format!("Retrieval failed: {err}"))
                    .await;
                return Err(SchedulerError::JobFailed(format!(
                    "fetching from cold storage: {err}"
                )));
            }
        };
        self.log
            .append(
                &ctx,
                format!(
                    "Retrieved from miner {} spending {} attoFil, pinning in hot storage...",
                    fetched.retrieved_miner, fetched.funds_spent
                ),
            )
            .await;

        let size = checked(token, async {
            Ok(self.hot.pin(&action.user_id, &action.payload_cid).await?)
        })
        .await
        .map_err(|err| match err {
            SchedulerError::Canceled => SchedulerError::Canceled,
            other => SchedulerError::JobFailed(format!("pinning retrieved data: {other}")),
        })?;

        self.record_retrieval(action, started_at, fetched.size, &fetched.retrieved_miner, "")
            .await;
        self.log.append(&ctx, "Retrieval executed successfully.").await;

        Ok(RetrievalInfo {
            id: action.retrieval_id.clone(),
            user_id: action.user_id.clone(),
            data_cid: action.payload_cid.clone(),
            total_paid: fetched.funds_spent,
            miner: fetched.retrieved_miner,
            size,
            created_at: OffsetDateTime::now_utc(),
        })
    }

    async fn record_retrieval(
        &self,
        action: &RetrievalAction,
        started_at: i64,
        size: u64,
        miner: &str,
        err_msg: &str,
    ) {
        let record = RetrievalDealRecord {
            id: String::new(),
            addr: action.wallet_addr.clone(),
            time: started_at,
            deal_info: RetrievalDealInfo {
                root_cid: action.payload_cid.clone(),
                size,
                min_price: action.max_price,
                payment_interval: 0,
                miner: if miner.is_empty() {
                    action.miners.first().cloned().unwrap_or_default()
                } else {
                    miner.to_string()
                },
                miner_peer_id: String::new(),
            },
            data_transfer_start: started_at,
            data_transfer_end: OffsetDateTime::now_utc().unix_timestamp(),
            err_msg: err_msg.to_string(),
            updated_at: unix_nanos_now(),
        };
        if let Err(err) = self.store.put_retrieval_record(&record).await {
            tracing::error!("saving retrieval deal record: {err}");
        }
    }
}
