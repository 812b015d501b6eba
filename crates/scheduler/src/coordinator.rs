//! Public coordinator API.
//!
//! The multi-tenant facade over the scheduler: stored per-user configs,
//! push/replace/remove semantics, retrievals, watches, and the read
//! models. An RPC layer maps onto these operations 1:1.

use crate::error::{SchedulerError, SchedulerResult};
use crate::jobstore::{JobsPage, ListJobsFilter};
use crate::scheduler::Scheduler;
use bytes::Bytes;
use permafrost_core::{
    Cid, DealRecordsFilter, Job, JobId, LogEntry, RetrievalDealRecord, RetrievalId, RetrievalInfo,
    StorageConfig, StorageDealRecord, StorageInfo, UserId,
};
use permafrost_deals::DealRecords;
use permafrost_metadata::{ActionRepo, MetadataStore, StorageInfoRepo, UserConfigRepo};
use permafrost_tiers::HotStorage;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Options for pushing a storage configuration.
#[derive(Clone, Debug, Default)]
pub struct PushOptions {
    /// The configuration to apply; the user's default config when absent.
    pub config: Option<StorageConfig>,
    /// Allow replacing a config already stored for the cid.
    pub override_config: bool,
}

/// The coordinator over scheduler, stores, and the hot tier.
pub struct Coordinator {
    scheduler: Arc<Scheduler>,
    store: Arc<dyn MetadataStore>,
    hot: Arc<HotStorage>,
    records: DealRecords,
}

impl Coordinator {
    pub fn new(
        scheduler: Arc<Scheduler>,
        store: Arc<dyn MetadataStore>,
        hot: Arc<HotStorage>,
    ) -> Self {
        let records = DealRecords::new(store.clone());
        Self {
            scheduler,
            store,
            hot,
            records,
        }
    }

    /// Declare the desired storage state of a cid for a user. Fails with
    /// `MustOverride` if the cid already has a stored config and the
    /// override flag isn't set.
    pub async fn push_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
        opts: PushOptions,
    ) -> SchedulerResult<JobId> {
        if !cid.is_defined() {
            return Err(SchedulerError::Invalid("cid is undefined".into()));
        }
        if !opts.override_config
            && self.store.get_user_config(user_id, cid).await?.is_some()
        {
            return Err(SchedulerError::MustOverride);
        }

        let config = match opts.config {
            Some(config) => config,
            None => self.default_storage_config(user_id).await?,
        };
        config.validate()?;

        let job_id = self.scheduler.push_config(user_id, cid, config.clone()).await?;
        self.store.put_user_config(user_id, cid, &config).await?;
        Ok(job_id)
    }

    /// Push the stored config of `old_cid` onto `new_cid` and stop
    /// managing `old_cid`. More efficient than remove + push since the
    /// hot tier swaps pins in one step.
    pub async fn push_replace(
        &self,
        user_id: &UserId,
        new_cid: &Cid,
        old_cid: &Cid,
    ) -> SchedulerResult<JobId> {
        if new_cid == old_cid {
            return Err(SchedulerError::Invalid(
                "old and new cid must be different".into(),
            ));
        }
        let config = self
            .store
            .get_user_config(user_id, old_cid)
            .await?
            .ok_or(SchedulerError::ReplacedCidNotFound)?;

        let job_id = self
            .scheduler
            .push_replace(user_id, new_cid, config.clone(), old_cid)
            .await?;
        self.store.put_user_config(user_id, new_cid, &config).await?;
        self.store.remove_user_config(user_id, old_cid).await?;
        Ok(job_id)
    }

    /// Stop managing a cid. The stored config must already have both
    /// tiers disabled. Deal records and storage info remain.
    pub async fn remove(&self, user_id: &UserId, cid: &Cid) -> SchedulerResult<()> {
        let config = self
            .store
            .get_user_config(user_id, cid)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("config for cid {cid}")))?;
        if config.hot.enabled || config.cold.enabled {
            return Err(SchedulerError::ActiveInStorage);
        }
        self.scheduler.untrack(user_id, cid).await?;
        self.store.remove_user_config(user_id, cid).await?;
        Ok(())
    }

    /// Read stored cid data from the hot tier.
    pub async fn get(&self, user_id: &UserId, cid: &Cid) -> SchedulerResult<Bytes> {
        let config = self
            .store
            .get_user_config(user_id, cid)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("config for cid {cid}")))?;
        if !config.hot.enabled {
            return Err(SchedulerError::HotStorageDisabled);
        }
        Ok(self.hot.get(cid).await?)
    }

    /// The stored config of a cid.
    pub async fn get_storage_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> SchedulerResult<StorageConfig> {
        self.store
            .get_user_config(user_id, cid)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("config for cid {cid}")))
    }

    /// The user's default config used when a push carries none.
    pub async fn default_storage_config(&self, user_id: &UserId) -> SchedulerResult<StorageConfig> {
        Ok(self
            .store
            .get_default_config(user_id)
            .await?
            .unwrap_or_else(|| StorageConfig::default().with_hot_enabled(true)))
    }

    /// Replace the user's default config.
    pub async fn set_default_storage_config(
        &self,
        user_id: &UserId,
        config: StorageConfig,
    ) -> SchedulerResult<()> {
        config.validate()?;
        Ok(self.store.put_default_config(user_id, &config).await?)
    }

    /// The config a job was created with.
    pub async fn storage_config_for_job(&self, job_id: &JobId) -> SchedulerResult<StorageConfig> {
        let action = self.store.get_storage_action(job_id).await.map_err(|err| {
            match err {
                permafrost_metadata::MetadataError::NotFound(_) => {
                    SchedulerError::NotFound(format!("job {job_id}"))
                }
                other => other.into(),
            }
        })?;
        Ok(action.config)
    }

    /// Cancel a queued or executing job.
    pub async fn cancel_job(&self, job_id: &JobId) -> SchedulerResult<()> {
        self.scheduler.cancel(job_id).await
    }

    /// Schedule a retrieval from the cold tier.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_retrieval(
        &self,
        user_id: &UserId,
        retrieval_id: &RetrievalId,
        payload_cid: &Cid,
        piece_cid: &Cid,
        selector: &str,
        miners: Vec<String>,
        wallet_addr: &str,
        max_price: u64,
    ) -> SchedulerResult<JobId> {
        self.scheduler
            .start_retrieval(
                user_id,
                retrieval_id,
                payload_cid,
                piece_cid,
                selector,
                miners,
                wallet_addr,
                max_price,
            )
            .await
    }

    /// Result of an executed retrieval.
    pub async fn get_retrieval_info(
        &self,
        user_id: &UserId,
        retrieval_id: &RetrievalId,
    ) -> SchedulerResult<RetrievalInfo> {
        self.scheduler.retrieval_info(user_id, retrieval_id).await
    }

    /// Current state of a job.
    pub async fn get_storage_job(&self, job_id: &JobId) -> SchedulerResult<Job> {
        self.scheduler.get_job(job_id).await
    }

    /// Watch job updates for a user. Snapshots of any requested job ids
    /// are emitted first, then live updates; an empty id list watches all
    /// of the user's jobs.
    pub async fn watch_jobs(
        &self,
        user_id: &UserId,
        job_ids: Vec<JobId>,
    ) -> SchedulerResult<mpsc::Receiver<Job>> {
        // Room for every snapshot plus a window of live updates, so the
        // snapshot sends below can't block before the receiver is polled.
        let (tx, rx) = mpsc::channel(job_ids.len() + 16);

        for job_id in &job_ids {
            let job = self.scheduler.get_job(job_id).await?;
            if &job.user_id != user_id {
                return Err(SchedulerError::NotFound(format!("job {job_id}")));
            }
            let _ = tx.send(job).await;
        }

        let mut live = self.scheduler.job_store().watch(user_id).await;
        tokio::spawn(async move {
            while let Some(job) = live.recv().await {
                if !job_ids.is_empty() && !job_ids.contains(&job.id) {
                    continue;
                }
                if tx.send(job).await.is_err() {
                    return;
                }
            }
        });
        Ok(rx)
    }

    /// Paginated job listing.
    pub async fn list_storage_jobs(&self, filter: &ListJobsFilter) -> SchedulerResult<JobsPage> {
        self.scheduler.list_jobs(filter).await
    }

    /// Last-known storage state of a (user, cid).
    pub async fn get_storage_info(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> SchedulerResult<StorageInfo> {
        self.store
            .get_storage_info(user_id, cid)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("storage info for cid {cid}")))
    }

    /// Storage infos restricted to users and/or cids.
    pub async fn list_storage_info(
        &self,
        user_ids: &[UserId],
        cids: &[Cid],
    ) -> SchedulerResult<Vec<StorageInfo>> {
        Ok(self.store.list_storage_info(user_ids, cids).await?)
    }

    /// Seed storage info derived externally. Refuses to overwrite a view
    /// produced by a job.
    pub async fn import_storage_info(&self, info: StorageInfo) -> SchedulerResult<()> {
        if self
            .store
            .get_storage_info(&info.user_id, &info.cid)
            .await?
            .is_some()
        {
            return Err(SchedulerError::Invalid(format!(
                "storage info for cid {} already exists",
                info.cid
            )));
        }
        Ok(self.store.put_storage_info(&info).await?)
    }

    /// History logs of a (user, cid).
    pub async fn get_logs_by_cid(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> SchedulerResult<Vec<LogEntry>> {
        self.scheduler.logs_by_cid(user_id, cid).await
    }

    /// Live job-log entries.
    pub fn watch_logs(&self) -> mpsc::Receiver<LogEntry> {
        self.scheduler.watch_logs()
    }

    /// Filtered storage-deal record listing.
    pub async fn list_storage_records(
        &self,
        filter: &DealRecordsFilter,
    ) -> SchedulerResult<Vec<StorageDealRecord>> {
        Ok(self.records.list_storage_records(filter).await?)
    }

    /// Filtered retrieval-deal record listing.
    pub async fn list_retrieval_records(
        &self,
        filter: &DealRecordsFilter,
    ) -> SchedulerResult<Vec<RetrievalDealRecord>> {
        Ok(self.records.list_retrieval_records(filter).await?)
    }
}
