//! Scheduler daemon.
//!
//! Receives storage configurations as jobs, serializes work per
//! (user, cid) through the job store, and drives the reconciliation
//! engine on a bounded worker pool. Wake sources: the evaluate-queue
//! signals fired by enqueue/cancel, the renewal/repair tickers, and the
//! staged-GC ticker.

use crate::engine::Engine;
use crate::error::{SchedulerError, SchedulerResult};
use crate::joblog::{JobLog, LogContext};
use crate::jobstore::{JobStore, JobsPage, ListJobsFilter};
use crate::retrievals::RetrievalJobStore;
use permafrost_core::{
    Cid, Job, JobId, JobStatus, LogEntry, RetrievalAction, RetrievalId, RetrievalInfo,
    SchedulerConfig, StorageAction, StorageConfig, UserId,
};
use permafrost_deals::DealWatcher;
use permafrost_metadata::{
    ActionRepo, MetadataStore, RetrievalInfoRepo, StorageInfoRepo, TrackedConfigRepo,
};
use permafrost_tiers::{ColdStore, HotStorage, Notifier};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The scheduler: job intake, worker pool, and background passes.
pub struct Scheduler {
    cfg: SchedulerConfig,
    store: Arc<dyn MetadataStore>,
    jobs: Arc<JobStore>,
    retrievals: Arc<RetrievalJobStore>,
    log: Arc<JobLog>,
    hot: Arc<HotStorage>,
    watcher: Arc<DealWatcher>,
    notifier: Arc<dyn Notifier>,
    engine: Engine,

    cancels: Mutex<HashMap<JobId, CancellationToken>>,
    storage_wake: Notify,
    retrieval_wake: Notify,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Build the scheduler, reload persisted state, resume interrupted
    /// jobs, and start the daemon loops.
    pub async fn start(
        cfg: SchedulerConfig,
        store: Arc<dyn MetadataStore>,
        hot: Arc<HotStorage>,
        cold: Arc<dyn ColdStore>,
        watcher: Arc<DealWatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> SchedulerResult<Arc<Self>> {
        let jobs = Arc::new(JobStore::load(store.clone()).await?);
        let retrievals = Arc::new(RetrievalJobStore::load(store.clone()).await?);
        let log = Arc::new(JobLog::new(store.clone()));

        let engine = Engine {
            store: store.clone(),
            jobs: jobs.clone(),
            hot: hot.clone(),
            cold,
            watcher: watcher.clone(),
            log: log.clone(),
            deal_finality_timeout: Duration::from_secs(cfg.deal_finality_timeout_secs),
        };

        let scheduler = Arc::new(Self {
            workers: Arc::new(Semaphore::new(cfg.max_parallel)),
            cfg,
            store,
            jobs,
            retrievals,
            log,
            hot,
            watcher,
            notifier,
            engine,
            cancels: Mutex::new(HashMap::new()),
            storage_wake: Notify::new(),
            retrieval_wake: Notify::new(),
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        });
        scheduler.clone().run().await?;
        Ok(scheduler)
    }

    /// Queue a storage configuration to be executed as a new job.
    pub async fn push_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
        cfg: StorageConfig,
    ) -> SchedulerResult<JobId> {
        self.push(user_id, cid, cfg, None).await
    }

    /// Queue a storage configuration that replaces a previously managed
    /// cid, untracking the old one.
    pub async fn push_replace(
        &self,
        user_id: &UserId,
        cid: &Cid,
        cfg: StorageConfig,
        replaced_cid: &Cid,
    ) -> SchedulerResult<JobId> {
        if !replaced_cid.is_defined() {
            return Err(SchedulerError::Invalid("replaced cid is undefined".into()));
        }
        self.push(user_id, cid, cfg, Some(replaced_cid.clone())).await
    }

    async fn push(
        &self,
        user_id: &UserId,
        cid: &Cid,
        cfg: StorageConfig,
        replaced_cid: Option<Cid>,
    ) -> SchedulerResult<JobId> {
        if !cid.is_defined() {
            return Err(SchedulerError::Invalid("cid is undefined".into()));
        }
        cfg.validate()?;

        let job = Job::queued(user_id.clone(), cid.clone());
        let ctx = LogContext::storage(user_id, cid).with_job(&job.id);
        self.log.append(&ctx, "Pushing new configuration...").await;

        let action = StorageAction {
            user_id: user_id.clone(),
            cid: cid.clone(),
            config: cfg.clone(),
            replaced_cid,
        };
        self.store.put_storage_action(&job.id, &action).await?;
        self.store.put_tracked(user_id, cid, &cfg).await?;
        self.notifier.register_job(&job.id, &cfg.notifications).await;

        let job_id = job.id.clone();
        self.jobs.enqueue(job).await?;
        if let Some(executing) = self.jobs.executing_job(user_id, cid).await {
            self.log
                .append(
                    &ctx,
                    format!(
                        "Job {executing} is already executing for the same data, this job \
                         is queued until it finishes or is canceled."
                    ),
                )
                .await;
        }
        self.storage_wake.notify_one();
        self.log.append(&ctx, "Configuration saved successfully.").await;
        Ok(job_id)
    }

    /// Schedule a cold-tier retrieval as a new job.
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
        if !payload_cid.is_defined() {
            return Err(SchedulerError::Invalid("payload cid is undefined".into()));
        }
        if !piece_cid.is_defined() {
            return Err(SchedulerError::Invalid("piece cid is undefined".into()));
        }
        if miners.is_empty() {
            return Err(SchedulerError::Invalid("miner list can't be empty".into()));
        }
        if wallet_addr.is_empty() {
            return Err(SchedulerError::Invalid("wallet address can't be empty".into()));
        }

        let job = permafrost_core::RetrievalJob::queued(user_id.clone(), retrieval_id.clone());
        let ctx = LogContext::retrieval(user_id, retrieval_id).with_job(&job.id);
        self.log.append(&ctx, "Scheduling new retrieval...").await;

        let action = RetrievalAction {
            user_id: user_id.clone(),
            retrieval_id: retrieval_id.clone(),
            payload_cid: payload_cid.clone(),
            piece_cid: piece_cid.clone(),
            selector: selector.to_string(),
            miners,
            wallet_addr: wallet_addr.to_string(),
            max_price,
        };
        self.store.put_retrieval_action(&job.id, &action).await?;

        let job_id = job.id.clone();
        self.retrievals.enqueue(job).await?;
        self.retrieval_wake.notify_one();
        self.log.append(&ctx, "Retrieval scheduled successfully.").await;
        Ok(job_id)
    }

    /// Cancel a job. A queued job finalizes Canceled immediately; an
    /// executing one aborts cooperatively at its next suspension point.
    pub async fn cancel(&self, job_id: &JobId) -> SchedulerResult<()> {
        match self.jobs.cancel_queued(job_id).await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                if let Some(token) = self.cancels.lock().unwrap().get(job_id) {
                    token.cancel();
                }
                return Ok(());
            }
            Err(SchedulerError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        // Not a storage job; try the retrieval queue.
        let rjob = self.retrievals.get(job_id).await?;
        match rjob.status {
            JobStatus::Queued => {
                self.retrievals
                    .finalize(job_id, JobStatus::Canceled, None)
                    .await?;
            }
            JobStatus::Executing => {
                if let Some(token) = self.cancels.lock().unwrap().get(job_id) {
                    token.cancel();
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Stop tracking a (user, cid) for renewal and repair passes.
    pub async fn untrack(&self, user_id: &UserId, cid: &Cid) -> SchedulerResult<()> {
        Ok(self.store.remove_tracked(user_id, cid).await?)
    }

    /// Current state of a storage job.
    pub async fn get_job(&self, job_id: &JobId) -> SchedulerResult<Job> {
        self.jobs.get(job_id).await
    }

    /// Paginated storage job listing.
    pub async fn list_jobs(&self, filter: &ListJobsFilter) -> SchedulerResult<JobsPage> {
        self.jobs.list(filter).await
    }

    /// Live job updates for a user.
    pub async fn watch_jobs(&self, user_id: &UserId) -> mpsc::Receiver<Job> {
        self.jobs.watch(user_id).await
    }

    /// Live job-log entries.
    pub fn watch_logs(&self) -> mpsc::Receiver<LogEntry> {
        self.log.watch()
    }

    /// History logs of a (user, cid).
    pub async fn logs_by_cid(&self, user_id: &UserId, cid: &Cid) -> SchedulerResult<Vec<LogEntry>> {
        Ok(self.log.get_by_cid(user_id, cid).await?)
    }

    /// Result of an executed retrieval.
    pub async fn retrieval_info(
        &self,
        user_id: &UserId,
        retrieval_id: &RetrievalId,
    ) -> SchedulerResult<RetrievalInfo> {
        self.store
            .get_retrieval_info(user_id, retrieval_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("retrieval {retrieval_id}")))
    }

    /// Queue totals.
    pub async fn stats(&self) -> crate::jobstore::JobStats {
        self.jobs.stats().await
    }

    /// Access to the job store, for the coordinator's watch surface.
    pub(crate) fn job_store(&self) -> &Arc<JobStore> {
        &self.jobs
    }

    /// Shut the scheduler down: stop the loops, close the watcher and
    /// the log sinks. Executing jobs are interrupted at their next
    /// suspension point on restart recovery semantics.
    pub async fn close(&self) {
        tracing::info!("closing scheduler...");
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.watcher.close().await;
        self.log.close();
        tracing::info!("scheduler closed");
    }

    async fn run(self: Arc<Self>) -> SchedulerResult<()> {
        self.resume_interrupted().await?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(storage_queue_loop(self.clone())));
        tasks.push(tokio::spawn(retrieval_queue_loop(self.clone())));
        tasks.push(tokio::spawn(ticker_loop(
            self.clone(),
            Duration::from_secs(self.cfg.renewal_interval_secs),
            Pass::Renewal,
        )));
        tasks.push(tokio::spawn(ticker_loop(
            self.clone(),
            Duration::from_secs(self.cfg.repair_interval_secs),
            Pass::Repair,
        )));
        tasks.push(tokio::spawn(gc_loop(self.clone())));
        self.tasks.lock().unwrap().extend(tasks);

        // Kick an initial queue evaluation for jobs persisted as queued.
        self.storage_wake.notify_one();
        self.retrieval_wake.notify_one();
        Ok(())
    }

    /// Re-execute jobs that were Executing when the process stopped. The
    /// engine detects resumed execution through the started-deals trail.
    async fn resume_interrupted(self: &Arc<Self>) -> SchedulerResult<()> {
        for job_id in self.jobs.executing_job_ids().await {
            let job = self.jobs.get(&job_id).await?;
            tracing::info!(job = %job.id, cid = %job.cid, "resuming interrupted job");
            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let this = self.clone();
            tokio::spawn(async move {
                execute_storage_job(this, job).await;
                drop(permit);
            });
        }
        for job_id in self.retrievals.executing_job_ids().await {
            let job = self.retrievals.get(&job_id).await?;
            tracing::info!(job = %job.id, "resuming interrupted retrieval job");
            let permit = self
                .workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore closed");
            let this = self.clone();
            tokio::spawn(async move {
                execute_retrieval_job(this, job).await;
                drop(permit);
            });
        }
        Ok(())
    }
}

enum Pass {
    Renewal,
    Repair,
}

async fn storage_queue_loop(scheduler: Arc<Scheduler>) {
    loop {
        tokio::select! {
            _ = scheduler.shutdown.cancelled() => return,
            _ = scheduler.storage_wake.notified() => {}
        }
        tracing::debug!("evaluating storage job queue...");
        loop {
            let Ok(permit) = scheduler.workers.clone().try_acquire_owned() else {
                // The pool is full; a finishing job re-signals the wake.
                break;
            };
            match scheduler.jobs.dequeue(None).await {
                Ok(Some(job)) => {
                    let this = scheduler.clone();
                    tokio::spawn(async move {
                        execute_storage_job(this.clone(), job).await;
                        drop(permit);
                        // A freed slot may unblock a same-cid queued job.
                        this.storage_wake.notify_one();
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("dequeuing storage job: {err}");
                    break;
                }
            }
        }
    }
}

async fn retrieval_queue_loop(scheduler: Arc<Scheduler>) {
    loop {
        tokio::select! {
            _ = scheduler.shutdown.cancelled() => return,
            _ = scheduler.retrieval_wake.notified() => {}
        }
        tracing::debug!("evaluating retrieval job queue...");
        loop {
            let Ok(permit) = scheduler.workers.clone().try_acquire_owned() else {
                break;
            };
            match scheduler.retrievals.dequeue().await {
                Ok(Some(job)) => {
                    let this = scheduler.clone();
                    tokio::spawn(async move {
                        execute_retrieval_job(this.clone(), job).await;
                        drop(permit);
                        this.retrieval_wake.notify_one();
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::error!("dequeuing retrieval job: {err}");
                    break;
                }
            }
        }
    }
}

async fn execute_storage_job(scheduler: Arc<Scheduler>, job: Job) {
    let token = CancellationToken::new();
    scheduler
        .cancels
        .lock()
        .unwrap()
        .insert(job.id.clone(), token.clone());

    let ctx = LogContext::storage(&job.user_id, &job.cid).with_job(&job.id);
    let action = match scheduler.store.get_storage_action(&job.id).await {
        Ok(action) => action,
        Err(err) => {
            tracing::error!(job = %job.id, "getting storage action: {err}");
            finalize_storage(&scheduler, &job, JobStatus::Failed, Some(err.to_string()), vec![])
                .await;
            scheduler
                .log
                .append(&ctx, format!("Job {} couldn't start: {err}.", job.id))
                .await;
            scheduler.cancels.lock().unwrap().remove(&job.id);
            return;
        }
    };

    scheduler
        .log
        .append(&ctx, format!("Executing job {}...", job.id))
        .await;
    let mut deal_errors = Vec::new();
    let result = scheduler
        .engine
        .execute_storage(&token, &action, &job, &mut deal_errors)
        .await;

    let status = match result {
        // Stored state is never mutated speculatively: a canceled run
        // doesn't persist the partially-built view.
        Ok(_) if token.is_cancelled() => JobStatus::Canceled,
        Ok(info) => {
            if let Err(err) = scheduler.store.put_storage_info(&info).await {
                tracing::error!("saving storage info: {err}");
            }
            JobStatus::Success
        }
        Err(SchedulerError::Canceled) => JobStatus::Canceled,
        Err(err) => {
            tracing::error!(job = %job.id, "executing job: {err}");
            finalize_storage(
                &scheduler,
                &job,
                JobStatus::Failed,
                Some(err.to_string()),
                deal_errors,
            )
            .await;
            scheduler
                .log
                .append(&ctx, format!("Job {} execution failed: {err}", job.id))
                .await;
            scheduler
                .notifier
                .alert("job-failed", &action.config.notifications)
                .await;
            scheduler.cancels.lock().unwrap().remove(&job.id);
            return;
        }
    };

    finalize_storage(&scheduler, &job, status, None, deal_errors).await;
    scheduler
        .log
        .append(
            &ctx,
            format!("Job {} execution finished with status {status}.", job.id),
        )
        .await;
    let event = match status {
        JobStatus::Canceled => "job-canceled",
        _ => "job-success",
    };
    scheduler
        .notifier
        .alert(event, &action.config.notifications)
        .await;
    scheduler.cancels.lock().unwrap().remove(&job.id);
}

async fn finalize_storage(
    scheduler: &Scheduler,
    job: &Job,
    status: JobStatus,
    error_cause: Option<String>,
    deal_errors: Vec<permafrost_core::DealError>,
) {
    if let Err(err) = scheduler
        .jobs
        .finalize(&job.id, status, error_cause, deal_errors)
        .await
    {
        tracing::error!(job = %job.id, "finalizing job as {status}: {err}");
    }
}

async fn execute_retrieval_job(scheduler: Arc<Scheduler>, job: permafrost_core::RetrievalJob) {
    let token = CancellationToken::new();
    scheduler
        .cancels
        .lock()
        .unwrap()
        .insert(job.id.clone(), token.clone());

    let ctx = LogContext::retrieval(&job.user_id, &job.retrieval_id).with_job(&job.id);
    let action = match scheduler.store.get_retrieval_action(&job.id).await {
        Ok(action) => action,
        Err(err) => {
            tracing::error!(job = %job.id, "getting retrieval action: {err}");
            let _ = scheduler
                .retrievals
                .finalize(&job.id, JobStatus::Failed, Some(err.to_string()))
                .await;
            scheduler.cancels.lock().unwrap().remove(&job.id);
            return;
        }
    };

    scheduler
        .log
        .append(&ctx, format!("Executing retrieval job {}...", job.id))
        .await;
    let result = scheduler.engine.execute_retrieval(&token, &action, &job).await;
    let (status, error_cause) = match result {
        Ok(info) => {
            if let Err(err) = scheduler.store.put_retrieval_info(&info).await {
                tracing::error!("saving retrieval info: {err}");
            }
            if token.is_cancelled() {
                (JobStatus::Canceled, None)
            } else {
                (JobStatus::Success, None)
            }
        }
        Err(SchedulerError::Canceled) => (JobStatus::Canceled, None),
        Err(err) => (JobStatus::Failed, Some(err.to_string())),
    };
    if let Err(err) = scheduler
        .retrievals
        .finalize(&job.id, status, error_cause)
        .await
    {
        tracing::error!(job = %job.id, "finalizing retrieval job: {err}");
    }
    scheduler
        .log
        .append(
            &ctx,
            format!("Retrieval job {} execution finished with status {status}.", job.id),
        )
        .await;
    scheduler.cancels.lock().unwrap().remove(&job.id);
}

/// Renewal and repair passes re-push tracked configs as regular jobs;
/// the reconciliation engine does whatever work is needed, so the pass
/// itself stays trivial.
async fn ticker_loop(scheduler: Arc<Scheduler>, interval: Duration, pass: Pass) {
    loop {
        tokio::select! {
            _ = scheduler.shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let (tracked, reason) = match pass {
            Pass::Renewal => (scheduler.store.renewables().await, "renew"),
            Pass::Repair => (scheduler.store.repairables().await, "repair"),
        };
        let tracked = match tracked {
            Ok(tracked) => tracked,
            Err(err) => {
                tracing::error!("getting tracked configs for {reason}: {err}");
                continue;
            }
        };
        tracing::debug!("running {reason} checks over {} configs...", tracked.len());
        for entry in tracked {
            if scheduler.jobs.has_active_job(&entry.user_id, &entry.cid).await {
                continue;
            }
            let ctx = LogContext::storage(&entry.user_id, &entry.cid);
            scheduler
                .log
                .append(&ctx, format!("Scheduling deal {reason} evaluation..."))
                .await;
            match scheduler
                .push(&entry.user_id, &entry.cid, entry.config, None)
                .await
            {
                Ok(job_id) => {
                    scheduler
                        .log
                        .append(
                            &ctx,
                            format!("Job {job_id} was queued for {reason} evaluation."),
                        )
                        .await;
                }
                Err(err) => {
                    scheduler
                        .log
                        .append(&ctx, format!("Scheduling deal {reason} errored: {err}"))
                        .await;
                }
            }
        }
    }
}

/// Unpin staged cids that grew old without being strong-pinned, skipping
/// any cid with active jobs.
async fn gc_loop(scheduler: Arc<Scheduler>) {
    let interval = Duration::from_secs(scheduler.cfg.gc_interval_secs);
    let grace = scheduler.cfg.gc_stage_grace_secs as i64;
    loop {
        tokio::select! {
            _ = scheduler.shutdown.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
        let exclude = scheduler.jobs.active_cids().await;
        let before = OffsetDateTime::now_utc().unix_timestamp() - grace;
        match scheduler.hot.gc_staged(&exclude, before).await {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!("staged gc unpinned {} cids", removed.len());
            }
            Ok(_) => {}
            Err(err) => tracing::error!("staged gc pass: {err}"),
        }
    }
}
