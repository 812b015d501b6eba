//! Shared test harness for scheduler tests.

// Each test file compiles common/ separately, so not every helper is
// used from every binary.
#![allow(dead_code)]

pub mod mocks;

use mocks::{MockColdStore, MockHotClient};
use permafrost_core::{Cid, Job, JobId, JobStatus, SchedulerConfig, StorageConfig, UserId};
use permafrost_deals::DealWatcher;
use permafrost_metadata::{MetadataStore, SqliteStore};
use permafrost_scheduler::{Coordinator, Scheduler};
use permafrost_tiers::{HotStorage, NoopNotifier};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// A full coordinator over mock tiers and a tempfile-backed store.
pub struct Harness {
    pub sqlite: Arc<SqliteStore>,
    pub store: Arc<dyn MetadataStore>,
    pub hot_client: Arc<MockHotClient>,
    pub hot: Arc<HotStorage>,
    pub cold: Arc<MockColdStore>,
    pub scheduler: Arc<Scheduler>,
    pub coordinator: Coordinator,
    _dir: TempDir,
}

/// Background tickers effectively disabled so tests control all activity.
pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        max_parallel: 8,
        renewal_interval_secs: 360_000_000,
        repair_interval_secs: 360_000_000,
        gc_interval_secs: 360_000_000,
        gc_stage_grace_secs: 86_400,
        deal_finality_timeout_secs: 5,
    }
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(test_config()).await
    }

    pub async fn start_with(cfg: SchedulerConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = Arc::new(SqliteStore::new(dir.path().join("meta.db")).await.unwrap());
        Self::build(dir, sqlite, cfg).await
    }

    /// Start over an existing datastore, as a restarted daemon would.
    pub async fn restart(dir: TempDir, cfg: SchedulerConfig) -> Self {
        let sqlite = Arc::new(SqliteStore::new(dir.path().join("meta.db")).await.unwrap());
        Self::build(dir, sqlite, cfg).await
    }

    async fn build(dir: TempDir, sqlite: Arc<SqliteStore>, cfg: SchedulerConfig) -> Self {
        let store: Arc<dyn MetadataStore> = sqlite.clone();
        let hot_client = MockHotClient::new();
        let (cold, source) = MockColdStore::new(hot_client.clone());
        let hot = Arc::new(HotStorage::new(hot_client.clone(), sqlite.clone()).await.unwrap());
        let watcher = Arc::new(DealWatcher::new(source));

        let scheduler = Scheduler::start(
            cfg,
            store.clone(),
            hot.clone(),
            cold.clone(),
            watcher,
            Arc::new(NoopNotifier),
        )
        .await
        .unwrap();
        let coordinator = Coordinator::new(scheduler.clone(), store.clone(), hot.clone());

        Self {
            sqlite,
            store,
            hot_client,
            hot,
            cold,
            scheduler,
            coordinator,
            _dir: dir,
        }
    }

    /// Tear down the scheduler and hand back the datastore directory for
    /// a restart.
    pub async fn stop(self) -> TempDir {
        self.scheduler.close().await;
        self._dir
    }

    /// Poll a job until it reaches the wanted status.
    pub async fn await_status(&self, job_id: &JobId, status: JobStatus, timeout: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.scheduler.get_job(job_id).await.unwrap();
            if job.status == status {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} stuck in {:?} waiting for {status:?} (cause: {})",
                job.status,
                job.error_cause
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Poll a job until it terminalizes.
    pub async fn await_terminal(&self, job_id: &JobId, timeout: Duration) -> Job {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let job = self.scheduler.get_job(job_id).await.unwrap();
            if job.status.is_terminal() {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {job_id} never terminalized, stuck in {:?}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

/// A valid hot+cold config with a single replica.
pub fn hot_cold_config() -> StorageConfig {
    StorageConfig::default()
        .with_hot_enabled(true)
        .with_cold_enabled(true)
        .with_wallet_addr("f1wallet")
}

/// A hot-only config.
pub fn hot_only_config() -> StorageConfig {
    StorageConfig::default().with_hot_enabled(true)
}

#[allow(dead_code)]
pub fn cid(s: &str) -> Cid {
    Cid::new(s)
}
