//! Structured per-(user, cid) job log with live fan-out.

use permafrost_core::{Cid, JobId, LogEntry, RetrievalId, UserId};
use permafrost_metadata::JobLogRepo;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Per-watcher buffer; a watcher this far behind starts losing entries.
const WATCHER_BUFFER: usize = 20;

/// Identifiers attached to every log entry written during an operation.
#[derive(Clone, Debug, Default)]
pub struct LogContext {
    pub user_id: Option<UserId>,
    pub cid: Option<Cid>,
    pub retrieval_id: Option<RetrievalId>,
    pub job_id: Option<JobId>,
}

impl LogContext {
    pub fn storage(user_id: &UserId, cid: &Cid) -> Self {
        Self {
            user_id: Some(user_id.clone()),
            cid: Some(cid.clone()),
            ..Default::default()
        }
    }

    pub fn retrieval(user_id: &UserId, retrieval_id: &RetrievalId) -> Self {
        Self {
            user_id: Some(user_id.clone()),
            retrieval_id: Some(retrieval_id.clone()),
            ..Default::default()
        }
    }

    pub fn with_job(mut self, job_id: &JobId) -> Self {
        self.job_id = Some(job_id.clone());
        self
    }
}

/// Datastore-backed job logger. Entries are informational; losing one is
/// non-fatal, and delivery to watchers is best-effort non-blocking.
pub struct JobLog {
    repo: Arc<dyn JobLogRepo>,
    watchers: Mutex<Vec<mpsc::Sender<LogEntry>>>,
    /// Strictly increasing timestamp source so two entries for the same
    /// (user, target) never collide.
    last_ts: AtomicI64,
}

impl JobLog {
    pub fn new(repo: Arc<dyn JobLogRepo>) -> Self {
        Self {
            repo,
            watchers: Mutex::new(Vec::new()),
            last_ts: AtomicI64::new(0),
        }
    }

    /// Persist a log entry and fan it out to live watchers. Slow watchers
    /// are skipped, not blocked.
    pub async fn append(&self, ctx: &LogContext, message: impl Into<String>) {
        let Some(user_id) = &ctx.user_id else {
            tracing::error!("log entry without user context dropped");
            return;
        };
        let message = message.into();
        tracing::info!(user = %user_id, "{message}");

        let entry = LogEntry {
            user_id: user_id.clone(),
            cid: ctx.cid.clone(),
            retrieval_id: ctx.retrieval_id.clone(),
            job_id: ctx.job_id.clone(),
            timestamp: self.next_timestamp(),
            message,
        };
        if let Err(err) = self.repo.append_log(&entry).await {
            tracing::error!("saving log entry: {err}");
            return;
        }

        let mut watchers = self.watchers.lock().unwrap();
        watchers.retain(|sink| match sink.try_send(entry.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("slow job log watcher, entry skipped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// History logs for a (user, cid), ascending by timestamp.
    pub async fn get_by_cid(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> permafrost_metadata::MetadataResult<Vec<LogEntry>> {
        self.repo.logs_by_target(user_id, cid.as_str()).await
    }

    /// History logs for a (user, retrieval), ascending by timestamp.
    pub async fn get_by_retrieval(
        &self,
        user_id: &UserId,
        retrieval_id: &RetrievalId,
    ) -> permafrost_metadata::MetadataResult<Vec<LogEntry>> {
        self.repo.logs_by_target(user_id, retrieval_id.as_str()).await
    }

    /// Register a watcher receiving all new entries until its receiver is
    /// dropped or the log is closed.
    pub fn watch(&self) -> mpsc::Receiver<LogEntry> {
        let (tx, rx) = mpsc::channel(WATCHER_BUFFER);
        self.watchers.lock().unwrap().push(tx);
        rx
    }

    /// Close all watcher sinks.
    pub fn close(&self) {
        self.watchers.lock().unwrap().clear();
    }

    fn next_timestamp(&self) -> i64 {
        let now = permafrost_core::job::unix_nanos_now();
        self.last_ts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .map(|last| now.max(last + 1))
            .unwrap_or(now)
    }
}
