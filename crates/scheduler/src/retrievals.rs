//! Retrieval job store.
//!
//! A lighter sibling of the storage job store: plain FIFO, no per-cid
//! mutual exclusion.

use crate::error::{SchedulerError, SchedulerResult};
use permafrost_core::{JobId, JobStatus, RetrievalJob};
use permafrost_metadata::{MetadataStore, RetrievalJobRepo};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    queued: Vec<RetrievalJob>,
    executing_ids: HashSet<JobId>,
}

/// Persistent FIFO queue of retrieval jobs.
pub struct RetrievalJobStore {
    repo: Arc<dyn MetadataStore>,
    state: Mutex<State>,
}

impl RetrievalJobStore {
    /// Build the store, reloading non-terminal jobs from the datastore.
    pub async fn load(repo: Arc<dyn MetadataStore>) -> SchedulerResult<Self> {
        let mut state = State::default();
        for job in repo.all_retrieval_jobs().await? {
            match job.status {
                JobStatus::Queued => state.queued.push(job),
                JobStatus::Executing => {
                    state.executing_ids.insert(job.id.clone());
                }
                _ => {}
            }
        }
        state.queued.sort_by_key(|j| j.created_at);
        Ok(Self {
            repo,
            state: Mutex::new(state),
        })
    }

    pub async fn enqueue(&self, mut job: RetrievalJob) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;
        job.status = JobStatus::Queued;
        self.repo.put_retrieval_job(&job).await?;
        state.queued.push(job);
        Ok(())
    }

    /// Dequeue the oldest queued retrieval job, transitioning it to
    /// Executing.
    pub async fn dequeue(&self) -> SchedulerResult<Option<RetrievalJob>> {
        let mut state = self.state.lock().await;
        if state.queued.is_empty() {
            return Ok(None);
        }
        let mut job = state.queued.remove(0);
        job.status = JobStatus::Executing;
        self.repo.put_retrieval_job(&job).await?;
        state.executing_ids.insert(job.id.clone());
        Ok(Some(job))
    }

    /// Move a retrieval job to a terminal status.
    pub async fn finalize(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_cause: Option<String>,
    ) -> SchedulerResult<RetrievalJob> {
        if !status.is_terminal() {
            return Err(SchedulerError::Invalid(format!(
                "can't finalize a retrieval job with status {status}"
            )));
        }
        let mut state = self.state.lock().await;
        let mut job = self
            .repo
            .get_retrieval_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("retrieval job {job_id}")))?;
        if job.status.is_terminal() {
            return Err(SchedulerError::JobAlreadyFinal);
        }
        job.status = status;
        job.error_cause = error_cause.unwrap_or_default();
        self.repo.put_retrieval_job(&job).await?;
        state.executing_ids.remove(&job.id);
        state.queued.retain(|j| j.id != job.id);
        Ok(job)
    }

    pub async fn get(&self, job_id: &JobId) -> SchedulerResult<RetrievalJob> {
        self.repo
            .get_retrieval_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("retrieval job {job_id}")))
    }

    /// Ids of executing retrieval jobs; used to resume after a restart.
    pub async fn executing_job_ids(&self) -> Vec<JobId> {
        let state = self.state.lock().await;
        state.executing_ids.iter().cloned().collect()
    }
}
