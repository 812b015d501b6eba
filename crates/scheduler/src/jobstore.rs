//! Storage job store: the single in-process authority for job lifecycle.
//!
//! Jobs persist through the metadata repo; this store owns the in-memory
//! queue and the per-(user, cid) mutual-exclusion map, both rebuilt from
//! the datastore at startup.

use crate::error::{SchedulerError, SchedulerResult};
use permafrost_core::{Cid, DealError, Job, JobId, JobStatus, UserId};
use permafrost_metadata::{JobRepo, MetadataStore, StartedDealsRepo};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};

/// Per-watcher buffer for job updates; slow watchers miss intermediate
/// states but always observe the most recent one at steady state.
const WATCHER_BUFFER: usize = 16;

/// Which jobs a listing selects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum JobSelect {
    #[default]
    All,
    Queued,
    Executing,
    Final,
}

/// Listing parameters for storage jobs.
#[derive(Clone, Debug, Default)]
pub struct ListJobsFilter {
    pub user_id: Option<UserId>,
    pub cid: Option<Cid>,
    pub select: JobSelect,
    pub ascending: bool,
    /// Zero means no limit.
    pub limit: usize,
    /// Slug from which the next page begins; minted by a previous call.
    pub next_page_token: String,
}

/// One page of a job listing.
#[derive(Clone, Debug, Default)]
pub struct JobsPage {
    pub jobs: Vec<Job>,
    pub more: bool,
    /// Empty when results were exhausted.
    pub next_page_token: String,
}

/// Queue totals for metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JobStats {
    pub total_queued: usize,
    pub total_executing: usize,
}

struct Watcher {
    user_id: UserId,
    sink: mpsc::Sender<Job>,
}

#[derive(Default)]
struct State {
    /// FIFO by created_at.
    queued: Vec<Job>,
    /// The per-(user, cid) mutual-exclusion map.
    executing: HashMap<(UserId, Cid), JobId>,
    queued_ids: HashSet<JobId>,
    executing_ids: HashSet<JobId>,
    watchers: Vec<Watcher>,
}

/// Persistent job queue with per-(user, cid) mutual exclusion and
/// watcher fan-out.
pub struct JobStore {
    repo: Arc<dyn MetadataStore>,
    state: Mutex<State>,
}

impl JobStore {
    /// Build the store, reloading queued and executing jobs from the
    /// datastore. The queued list comes back sorted by creation time.
    pub async fn load(repo: Arc<dyn MetadataStore>) -> SchedulerResult<Self> {
        let mut state = State::default();
        for job in repo.all_jobs().await? {
            match job.status {
                JobStatus::Queued => {
                    state.queued_ids.insert(job.id.clone());
                    state.queued.push(job);
                }
                JobStatus::Executing => {
                    state.executing_ids.insert(job.id.clone());
                    state
                        .executing
                        .insert((job.user_id.clone(), job.cid.clone()), job.id.clone());
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

    /// Queue a new job. Any queued job for the same (user, cid) is
    /// atomically canceled first: newest-queued wins.
    pub async fn enqueue(&self, mut job: Job) -> SchedulerResult<()> {
        let mut state = self.state.lock().await;

        let superseded: Vec<Job> = state
            .queued
            .iter()
            .filter(|j| j.user_id == job.user_id && j.cid == job.cid)
            .cloned()
            .collect();
        for mut old in superseded {
            old.status = JobStatus::Canceled;
            self.repo.put_job(&old).await?;
            state.queued.retain(|j| j.id != old.id);
            state.queued_ids.remove(&old.id);
            notify(&mut state.watchers, &old);
        }

        job.status = JobStatus::Queued;
        self.repo.put_job(&job).await?;
        state.queued_ids.insert(job.id.clone());
        state.queued.push(job.clone());
        notify(&mut state.watchers, &job);
        Ok(())
    }

    /// Dequeue the first queued job whose (user, cid) isn't currently
    /// executing, transitioning it to Executing. An optional user filter
    /// restricts eligibility. Returns `None` when nothing is eligible.
    pub async fn dequeue(&self, user_filter: Option<&UserId>) -> SchedulerResult<Option<Job>> {
        let mut state = self.state.lock().await;

        let idx = state.queued.iter().position(|job| {
            let pair = (job.user_id.clone(), job.cid.clone());
            let busy = state.executing.contains_key(&pair);
            let user_match = user_filter.is_none_or(|u| u == &job.user_id);
            !busy && user_match
        });
        let Some(idx) = idx else {
            return Ok(None);
        };

        let mut job = state.queued.remove(idx);
        state.queued_ids.remove(&job.id);
        job.status = JobStatus::Executing;
        self.repo.put_job(&job).await?;
        state
            .executing
            .insert((job.user_id.clone(), job.cid.clone()), job.id.clone());
        state.executing_ids.insert(job.id.clone());
        notify(&mut state.watchers, &job);
        Ok(Some(job))
    }

    /// Move a job to a terminal status. The executing slot is released
    /// only if it still maps to this job id.
    pub async fn finalize(
        &self,
        job_id: &JobId,
        status: JobStatus,
        error_cause: Option<String>,
        deal_errors: Vec<DealError>,
    ) -> SchedulerResult<Job> {
        if !status.is_terminal() {
            return Err(SchedulerError::Invalid(format!(
                "can't finalize a job with status {status}"
            )));
        }
        let mut state = self.state.lock().await;
        let mut job = self
            .repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))?;
        if job.status.is_terminal() {
            return Err(SchedulerError::JobAlreadyFinal);
        }

        job.status = status;
        job.error_cause = error_cause.unwrap_or_default();
        job.deal_errors = deal_errors;
        self.repo.put_job(&job).await?;

        let pair = (job.user_id.clone(), job.cid.clone());
        if state.executing.get(&pair) == Some(&job.id) {
            state.executing.remove(&pair);
        }
        state.executing_ids.remove(&job.id);
        state.queued.retain(|j| j.id != job.id);
        state.queued_ids.remove(&job.id);
        notify(&mut state.watchers, &job);
        Ok(job)
    }

    /// Cancel a job if it is still queued. Returns whether the job was
    /// actually canceled; a non-queued job is left untouched.
    pub async fn cancel_queued(&self, job_id: &JobId) -> SchedulerResult<bool> {
        let mut state = self.state.lock().await;
        let Some(idx) = state.queued.iter().position(|j| &j.id == job_id) else {
            // Not queued; the job must at least exist.
            self.repo
                .get_job(job_id)
                .await?
                .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))?;
            return Ok(false);
        };
        let mut job = state.queued.remove(idx);
        state.queued_ids.remove(&job.id);
        job.status = JobStatus::Canceled;
        self.repo.put_job(&job).await?;
        notify(&mut state.watchers, &job);
        Ok(true)
    }

    /// Current state of a job.
    pub async fn get(&self, job_id: &JobId) -> SchedulerResult<Job> {
        self.repo
            .get_job(job_id)
            .await?
            .ok_or_else(|| SchedulerError::NotFound(format!("job {job_id}")))
    }

    /// Job currently executing for (user, cid), if any.
    pub async fn executing_job(&self, user_id: &UserId, cid: &Cid) -> Option<JobId> {
        let state = self.state.lock().await;
        state
            .executing
            .get(&(user_id.clone(), cid.clone()))
            .cloned()
    }

    /// Ids of all executing jobs; used to resume after a restart.
    pub async fn executing_job_ids(&self) -> Vec<JobId> {
        let state = self.state.lock().await;
        state.executing_ids.iter().cloned().collect()
    }

    /// True if (user, cid) has a queued or executing job.
    pub async fn has_active_job(&self, user_id: &UserId, cid: &Cid) -> bool {
        let state = self.state.lock().await;
        state
            .executing
            .contains_key(&(user_id.clone(), cid.clone()))
            || state
                .queued
                .iter()
                .any(|j| &j.user_id == user_id && &j.cid == cid)
    }

    /// Cids with a queued or executing job; the staged-GC exclude list.
    pub async fn active_cids(&self) -> Vec<Cid> {
        let state = self.state.lock().await;
        let mut cids: HashSet<Cid> = state.queued.iter().map(|j| j.cid.clone()).collect();
        cids.extend(state.executing.keys().map(|(_, c)| c.clone()));
        cids.into_iter().collect()
    }

    /// Queue totals.
    pub async fn stats(&self) -> JobStats {
        let state = self.state.lock().await;
        JobStats {
            total_queued: state.queued.len(),
            total_executing: state.executing.len(),
        }
    }

    /// Cursor-paginated listing. The token is the id of the last job of
    /// the previous page; listing resumes right after it.
    pub async fn list(&self, filter: &ListJobsFilter) -> SchedulerResult<JobsPage> {
        let state = self.state.lock().await;
        let jobs = self
            .repo
            .list_jobs(filter.user_id.as_ref(), filter.cid.as_ref(), filter.ascending)
            .await?;

        let mut page = JobsPage::default();
        let mut past_token = filter.next_page_token.is_empty();
        let mut full = false;
        for job in jobs {
            if !past_token {
                if job.id.as_str() == filter.next_page_token {
                    past_token = true;
                }
                continue;
            }

            let selected = match filter.select {
                JobSelect::All => true,
                JobSelect::Queued => state.queued_ids.contains(&job.id),
                JobSelect::Executing => state.executing_ids.contains(&job.id),
                JobSelect::Final => {
                    !state.queued_ids.contains(&job.id) && !state.executing_ids.contains(&job.id)
                }
            };
            if !selected {
                continue;
            }

            if full {
                // One extra matching job proves there's another page.
                page.more = true;
                break;
            }
            page.next_page_token = job.id.as_str().to_string();
            page.jobs.push(job);
            if filter.limit > 0 && page.jobs.len() == filter.limit {
                full = true;
            }
        }
        if !page.more {
            page.next_page_token = String::new();
        }
        Ok(page)
    }

    /// Register a watcher for job changes of one user.
    pub async fn watch(&self, user_id: &UserId) -> mpsc::Receiver<Job> {
        let (tx, rx) = mpsc::channel(WATCHER_BUFFER);
        let mut state = self.state.lock().await;
        state.watchers.push(Watcher {
            user_id: user_id.clone(),
            sink: tx,
        });
        rx
    }

    /// Durable recovery trail of in-flight proposals for (user, cid).
    pub async fn add_started_deals(
        &self,
        user_id: &UserId,
        cid: &Cid,
        proposals: &[Cid],
    ) -> SchedulerResult<()> {
        Ok(self.repo.put_started_deals(user_id, cid, proposals).await?)
    }

    pub async fn get_started_deals(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> SchedulerResult<Vec<Cid>> {
        Ok(self.repo.get_started_deals(user_id, cid).await?)
    }

    pub async fn remove_started_deals(&self, user_id: &UserId, cid: &Cid) -> SchedulerResult<()> {
        Ok(self.repo.remove_started_deals(user_id, cid).await?)
    }
}

fn notify(watchers: &mut Vec<Watcher>, job: &Job) {
    watchers.retain(|w| {
        if w.user_id != job.user_id {
            return true;
        }
        match w.sink.try_send(job.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(job = %job.id, "slow job watcher skipped an update");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    });
}
