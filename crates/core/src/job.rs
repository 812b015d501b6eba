//! Storage and retrieval jobs, their statuses, and job-log entries.

use crate::ids::{Cid, JobId, RetrievalId, UserId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting in the scheduler queue.
    Queued,
    /// Currently being executed by a worker.
    Executing,
    /// Executed within expected behavior.
    Success,
    /// Executed with a failure; `error_cause` carries the reason.
    Failed,
    /// Canceled before or during execution.
    Canceled,
}

impl JobStatus {
    /// True for Success, Failed, and Canceled. A terminal status is
    /// forever stable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Executing => "executing",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "executing" => Some(JobStatus::Executing),
            "success" => Some(JobStatus::Success),
            "failed" => Some(JobStatus::Failed),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A storage task executed by the scheduler for a (user, cid) pair.
///
/// Jobs are immutable once their status is terminal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub cid: Cid,
    pub status: JobStatus,
    /// Cause of a terminal failure, empty otherwise.
    #[serde(default)]
    pub error_cause: String,
    /// Proposal-level failures collected during execution. Non-fatal
    /// unless every proposal of the job failed.
    #[serde(default)]
    pub deal_errors: Vec<DealError>,
    /// Creation time in unix nanoseconds; the FIFO ordering key.
    pub created_at: i64,
}

impl Job {
    /// A fresh queued job for (user, cid), stamped with the current time.
    pub fn queued(user_id: UserId, cid: Cid) -> Self {
        Self {
            id: JobId::generate(),
            user_id,
            cid,
            status: JobStatus::Queued,
            error_cause: String::new(),
            deal_errors: Vec::new(),
            created_at: unix_nanos_now(),
        }
    }
}

/// A retrieval task executed by the scheduler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalJob {
    pub id: JobId,
    pub user_id: UserId,
    pub retrieval_id: RetrievalId,
    pub status: JobStatus,
    #[serde(default)]
    pub error_cause: String,
    pub created_at: i64,
}

impl RetrievalJob {
    pub fn queued(user_id: UserId, retrieval_id: RetrievalId) -> Self {
        Self {
            id: JobId::generate(),
            user_id,
            retrieval_id,
            status: JobStatus::Queued,
            error_cause: String::new(),
            created_at: unix_nanos_now(),
        }
    }
}

/// A proposal-level failure observed during job execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DealError {
    /// Proposal the failure belongs to, when one was created.
    pub proposal_cid: Option<Cid>,
    pub miner: String,
    pub message: String,
}

impl fmt::Display for DealError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// An entry of the per-(user, cid) structured job log.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub user_id: UserId,
    pub cid: Option<Cid>,
    pub retrieval_id: Option<RetrievalId>,
    pub job_id: Option<JobId>,
    /// Unix nanoseconds; entries for a (user, cid) are totally ordered
    /// by this field.
    pub timestamp: i64,
    pub message: String,
}

/// Current unix time in nanoseconds.
pub fn unix_nanos_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp_nanos() as i64
}
