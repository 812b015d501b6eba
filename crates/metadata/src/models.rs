//! Database rows mapping to the metadata schema.

use crate::error::{MetadataError, MetadataResult};
use permafrost_core::{Cid, DealError, Job, JobId, JobStatus, RetrievalId, RetrievalJob, UserId};
use sqlx::FromRow;

/// Storage job row.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub job_id: String,
    pub user_id: String,
    pub cid: String,
    pub status: String,
    pub error_cause: String,
    pub deal_errors: String,
    pub created_at: i64,
}

impl JobRow {
    pub fn from_job(job: &Job) -> MetadataResult<Self> {
        Ok(Self {
            job_id: job.id.as_str().to_string(),
            user_id: job.user_id.as_str().to_string(),
            cid: job.cid.as_str().to_string(),
            status: job.status.as_str().to_string(),
            error_cause: job.error_cause.clone(),
            deal_errors: serde_json::to_string(&job.deal_errors)?,
            created_at: job.created_at,
        })
    }

    pub fn into_job(self) -> MetadataResult<Job> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| MetadataError::Internal(format!("unknown job status {}", self.status)))?;
        let deal_errors: Vec<DealError> = serde_json::from_str(&self.deal_errors)?;
        Ok(Job {
            id: JobId::new(self.job_id),
            user_id: UserId::new(self.user_id),
            cid: Cid::new(self.cid),
            status,
            error_cause: self.error_cause,
            deal_errors,
            created_at: self.created_at,
        })
    }
}

/// Retrieval job row.
#[derive(Debug, Clone, FromRow)]
pub struct RetrievalJobRow {
    pub job_id: String,
    pub user_id: String,
    pub retrieval_id: String,
    pub status: String,
    pub error_cause: String,
    pub created_at: i64,
}

impl RetrievalJobRow {
    pub fn from_job(job: &RetrievalJob) -> Self {
        Self {
            job_id: job.id.as_str().to_string(),
            user_id: job.user_id.as_str().to_string(),
            retrieval_id: job.retrieval_id.as_str().to_string(),
            status: job.status.as_str().to_string(),
            error_cause: job.error_cause.clone(),
            created_at: job.created_at,
        }
    }

    pub fn into_job(self) -> MetadataResult<RetrievalJob> {
        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| MetadataError::Internal(format!("unknown job status {}", self.status)))?;
        Ok(RetrievalJob {
            id: JobId::new(self.job_id),
            user_id: UserId::new(self.user_id),
            retrieval_id: RetrievalId::new(self.retrieval_id),
            status,
            error_cause: self.error_cause,
            created_at: self.created_at,
        })
    }
}

/// Tracked (renewable/repairable) storage config row, joined with its owner.
#[derive(Debug, Clone, FromRow)]
pub struct TrackedConfigRow {
    pub user_id: String,
    pub cid: String,
    pub config: String,
}
