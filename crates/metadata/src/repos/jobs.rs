//! Storage job repository.

use crate::error::MetadataResult;
use crate::models::JobRow;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{Cid, Job, JobId, UserId};

/// Repository for storage job persistence.
///
/// The job store in the scheduler crate is the single authority for job
/// lifecycle; this repo only persists rows and reloads them at startup.
#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert or update a job row.
    async fn put_job(&self, job: &Job) -> MetadataResult<()>;

    /// Get a job by id.
    async fn get_job(&self, job_id: &JobId) -> MetadataResult<Option<Job>>;

    /// All persisted jobs, used to rebuild in-memory indices at startup.
    async fn all_jobs(&self) -> MetadataResult<Vec<Job>>;

    /// Jobs filtered by user and/or cid, ordered by creation time.
    async fn list_jobs(
        &self,
        user_id: Option<&UserId>,
        cid: Option<&Cid>,
        ascending: bool,
    ) -> MetadataResult<Vec<Job>>;
}

#[async_trait]
impl JobRepo for SqliteStore {
    async fn put_job(&self, job: &Job) -> MetadataResult<()> {
        let row = JobRow::from_job(job)?;
        sqlx::query(
            "INSERT INTO jobs (job_id, user_id, cid, status, error_cause, deal_errors, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (job_id) DO UPDATE SET
               status = excluded.status,
               error_cause = excluded.error_cause,
               deal_errors = excluded.deal_errors",
        )
        .bind(&row.job_id)
        .bind(&row.user_id)
        .bind(&row.cid)
        .bind(&row.status)
        .bind(&row.error_cause)
        .bind(&row.deal_errors)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_job(&self, job_id: &JobId) -> MetadataResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE job_id = ?")
            .bind(job_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.map(JobRow::into_job).transpose()
    }

    async fn all_jobs(&self) -> MetadataResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as("SELECT * FROM jobs ORDER BY created_at ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn list_jobs(
        &self,
        user_id: Option<&UserId>,
        cid: Option<&Cid>,
        ascending: bool,
    ) -> MetadataResult<Vec<Job>> {
        let order = if ascending { "ASC" } else { "DESC" };
        let rows: Vec<JobRow> = match (user_id, cid) {
            (Some(user), Some(cid)) => {
                sqlx::query_as(&format!(
                    "SELECT * FROM jobs WHERE user_id = ? AND cid = ? ORDER BY created_at {order}"
                ))
                .bind(user.as_str())
                .bind(cid.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            (Some(user), None) => {
                sqlx::query_as(&format!(
                    "SELECT * FROM jobs WHERE user_id = ? ORDER BY created_at {order}"
                ))
                .bind(user.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            (None, Some(cid)) => {
                sqlx::query_as(&format!(
                    "SELECT * FROM jobs WHERE cid = ? ORDER BY created_at {order}"
                ))
                .bind(cid.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            (None, None) => {
                sqlx::query_as(&format!("SELECT * FROM jobs ORDER BY created_at {order}"))
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(JobRow::into_job).collect()
    }
}
