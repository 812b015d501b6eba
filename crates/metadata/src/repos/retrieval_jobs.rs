//! Retrieval job repository.

use crate::error::MetadataResult;
use crate::models::RetrievalJobRow;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{JobId, RetrievalJob};

/// Repository for retrieval job persistence.
#[async_trait]
pub trait RetrievalJobRepo: Send + Sync {
    async fn put_retrieval_job(&self, job: &RetrievalJob) -> MetadataResult<()>;

    async fn get_retrieval_job(&self, job_id: &JobId) -> MetadataResult<Option<RetrievalJob>>;

    /// All persisted retrieval jobs ordered by creation time.
    async fn all_retrieval_jobs(&self) -> MetadataResult<Vec<RetrievalJob>>;
}

#[async_trait]
impl RetrievalJobRepo for SqliteStore {
    async fn put_retrieval_job(&self, job: &RetrievalJob) -> MetadataResult<()> {
        let row = RetrievalJobRow::from_job(job);
        sqlx::query(
            "INSERT INTO retrieval_jobs (job_id, user_id, retrieval_id, status, error_cause, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (job_id) DO UPDATE SET
               status = excluded.status,
               error_cause = excluded.error_cause",
        )
        .bind(&row.job_id)
        .bind(&row.user_id)
        .bind(&row.retrieval_id)
        .bind(&row.status)
        .bind(&row.error_cause)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_retrieval_job(&self, job_id: &JobId) -> MetadataResult<Option<RetrievalJob>> {
        let row: Option<RetrievalJobRow> =
            sqlx::query_as("SELECT * FROM retrieval_jobs WHERE job_id = ?")
                .bind(job_id.as_str())
                .fetch_optional(&self.pool)
                .await?;
        row.map(RetrievalJobRow::into_job).transpose()
    }

    async fn all_retrieval_jobs(&self) -> MetadataResult<Vec<RetrievalJob>> {
        let rows: Vec<RetrievalJobRow> =
            sqlx::query_as("SELECT * FROM retrieval_jobs ORDER BY created_at ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter().map(RetrievalJobRow::into_job).collect()
    }
}
