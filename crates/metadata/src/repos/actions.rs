//! Job action repository.

use crate::error::{MetadataError, MetadataResult};
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{JobId, RetrievalAction, StorageAction};

const KIND_STORAGE: &str = "storage";
const KIND_RETRIEVAL: &str = "retrieval";

/// Repository for job actions. Actions are written once with their job
/// and never mutated.
#[async_trait]
pub trait ActionRepo: Send + Sync {
    async fn put_storage_action(
        &self,
        job_id: &JobId,
        action: &StorageAction,
    ) -> MetadataResult<()>;

    /// Returns `NotFound` if no storage action exists for the job.
    async fn get_storage_action(&self, job_id: &JobId) -> MetadataResult<StorageAction>;

    async fn put_retrieval_action(
        &self,
        job_id: &JobId,
        action: &RetrievalAction,
    ) -> MetadataResult<()>;

    /// Returns `NotFound` if no retrieval action exists for the job.
    async fn get_retrieval_action(&self, job_id: &JobId) -> MetadataResult<RetrievalAction>;
}

impl SqliteStore {
    async fn put_action(&self, job_id: &JobId, kind: &str, payload: String) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO actions (job_id, kind, payload) VALUES (?, ?, ?)
             ON CONFLICT (job_id) DO UPDATE SET kind = excluded.kind, payload = excluded.payload",
        )
        .bind(job_id.as_str())
        .bind(kind)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_action_payload(&self, job_id: &JobId, kind: &str) -> MetadataResult<String> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM actions WHERE job_id = ? AND kind = ?")
                .bind(job_id.as_str())
                .bind(kind)
                .fetch_optional(&self.pool)
                .await?;
        payload.ok_or_else(|| MetadataError::NotFound(format!("{kind} action for job {job_id}")))
    }
}

#[async_trait]
impl ActionRepo for SqliteStore {
    async fn put_storage_action(
        &self,
        job_id: &JobId,
        action: &StorageAction,
    ) -> MetadataResult<()> {
        self.put_action(job_id, KIND_STORAGE, serde_json::to_string(action)?)
            .await
    }

    async fn get_storage_action(&self, job_id: &JobId) -> MetadataResult<StorageAction> {
        let payload = self.get_action_payload(job_id, KIND_STORAGE).await?;
        Ok(serde_json::from_str(&payload)?)
    }

    async fn put_retrieval_action(
        &self,
        job_id: &JobId,
        action: &RetrievalAction,
    ) -> MetadataResult<()> {
        self.put_action(job_id, KIND_RETRIEVAL, serde_json::to_string(action)?)
            .await
    }

    async fn get_retrieval_action(&self, job_id: &JobId) -> MetadataResult<RetrievalAction> {
        let payload = self.get_action_payload(job_id, KIND_RETRIEVAL).await?;
        Ok(serde_json::from_str(&payload)?)
    }
}
