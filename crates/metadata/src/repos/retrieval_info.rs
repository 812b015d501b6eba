//! Retrieval info repository.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{RetrievalId, RetrievalInfo, UserId};

/// Repository for executed-retrieval results.
#[async_trait]
pub trait RetrievalInfoRepo: Send + Sync {
    async fn put_retrieval_info(&self, info: &RetrievalInfo) -> MetadataResult<()>;

    async fn get_retrieval_info(
        &self,
        user_id: &UserId,
        retrieval_id: &RetrievalId,
    ) -> MetadataResult<Option<RetrievalInfo>>;
}

#[async_trait]
impl RetrievalInfoRepo for SqliteStore {
    async fn put_retrieval_info(&self, info: &RetrievalInfo) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO retrieval_info (user_id, retrieval_id, info) VALUES (?, ?, ?)
             ON CONFLICT (user_id, retrieval_id) DO UPDATE SET info = excluded.info",
        )
        .bind(info.user_id.as_str())
        .bind(info.id.as_str())
        .bind(serde_json::to_string(info)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_retrieval_info(
        &self,
        user_id: &UserId,
        retrieval_id: &RetrievalId,
    ) -> MetadataResult<Option<RetrievalInfo>> {
        let info: Option<String> = sqlx::query_scalar(
            "SELECT info FROM retrieval_info WHERE user_id = ? AND retrieval_id = ?",
        )
        .bind(user_id.as_str())
        .bind(retrieval_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        info.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }
}
