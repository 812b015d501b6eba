//! Storage info repository.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::job::unix_nanos_now;
use permafrost_core::{Cid, StorageInfo, UserId};

/// Repository for the authoritative per-(user, cid) storage view.
/// Last-writer wins; the writer is always the reconciliation engine or
/// an explicit import.
#[async_trait]
pub trait StorageInfoRepo: Send + Sync {
    async fn put_storage_info(&self, info: &StorageInfo) -> MetadataResult<()>;

    async fn get_storage_info(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> MetadataResult<Option<StorageInfo>>;

    /// List infos restricted to the given users and/or cids. Empty slices
    /// mean no filtering on that dimension.
    async fn list_storage_info(
        &self,
        user_ids: &[UserId],
        cids: &[Cid],
    ) -> MetadataResult<Vec<StorageInfo>>;
}

#[async_trait]
impl StorageInfoRepo for SqliteStore {
    async fn put_storage_info(&self, info: &StorageInfo) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO storage_info (user_id, cid, info, updated_at) VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, cid) DO UPDATE SET
               info = excluded.info,
               updated_at = excluded.updated_at",
        )
        .bind(info.user_id.as_str())
        .bind(info.cid.as_str())
        .bind(serde_json::to_string(info)?)
        .bind(unix_nanos_now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_storage_info(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> MetadataResult<Option<StorageInfo>> {
        let info: Option<String> =
            sqlx::query_scalar("SELECT info FROM storage_info WHERE user_id = ? AND cid = ?")
                .bind(user_id.as_str())
                .bind(cid.as_str())
                .fetch_optional(&self.pool)
                .await?;
        info.map(|s| serde_json::from_str(&s).map_err(Into::into))
            .transpose()
    }

    async fn list_storage_info(
        &self,
        user_ids: &[UserId],
        cids: &[Cid],
    ) -> MetadataResult<Vec<StorageInfo>> {
        let rows: Vec<(String, String, String)> =
            sqlx::query_as("SELECT user_id, cid, info FROM storage_info ORDER BY user_id, cid")
                .fetch_all(&self.pool)
                .await?;

        let mut infos = Vec::new();
        for (user_id, cid, info) in rows {
            let user_match =
                user_ids.is_empty() || user_ids.iter().any(|u| u.as_str() == user_id);
            let cid_match = cids.is_empty() || cids.iter().any(|c| c.as_str() == cid);
            if user_match && cid_match {
                infos.push(serde_json::from_str(&info)?);
            }
        }
        Ok(infos)
    }
}
