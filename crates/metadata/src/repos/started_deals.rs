//! Started-deals recovery trail.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{Cid, UserId};

/// Durable record of in-flight proposals per (user, cid). Serves as the
/// recovery point to reattach to fired deals after an abrupt shutdown.
#[async_trait]
pub trait StartedDealsRepo: Send + Sync {
    async fn put_started_deals(
        &self,
        user_id: &UserId,
        cid: &Cid,
        proposals: &[Cid],
    ) -> MetadataResult<()>;

    /// Proposals recorded for (user, cid); empty if none.
    async fn get_started_deals(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<Vec<Cid>>;

    async fn remove_started_deals(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<()>;
}

#[async_trait]
impl StartedDealsRepo for SqliteStore {
    async fn put_started_deals(
        &self,
        user_id: &UserId,
        cid: &Cid,
        proposals: &[Cid],
    ) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO started_deals (user_id, cid, proposal_cids) VALUES (?, ?, ?)
             ON CONFLICT (user_id, cid) DO UPDATE SET proposal_cids = excluded.proposal_cids",
        )
        .bind(user_id.as_str())
        .bind(cid.as_str())
        .bind(serde_json::to_string(proposals)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_started_deals(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<Vec<Cid>> {
        let proposals: Option<String> = sqlx::query_scalar(
            "SELECT proposal_cids FROM started_deals WHERE user_id = ? AND cid = ?",
        )
        .bind(user_id.as_str())
        .bind(cid.as_str())
        .fetch_optional(&self.pool)
        .await?;
        match proposals {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Ok(Vec::new()),
        }
    }

    async fn remove_started_deals(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<()> {
        sqlx::query("DELETE FROM started_deals WHERE user_id = ? AND cid = ?")
            .bind(user_id.as_str())
            .bind(cid.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
