//! Tracked storage-config repository for renewal and repair crons.

use crate::error::MetadataResult;
use crate::models::TrackedConfigRow;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{Cid, StorageConfig, UserId};

/// A tracked (user, cid, config) triple.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackedConfig {
    pub user_id: UserId,
    pub cid: Cid,
    pub config: StorageConfig,
}

/// Repository holding the latest storage config of every (user, cid) that
/// is renewable or repairable. The scheduler's background passes iterate
/// these to re-enqueue reconciliation work.
#[async_trait]
pub trait TrackedConfigRepo: Send + Sync {
    /// Update tracking for (user, cid). Renewable or repairable configs
    /// are upserted; others are removed if present.
    async fn put_tracked(
        &self,
        user_id: &UserId,
        cid: &Cid,
        config: &StorageConfig,
    ) -> MetadataResult<()>;

    async fn remove_tracked(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<()>;

    /// All tracked configs with renewals enabled.
    async fn renewables(&self) -> MetadataResult<Vec<TrackedConfig>>;

    /// All tracked configs with repair enabled.
    async fn repairables(&self) -> MetadataResult<Vec<TrackedConfig>>;
}

fn is_renewable(config: &StorageConfig) -> bool {
    config.cold.enabled && config.cold.filecoin.renew.enabled
}

impl SqliteStore {
    async fn tracked_where(&self, column: &str) -> MetadataResult<Vec<TrackedConfig>> {
        let rows: Vec<TrackedConfigRow> = sqlx::query_as(&format!(
            "SELECT user_id, cid, config FROM tracked_configs WHERE {column} = 1
             ORDER BY user_id, cid"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|row| {
                Ok(TrackedConfig {
                    user_id: UserId::new(row.user_id),
                    cid: Cid::new(row.cid),
                    config: serde_json::from_str(&row.config)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl TrackedConfigRepo for SqliteStore {
    async fn put_tracked(
        &self,
        user_id: &UserId,
        cid: &Cid,
        config: &StorageConfig,
    ) -> MetadataResult<()> {
        let renewable = is_renewable(config);
        let repairable = config.repairable;
        if !renewable && !repairable {
            return self.remove_tracked(user_id, cid).await;
        }
        sqlx::query(
            "INSERT INTO tracked_configs (user_id, cid, config, renewable, repairable)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (user_id, cid) DO UPDATE SET
               config = excluded.config,
               renewable = excluded.renewable,
               repairable = excluded.repairable",
        )
        .bind(user_id.as_str())
        .bind(cid.as_str())
        .bind(serde_json::to_string(config)?)
        .bind(renewable)
        .bind(repairable)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_tracked(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<()> {
        sqlx::query("DELETE FROM tracked_configs WHERE user_id = ? AND cid = ?")
            .bind(user_id.as_str())
            .bind(cid.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn renewables(&self) -> MetadataResult<Vec<TrackedConfig>> {
        self.tracked_where("renewable").await
    }

    async fn repairables(&self) -> MetadataResult<Vec<TrackedConfig>> {
        self.tracked_where("repairable").await
    }
}
