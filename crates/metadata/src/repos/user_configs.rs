//! Per-user stored storage configurations.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{Cid, StorageConfig, UserId};

/// The cid column value holding a user's default config.
const DEFAULT_CONFIG_KEY: &str = "";

/// Repository for the configs a user currently has stored per cid, plus
/// the user's default config used when a push doesn't carry one.
#[async_trait]
pub trait UserConfigRepo: Send + Sync {
    async fn put_user_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
        config: &StorageConfig,
    ) -> MetadataResult<()>;

    async fn get_user_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> MetadataResult<Option<StorageConfig>>;

    async fn remove_user_config(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<()>;

    async fn put_default_config(
        &self,
        user_id: &UserId,
        config: &StorageConfig,
    ) -> MetadataResult<()>;

    async fn get_default_config(&self, user_id: &UserId)
        -> MetadataResult<Option<StorageConfig>>;
}

impl SqliteStore {
    async fn put_config_row(
        &self,
        user_id: &UserId,
        key: &str,
        config: &StorageConfig,
    ) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO user_configs (user_id, cid, config) VALUES (?, ?, ?)
             ON CONFLICT (user_id, cid) DO UPDATE SET config = excluded.config",
        )
        .bind(user_id.as_str())
        .bind(key)
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_config_row(
        &self,
        user_id: &UserId,
        key: &str,
    ) -> MetadataResult<Option<StorageConfig>> {
        let config: Option<String> =
            sqlx::query_scalar("SELECT config FROM user_configs WHERE user_id = ? AND cid = ?")
                .bind(user_id.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;
        config
            .map(|c| serde_json::from_str(&c).map_err(Into::into))
            .transpose()
    }
}

#[async_trait]
impl UserConfigRepo for SqliteStore {
    async fn put_user_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
        config: &StorageConfig,
    ) -> MetadataResult<()> {
        self.put_config_row(user_id, cid.as_str(), config).await
    }

    async fn get_user_config(
        &self,
        user_id: &UserId,
        cid: &Cid,
    ) -> MetadataResult<Option<StorageConfig>> {
        self.get_config_row(user_id, cid.as_str()).await
    }

    async fn remove_user_config(&self, user_id: &UserId, cid: &Cid) -> MetadataResult<()> {
        sqlx::query("DELETE FROM user_configs WHERE user_id = ? AND cid = ?")
            .bind(user_id.as_str())
            .bind(cid.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn put_default_config(
        &self,
        user_id: &UserId,
        config: &StorageConfig,
    ) -> MetadataResult<()> {
        self.put_config_row(user_id, DEFAULT_CONFIG_KEY, config)
            .await
    }

    async fn get_default_config(
        &self,
        user_id: &UserId,
    ) -> MetadataResult<Option<StorageConfig>> {
        self.get_config_row(user_id, DEFAULT_CONFIG_KEY).await
    }
}
