//! Hot-pin reference repository.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{Cid, PinEntry, PinnedCid};

/// Repository persisting hot-tier pin references per cid. The hot storage
/// layer keeps an in-memory cache of these rows; persistence exists so
/// reference counts survive restarts.
#[async_trait]
pub trait PinRepo: Send + Sync {
    /// Persist the entry list for a cid. An empty list deletes the row.
    async fn put_pins(&self, cid: &Cid, entries: &[PinEntry]) -> MetadataResult<()>;

    async fn delete_pins(&self, cid: &Cid) -> MetadataResult<()>;

    /// All persisted pin rows, used to rebuild the cache at startup.
    async fn all_pins(&self) -> MetadataResult<Vec<PinnedCid>>;
}

#[async_trait]
impl PinRepo for SqliteStore {
    async fn put_pins(&self, cid: &Cid, entries: &[PinEntry]) -> MetadataResult<()> {
        if entries.is_empty() {
            return self.delete_pins(cid).await;
        }
        sqlx::query(
            "INSERT INTO pins (cid, entries) VALUES (?, ?)
             ON CONFLICT (cid) DO UPDATE SET entries = excluded.entries",
        )
        .bind(cid.as_str())
        .bind(serde_json::to_string(entries)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_pins(&self, cid: &Cid) -> MetadataResult<()> {
        sqlx::query("DELETE FROM pins WHERE cid = ?")
            .bind(cid.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn all_pins(&self) -> MetadataResult<Vec<PinnedCid>> {
        let rows: Vec<(String, String)> = sqlx::query_as("SELECT cid, entries FROM pins")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter()
            .map(|(cid, entries)| {
                let pins: Vec<PinEntry> = serde_json::from_str(&entries)?;
                Ok(PinnedCid {
                    cid: Cid::new(cid),
                    pins,
                })
            })
            .collect()
    }
}
