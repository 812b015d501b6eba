//! Job log repository.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::{LogEntry, UserId};

/// Repository for structured job-log entries, keyed by
/// (user, cid-or-retrieval-id, timestamp).
#[async_trait]
pub trait JobLogRepo: Send + Sync {
    async fn append_log(&self, entry: &LogEntry) -> MetadataResult<()>;

    /// All entries for a (user, target) ascending by timestamp. The target
    /// is a cid or a retrieval id.
    async fn logs_by_target(&self, user_id: &UserId, target: &str)
        -> MetadataResult<Vec<LogEntry>>;
}

fn entry_target(entry: &LogEntry) -> &str {
    if let Some(cid) = &entry.cid {
        return cid.as_str();
    }
    if let Some(rid) = &entry.retrieval_id {
        return rid.as_str();
    }
    ""
}

#[async_trait]
impl JobLogRepo for SqliteStore {
    async fn append_log(&self, entry: &LogEntry) -> MetadataResult<()> {
        sqlx::query(
            "INSERT INTO job_logs (user_id, target, timestamp, entry) VALUES (?, ?, ?, ?)
             ON CONFLICT (user_id, target, timestamp) DO UPDATE SET entry = excluded.entry",
        )
        .bind(entry.user_id.as_str())
        .bind(entry_target(entry))
        .bind(entry.timestamp)
        .bind(serde_json::to_string(entry)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn logs_by_target(
        &self,
        user_id: &UserId,
        target: &str,
    ) -> MetadataResult<Vec<LogEntry>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT entry FROM job_logs WHERE user_id = ? AND target = ? ORDER BY timestamp ASC",
        )
        .bind(user_id.as_str())
        .bind(target)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| serde_json::from_str(r).map_err(Into::into))
            .collect()
    }
}
