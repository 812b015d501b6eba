//! Deal-records journal repository.

use crate::error::MetadataResult;
use crate::store::SqliteStore;
use async_trait::async_trait;
use permafrost_core::job::unix_nanos_now;
use permafrost_core::{RetrievalDealRecord, StorageDealRecord};
use sha2::{Digest, Sha256};

/// Repository for the storage-deal and retrieval-deal journals.
///
/// A storage record starts pending and moves to final (possibly carrying
/// an error message) in a single transaction, so a crash never leaves a
/// proposal observable in both states.
#[async_trait]
pub trait DealRecordRepo: Send + Sync {
    /// Store a record. Pending records land in the pending keyspace;
    /// non-pending records atomically displace any pending entry for the
    /// same proposal.
    async fn put_storage_deal(&self, record: &StorageDealRecord) -> MetadataResult<()>;

    /// Atomically move a pending record to final with the given error.
    async fn error_pending_deal(
        &self,
        record: &StorageDealRecord,
        err_msg: &str,
    ) -> MetadataResult<()>;

    async fn pending_storage_records(&self) -> MetadataResult<Vec<StorageDealRecord>>;

    async fn final_storage_records(&self) -> MetadataResult<Vec<StorageDealRecord>>;

    async fn put_retrieval_record(&self, record: &RetrievalDealRecord) -> MetadataResult<()>;

    async fn retrieval_records(&self) -> MetadataResult<Vec<RetrievalDealRecord>>;

    /// Storage records with `updated_at > since`, ascending, capped at
    /// `limit`. Reserved for administrative sync.
    async fn storage_records_updated_since(
        &self,
        since_nanos: i64,
        limit: u32,
    ) -> MetadataResult<Vec<StorageDealRecord>>;

    /// Retrieval records with `updated_at > since`, ascending, capped at
    /// `limit`.
    async fn retrieval_records_updated_since(
        &self,
        since_nanos: i64,
        limit: u32,
    ) -> MetadataResult<Vec<RetrievalDealRecord>>;
}

/// Deterministic key for a retrieval record.
pub fn retrieval_record_key(record: &RetrievalDealRecord) -> String {
    let mut hasher = Sha256::new();
    hasher.update(record.time.to_be_bytes());
    hasher.update(record.addr.as_bytes());
    hasher.update(record.deal_info.miner.as_bytes());
    hasher.update(record.deal_info.root_cid.as_str().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

impl SqliteStore {
    async fn storage_records_where(
        &self,
        pending: bool,
    ) -> MetadataResult<Vec<StorageDealRecord>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT record FROM storage_deal_records WHERE pending = ? ORDER BY time ASC",
        )
        .bind(pending)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| serde_json::from_str(r).map_err(Into::into))
            .collect()
    }
}

#[async_trait]
impl DealRecordRepo for SqliteStore {
    async fn put_storage_deal(&self, record: &StorageDealRecord) -> MetadataResult<()> {
        let mut record = record.clone();
        record.updated_at = unix_nanos_now();
        let payload = serde_json::to_string(&record)?;
        let proposal_cid = record.deal_info.proposal_cid.as_str();

        let mut tx = self.pool.begin().await?;
        if !record.pending {
            sqlx::query("DELETE FROM storage_deal_records WHERE proposal_cid = ? AND pending = 1")
                .bind(proposal_cid)
                .execute(&mut *tx)
                .await?;
        }
        sqlx::query(
            "INSERT INTO storage_deal_records
               (proposal_cid, pending, addr, root_cid, time, err_msg, record, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (proposal_cid, pending) DO UPDATE SET
               addr = excluded.addr,
               root_cid = excluded.root_cid,
               time = excluded.time,
               err_msg = excluded.err_msg,
               record = excluded.record,
               updated_at = excluded.updated_at",
        )
        .bind(proposal_cid)
        .bind(record.pending)
        .bind(&record.addr)
        .bind(record.root_cid.as_str())
        .bind(record.time)
        .bind(&record.err_msg)
        .bind(&payload)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn error_pending_deal(
        &self,
        record: &StorageDealRecord,
        err_msg: &str,
    ) -> MetadataResult<()> {
        let mut finalized = record.clone();
        finalized.pending = false;
        finalized.err_msg = err_msg.to_string();
        self.put_storage_deal(&finalized).await
    }

    async fn pending_storage_records(&self) -> MetadataResult<Vec<StorageDealRecord>> {
        self.storage_records_where(true).await
    }

    async fn final_storage_records(&self) -> MetadataResult<Vec<StorageDealRecord>> {
        self.storage_records_where(false).await
    }

    async fn put_retrieval_record(&self, record: &RetrievalDealRecord) -> MetadataResult<()> {
        let mut record = record.clone();
        record.updated_at = unix_nanos_now();
        if record.id.is_empty() {
            record.id = retrieval_record_key(&record);
        }
        sqlx::query(
            "INSERT INTO retrieval_deal_records
               (id, addr, root_cid, time, err_msg, record, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (id) DO UPDATE SET
               err_msg = excluded.err_msg,
               record = excluded.record,
               updated_at = excluded.updated_at",
        )
        .bind(&record.id)
        .bind(&record.addr)
        .bind(record.deal_info.root_cid.as_str())
        .bind(record.time)
        .bind(&record.err_msg)
        .bind(serde_json::to_string(&record)?)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retrieval_records(&self) -> MetadataResult<Vec<RetrievalDealRecord>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT record FROM retrieval_deal_records ORDER BY time ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.iter()
            .map(|r| serde_json::from_str(r).map_err(Into::into))
            .collect()
    }

    async fn storage_records_updated_since(
        &self,
        since_nanos: i64,
        limit: u32,
    ) -> MetadataResult<Vec<StorageDealRecord>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT record FROM storage_deal_records
             WHERE updated_at > ? ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(since_nanos)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| serde_json::from_str(r).map_err(Into::into))
            .collect()
    }

    async fn retrieval_records_updated_since(
        &self,
        since_nanos: i64,
        limit: u32,
    ) -> MetadataResult<Vec<RetrievalDealRecord>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT record FROM retrieval_deal_records
             WHERE updated_at > ? ORDER BY updated_at ASC LIMIT ?",
        )
        .bind(since_nanos)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| serde_json::from_str(r).map_err(Into::into))
            .collect()
    }
}
