//! Deal records query surface.

use crate::error::{DealsError, DealsResult};
use permafrost_core::{DealRecordsFilter, RetrievalDealRecord, StorageDealRecord};
use permafrost_metadata::DealRecordRepo;
use std::sync::Arc;

/// Filtered listing over the journaled storage and retrieval deal
/// records.
pub struct DealRecords {
    repo: Arc<dyn DealRecordRepo>,
}

impl DealRecords {
    pub fn new(repo: Arc<dyn DealRecordRepo>) -> Self {
        Self { repo }
    }

    /// List storage-deal records per the filter, sorted by `time`.
    pub async fn list_storage_records(
        &self,
        filter: &DealRecordsFilter,
    ) -> DealsResult<Vec<StorageDealRecord>> {
        if !filter.include_pending && !filter.include_final {
            return Err(DealsError::Invalid(
                "at least one of include_pending and include_final is required".to_string(),
            ));
        }

        let mut combined = Vec::new();
        if filter.include_final {
            combined.extend(self.repo.final_storage_records().await?);
        }
        if filter.include_pending {
            combined.extend(self.repo.pending_storage_records().await?);
        }

        let mut records: Vec<StorageDealRecord> = combined
            .into_iter()
            .filter(|r| {
                let addr_match =
                    filter.from_addrs.is_empty() || filter.from_addrs.contains(&r.addr);
                let cid_match =
                    filter.data_cids.is_empty() || filter.data_cids.contains(&r.root_cid);
                let failed_match = !filter.include_failed || r.is_failed();
                addr_match && cid_match && failed_match
            })
            .collect();
        sort_by_time(&mut records, filter.ascending, |r| r.time);
        Ok(records)
    }

    /// List retrieval-deal records per the filter, sorted by `time`.
    /// Pending/final flags don't apply to retrievals.
    pub async fn list_retrieval_records(
        &self,
        filter: &DealRecordsFilter,
    ) -> DealsResult<Vec<RetrievalDealRecord>> {
        let mut records: Vec<RetrievalDealRecord> = self
            .repo
            .retrieval_records()
            .await?
            .into_iter()
            .filter(|r| {
                let addr_match =
                    filter.from_addrs.is_empty() || filter.from_addrs.contains(&r.addr);
                let cid_match = filter.data_cids.is_empty()
                    || filter.data_cids.contains(&r.deal_info.root_cid);
                let failed_match = !filter.include_failed || r.is_failed();
                addr_match && cid_match && failed_match
            })
            .collect();
        sort_by_time(&mut records, filter.ascending, |r| r.time);
        Ok(records)
    }

    /// Storage records updated after the cursor; administrative sync.
    pub async fn storage_records_updated_since(
        &self,
        since_nanos: i64,
        limit: u32,
    ) -> DealsResult<Vec<StorageDealRecord>> {
        Ok(self
            .repo
            .storage_records_updated_since(since_nanos, limit)
            .await?)
    }

    /// Retrieval records updated after the cursor; administrative sync.
    pub async fn retrieval_records_updated_since(
        &self,
        since_nanos: i64,
        limit: u32,
    ) -> DealsResult<Vec<RetrievalDealRecord>> {
        Ok(self
            .repo
            .retrieval_records_updated_since(since_nanos, limit)
            .await?)
    }
}

fn sort_by_time<T>(records: &mut [T], ascending: bool, time: impl Fn(&T) -> i64) {
    records.sort_by_key(&time);
    if !ascending {
        records.reverse();
    }
}
