//! Repository traits for metadata operations.

pub mod actions;
pub mod deal_records;
pub mod job_logs;
pub mod jobs;
pub mod pins;
pub mod retrieval_info;
pub mod retrieval_jobs;
pub mod started_deals;
pub mod storage_info;
pub mod tracked;
pub mod user_configs;

pub use actions::ActionRepo;
pub use deal_records::DealRecordRepo;
pub use job_logs::JobLogRepo;
pub use jobs::JobRepo;
pub use pins::PinRepo;
pub use retrieval_info::RetrievalInfoRepo;
pub use retrieval_jobs::RetrievalJobRepo;
pub use started_deals::StartedDealsRepo;
pub use storage_info::StorageInfoRepo;
pub use tracked::{TrackedConfig, TrackedConfigRepo};
pub use user_configs::UserConfigRepo;
