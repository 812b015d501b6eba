//! SQLite-backed metadata store for the Permafrost storage coordinator.
//!
//! This crate persists every durable keyspace the coordinator relies on:
//! jobs and their actions, per-(user, cid) storage info, the started-deals
//! recovery trail, the deal-record journals, job logs, hot-pin references,
//! tracked configs for renewal/repair, and per-user stored configs.
//!
//! Higher layers own all in-memory indices and invariants; this crate is
//! plain row storage with a small amount of lifted filter columns.

pub mod error;
pub mod models;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use repos::{
    ActionRepo, DealRecordRepo, JobLogRepo, JobRepo, PinRepo, RetrievalInfoRepo, RetrievalJobRepo,
    StartedDealsRepo, StorageInfoRepo, TrackedConfig, TrackedConfigRepo, UserConfigRepo,
};
pub use store::{MetadataStore, SqliteStore};
