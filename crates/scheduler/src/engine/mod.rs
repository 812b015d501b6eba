//! Reconciliation engine.
//!
//! Executes a dequeued job as a linear procedure that only suspends at
//! explicit points: chain queries, hot-tier I/O, deal-watcher waits, and
//! sleeps. Those suspension points double as cancellation points.

mod renewal;
mod retrieval;
mod storage;
mod waiter;

use crate::error::{SchedulerError, SchedulerResult};
use crate::joblog::JobLog;
use crate::jobstore::JobStore;
use permafrost_deals::DealWatcher;
use permafrost_metadata::MetadataStore;
use permafrost_tiers::{ColdStore, HotStorage};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reconciliation engine over the tier clients and stores.
pub(crate) struct Engine {
    pub store: Arc<dyn MetadataStore>,
    pub jobs: Arc<JobStore>,
    pub hot: Arc<HotStorage>,
    pub cold: Arc<dyn ColdStore>,
    pub watcher: Arc<DealWatcher>,
    pub log: Arc<JobLog>,
    /// Upper bound on waiting for a started deal's terminal state.
    pub deal_finality_timeout: Duration,
}

/// Run a fallible future, aborting with `Canceled` if the token fires
/// first. This is the engine's cancellation point.
pub(crate) async fn checked<T>(
    token: &CancellationToken,
    fut: impl Future<Output = SchedulerResult<T>>,
) -> SchedulerResult<T> {
    tokio::select! {
        _ = token.cancelled() => Err(SchedulerError::Canceled),
        res = fut => res,
    }
}

/// Like [`checked`], with a deadline. Elapsing maps to `Timeout`.
pub(crate) async fn checked_timeout<T>(
    duration: Duration,
    token: &CancellationToken,
    fut: impl Future<Output = SchedulerResult<T>>,
) -> SchedulerResult<T> {
    tokio::select! {
        _ = token.cancelled() => Err(SchedulerError::Canceled),
        res = tokio::time::timeout(duration, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(SchedulerError::Timeout),
        },
    }
}
