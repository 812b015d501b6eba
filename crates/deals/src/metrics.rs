//! Prometheus metrics for the deal watcher.

use prometheus::{IntCounter, Registry};
use std::sync::LazyLock;

/// Updates delivered to at least one subscriber.
pub static DEAL_UPDATES_TRACKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "permafrost_deal_updates_tracked_total",
        "Deal updates that matched a subscribed proposal",
    )
    .expect("metric creation failed")
});

/// Updates for proposals nobody is subscribed to.
pub static DEAL_UPDATES_UNTRACKED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "permafrost_deal_updates_untracked_total",
        "Deal updates without a subscribed proposal",
    )
    .expect("metric creation failed")
});

/// Unexpected closes of the upstream deal-update stream.
pub static DEAL_UPDATE_STREAM_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "permafrost_deal_update_stream_failures_total",
        "Unexpected closes of the chain deal-update stream",
    )
    .expect("metric creation failed")
});

/// Register the watcher metrics with a registry. Safe to call once per
/// process.
pub fn register_metrics(registry: &Registry) {
    let _ = registry.register(Box::new(DEAL_UPDATES_TRACKED.clone()));
    let _ = registry.register(Box::new(DEAL_UPDATES_UNTRACKED.clone()));
    let _ = registry.register(Box::new(DEAL_UPDATE_STREAM_FAILURES.clone()));
}
