//! Periodic eviction of workers that stopped heartbeating.
//!
//! The registry already evicts lazily whenever it is listed. This task keeps
//! the shared snapshot fresh for consumers that never call the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use farmlink_core::registry::WorkerRegistry;
use tokio_util::sync::CancellationToken;

/// Run the liveness sweep loop until `cancel` is triggered.
pub async fn run(registry: Arc<WorkerRegistry>, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        heartbeat_timeout_secs = registry.heartbeat_timeout().as_secs(),
        "Liveness sweep started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Liveness sweep stopping");
                break;
            }
            _ = ticker.tick() => {
                let evicted = registry.sweep().await;
                if evicted > 0 {
                    tracing::info!(evicted, "Liveness sweep: evicted stale workers");
                } else {
                    tracing::debug!("Liveness sweep: all workers live");
                }
            }
        }
    }
}
