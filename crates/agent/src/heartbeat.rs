//! Periodic heartbeat emitter.
//!
//! Sends `POST /worker_heartbeat` on a fixed interval until cancelled. When
//! the coordinator answers `Worker not found` (it restarted, or evicted this
//! worker as stale) the emitter re-registers before continuing. Other
//! failures are logged and the loop carries on.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::backoff::{register_with_backoff, BackoffConfig};
use crate::client::{ClientError, CoordinatorClient, RegisterPayload};

/// Counters reported when the emitter stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatStats {
    pub sent: u64,
    pub failed: u64,
    pub reregistrations: u64,
}

/// Run the heartbeat loop until `cancel` fires.
///
/// The first heartbeat goes out one `interval` after start; registration is
/// expected to have happened already.
pub async fn run(
    client: &CoordinatorClient,
    registration: &RegisterPayload,
    interval: Duration,
    backoff: &BackoffConfig,
    cancel: CancellationToken,
) -> HeartbeatStats {
    let mut stats = HeartbeatStats::default();
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        worker_id = %registration.worker_id,
        interval_secs = interval.as_secs(),
        "Heartbeat emitter started",
    );

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker_id = %registration.worker_id, "Heartbeat emitter stopping");
                break;
            }
            _ = ticker.tick() => {
                match client.heartbeat(&registration.worker_id).await {
                    Ok(()) => {
                        stats.sent += 1;
                        tracing::debug!(worker_id = %registration.worker_id, "Heartbeat sent");
                    }
                    Err(ClientError::NotFound) => {
                        stats.failed += 1;
                        tracing::warn!(
                            worker_id = %registration.worker_id,
                            "Coordinator lost this worker, re-registering",
                        );
                        if !register_with_backoff(client, registration, backoff, &cancel)
                            .await
                            .is_registered()
                        {
                            break;
                        }
                        stats.reregistrations += 1;
                    }
                    Err(e) => {
                        stats.failed += 1;
                        tracing::warn!(
                            worker_id = %registration.worker_id,
                            error = %e,
                            "Heartbeat failed",
                        );
                    }
                }
            }
        }
    }

    stats
}
