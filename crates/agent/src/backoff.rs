//! Registration retries with growing delays.
//!
//! [`register_with_backoff`] runs at startup and again whenever the
//! coordinator forgets this worker. A farm node is often started before the
//! coordinator is reachable, so failures are expected: each one is logged
//! with the wait before the next attempt, and the loop only ends on success
//! or cancellation.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{CoordinatorClient, RegisterPayload};

/// Delay schedule between failed registration attempts.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Wait after the first failure.
    pub initial_delay: Duration,
    /// Cap on any single wait.
    pub max_delay: Duration,
    /// Growth factor per failure. Values below `1.0` are treated as `1.0`.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl BackoffConfig {
    /// Waits between consecutive attempts: the first item follows the first
    /// failure. Never decreasing, capped at `max_delay`, never ending.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let factor = self.multiplier.max(1.0);
        std::iter::successors(Some(self.initial_delay.min(self.max_delay)), move |prev| {
            Some(prev.mul_f64(factor).min(self.max_delay))
        })
    }
}

/// How a call to [`register_with_backoff`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// The coordinator accepted the worker on attempt number `attempts`.
    Registered { attempts: u32 },
    /// Shutdown was requested after `attempts` failed attempts.
    Cancelled { attempts: u32 },
}

impl RegistrationOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

/// Register, retrying on any failure until accepted or `cancel` fires.
pub async fn register_with_backoff(
    client: &CoordinatorClient,
    payload: &RegisterPayload,
    config: &BackoffConfig,
    cancel: &CancellationToken,
) -> RegistrationOutcome {
    let mut delays = config.delays();
    let mut failures = 0u32;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = client.register(payload) => Some(result),
        };

        let err = match result {
            None => {
                tracing::info!(worker_id = %payload.worker_id, failures, "Registration cancelled");
                return RegistrationOutcome::Cancelled { attempts: failures };
            }
            Some(Ok(())) => {
                let attempts = failures + 1;
                tracing::info!(
                    worker_id = %payload.worker_id,
                    coordinator = client.base_url(),
                    attempts,
                    "Registered with coordinator",
                );
                return RegistrationOutcome::Registered { attempts };
            }
            Some(Err(e)) => e,
        };

        failures += 1;
        let wait = delays.next().unwrap_or(config.max_delay);
        tracing::warn!(
            worker_id = %payload.worker_id,
            attempt = failures,
            retry_in_ms = wait.as_millis() as u64,
            error = %err,
            "Registration failed",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker_id = %payload.worker_id, failures, "Registration cancelled");
                return RegistrationOutcome::Cancelled { attempts: failures };
            }
            _ = tokio::time::sleep(wait) => {}
        }
    }
}
