//! Handlers for farm status and provisioning-job lifecycle.
//!
//! Provides:
//! - `GET /status` for scheduler reachability, live workers and active jobs.
//! - `POST /claim_workers` to submit a provisioning job.
//! - `POST /release_workers` to cancel provisioning jobs.

use std::collections::BTreeMap;

use axum::body::Bytes;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use farmlink_core::coordinator::{ClaimRequest, ProvisioningJob};
use farmlink_core::registry::WorkerRecord;
use farmlink_core::types::{JobId, Timestamp, WorkerId};
use farmlink_core::worker_pool::CoordinatorAddress;

use crate::error::{AppError, AppResult};
use crate::response::SuccessResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /status
// ---------------------------------------------------------------------------

/// One live worker as reported by `/status`.
#[derive(Debug, Serialize)]
pub struct WorkerView {
    pub worker_id: WorkerId,
    pub host: String,
    pub port: u16,
    pub job_id: Option<JobId>,
    pub metadata: BTreeMap<String, String>,
    pub registered_at: Timestamp,
    pub last_heartbeat_secs: u64,
}

impl From<&WorkerRecord> for WorkerView {
    fn from(record: &WorkerRecord) -> Self {
        Self {
            worker_id: record.id.clone(),
            host: record.address.host.clone(),
            port: record.address.port,
            job_id: record.job_id.clone(),
            metadata: record.metadata.clone(),
            registered_at: record.registered_at,
            last_heartbeat_secs: record.heartbeat_age().as_secs(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub available: bool,
    pub available_workers: usize,
    pub claimed_workers: usize,
    pub total_workers: usize,
    pub active_jobs: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub workers: Vec<WorkerView>,
    pub jobs: Vec<ProvisioningJob>,
}

/// Report scheduler reachability and registry counts. Always 200; an
/// unreachable scheduler is reported in the body.
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.coordinator.status().await;

    Json(StatusResponse {
        available: status.available,
        available_workers: status.available_workers,
        claimed_workers: status.claimed_workers,
        total_workers: status.total_workers,
        active_jobs: status.active_jobs,
        error: status.error,
        workers: status.workers.iter().map(WorkerView::from).collect(),
        jobs: status.jobs,
    })
}

// ---------------------------------------------------------------------------
// POST /claim_workers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ClaimWorkersRequest {
    pub count: u32,
    /// Address workers should call back into (`host[:port]`, scheme tolerated).
    pub master_ws: String,
    pub priority: Option<u32>,
    pub pool: Option<String>,
    pub group: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ClaimedJob {
    pub job_id: JobId,
    pub requested_workers: u32,
    pub coordinator: CoordinatorAddress,
}

/// Submit a provisioning job for `count` workers.
pub async fn claim_workers(
    State(state): State<AppState>,
    Json(input): Json<ClaimWorkersRequest>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .coordinator
        .claim(ClaimRequest {
            count: input.count,
            coordinator: input.master_ws,
            priority: input.priority,
            pool: input.pool,
            group: input.group,
        })
        .await?;

    tracing::info!(job_id = %job.job_id, count = job.requested_workers, "Workers claimed");

    Ok(Json(SuccessResponse::new(ClaimedJob {
        job_id: job.job_id,
        requested_workers: job.requested_workers,
        coordinator: job.coordinator,
    })))
}

// ---------------------------------------------------------------------------
// POST /release_workers
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseWorkersRequest {
    /// Jobs to cancel; omitted or empty means every provisioning job.
    #[serde(default)]
    pub job_ids: Option<Vec<JobId>>,
}

#[derive(Debug, Serialize)]
pub struct FailedRelease {
    pub job_id: JobId,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct ReleasedJobs {
    pub released_jobs: usize,
    pub requested_jobs: usize,
    pub removed_workers: usize,
    pub job_ids: Vec<JobId>,
    pub unknown_jobs: Vec<JobId>,
    pub failed: Vec<FailedRelease>,
}

/// Cancel provisioning jobs. A partial release still succeeds; the count of
/// jobs actually released is in `released_jobs`.
///
/// The body is optional: an empty body releases everything.
pub async fn release_workers(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let input: ReleaseWorkersRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ReleaseWorkersRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| AppError::BadRequest(format!("Invalid release request: {e}")))?
    };

    let outcome = state.coordinator.release(input.job_ids).await;

    Ok(Json(SuccessResponse::new(ReleasedJobs {
        released_jobs: outcome.released.len(),
        requested_jobs: outcome.requested,
        removed_workers: outcome.removed_workers,
        job_ids: outcome.released,
        unknown_jobs: outcome.unknown,
        failed: outcome
            .failed
            .into_iter()
            .map(|(job_id, error)| FailedRelease { job_id, error })
            .collect(),
    })))
}
