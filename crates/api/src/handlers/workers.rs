//! Handlers for worker callbacks.
//!
//! Workers started by a provisioning job call these to join the pool,
//! report liveness and leave. An unknown worker gets a 404 with
//! `"error": "Worker not found"`, which tells it to re-register.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use farmlink_core::coordinator::WorkerRegistration;
use farmlink_core::registry::RegisterOutcome;
use farmlink_core::types::{JobId, WorkerId};

use crate::error::AppResult;
use crate::response::{Empty, SuccessResponse};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /register_worker
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterWorkerRequest {
    pub worker_id: WorkerId,
    pub worker_ip: String,
    pub worker_port: u16,
    pub job_id: Option<JobId>,
    /// Free-form metadata; non-string values are stored as their JSON text.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct Registered {
    pub worker_id: WorkerId,
    pub replaced: bool,
}

/// Register (or re-register) a worker.
pub async fn register_worker(
    State(state): State<AppState>,
    Json(input): Json<RegisterWorkerRequest>,
) -> AppResult<impl IntoResponse> {
    let metadata = input
        .metadata
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect();

    let outcome = state
        .coordinator
        .register_worker(WorkerRegistration {
            worker_id: input.worker_id.clone(),
            host: input.worker_ip,
            port: input.worker_port,
            job_id: input.job_id,
            metadata,
        })
        .await?;

    Ok(Json(SuccessResponse::new(Registered {
        worker_id: input.worker_id,
        replaced: outcome == RegisterOutcome::Replaced,
    })))
}

// ---------------------------------------------------------------------------
// POST /worker_heartbeat, POST /unregister_worker
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct WorkerIdRequest {
    pub worker_id: WorkerId,
}

pub async fn worker_heartbeat(
    State(state): State<AppState>,
    Json(input): Json<WorkerIdRequest>,
) -> AppResult<impl IntoResponse> {
    state.coordinator.heartbeat(&input.worker_id).await?;
    Ok(Json(SuccessResponse::new(Empty {})))
}

pub async fn unregister_worker(
    State(state): State<AppState>,
    Json(input): Json<WorkerIdRequest>,
) -> AppResult<impl IntoResponse> {
    state.coordinator.unregister_worker(&input.worker_id).await?;
    Ok(Json(SuccessResponse::new(Empty {})))
}
