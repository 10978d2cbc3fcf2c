pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{provisioning, workers};
use crate::state::AppState;

/// Coordinator routes, mounted at the root.
///
/// ```text
/// GET   /status             -> get_status
/// POST  /claim_workers      -> claim_workers
/// POST  /release_workers    -> release_workers
/// POST  /register_worker    -> register_worker
/// POST  /worker_heartbeat   -> worker_heartbeat
/// POST  /unregister_worker  -> unregister_worker
/// ```
pub fn coordinator_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(provisioning::get_status))
        .route("/claim_workers", post(provisioning::claim_workers))
        .route("/release_workers", post(provisioning::release_workers))
        .route("/register_worker", post(workers::register_worker))
        .route("/worker_heartbeat", post(workers::worker_heartbeat))
        .route("/unregister_worker", post(workers::unregister_worker))
}
