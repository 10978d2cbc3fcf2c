use std::sync::Arc;

use farmlink_core::coordinator::Coordinator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Owner of the worker registry and the active provisioning jobs.
    pub coordinator: Arc<Coordinator>,
}
