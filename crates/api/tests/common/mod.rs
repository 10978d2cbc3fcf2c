#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use farmlink_api::config::ServerConfig;
use farmlink_api::router::build_app_router;
use farmlink_api::state::AppState;
use farmlink_core::coordinator::Coordinator;
use farmlink_core::gateway::{FarmSummary, GatewayError, ProvisioningRequest, SchedulerGateway};
use farmlink_core::registry::WorkerRegistry;
use farmlink_core::snapshot::InMemorySnapshotStore;
use farmlink_core::types::JobId;

// ---------------------------------------------------------------------------
// Fake scheduler
// ---------------------------------------------------------------------------

/// Scripted in-process scheduler.
#[derive(Default)]
pub struct FakeGateway {
    unavailable: bool,
    submit_results: Mutex<VecDeque<Result<JobId, GatewayError>>>,
    failing_cancels: Mutex<HashSet<JobId>>,
    next_id: AtomicU64,
    cancelled: Mutex<Vec<JobId>>,
}

impl FakeGateway {
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    pub fn push_submit(&self, result: Result<JobId, GatewayError>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    pub fn fail_cancel_for(&self, job_id: &str) {
        self.failing_cancels.lock().unwrap().insert(job_id.to_string());
    }

    pub fn cancelled(&self) -> Vec<JobId> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchedulerGateway for FakeGateway {
    fn is_available(&self) -> bool {
        !self.unavailable
    }

    async fn submit(&self, _request: &ProvisioningRequest) -> Result<JobId, GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable("deadlinecommand not found".into()));
        }
        let scripted = self.submit_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("{n:024x}"))
        })
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), GatewayError> {
        if self.failing_cancels.lock().unwrap().contains(job_id) {
            return Err(GatewayError::CancelFailed {
                job_id: job_id.to_string(),
                exit_code: 1,
                stderr: "job is locked".into(),
            });
        }
        self.cancelled.lock().unwrap().push(job_id.to_string());
        Ok(())
    }

    async fn farm_status(&self) -> Result<FarmSummary, GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable("deadlinecommand not found".into()));
        }
        Ok(FarmSummary { total: 8, idle: 3 })
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:8188".to_string()],
        request_timeout_secs: 60,
        shutdown_timeout_secs: 5,
        deadline_path: None,
        deadline_plugin: "ComfyUI".to_string(),
        heartbeat_timeout_secs: 60,
        sweep_interval_secs: 0,
        snapshot_path: None,
    }
}

/// The router under test plus handles to its collaborators.
pub struct TestApp {
    pub router: Router,
    pub gateway: Arc<FakeGateway>,
    pub registry: Arc<WorkerRegistry>,
    pub snapshot: Arc<InMemorySnapshotStore>,
}

impl TestApp {
    /// A fresh clone of the router, ready for `oneshot`.
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full application router around the given fake scheduler.
///
/// Uses the production [`build_app_router`] so tests exercise the same
/// middleware stack.
pub fn build_test_app_with(gateway: FakeGateway) -> TestApp {
    let config = test_config();
    let gateway = Arc::new(gateway);
    let snapshot = Arc::new(InMemorySnapshotStore::new());
    let registry = Arc::new(WorkerRegistry::new(
        Duration::from_secs(config.heartbeat_timeout_secs),
        snapshot.clone(),
    ));
    let coordinator = Arc::new(Coordinator::new(registry.clone(), gateway.clone()));

    let state = AppState { coordinator };

    TestApp {
        router: build_app_router(state, &config),
        gateway,
        registry,
        snapshot,
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(FakeGateway::default())
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_raw(app, uri, body.to_string()).await
}

pub async fn post_raw(app: Router, uri: &str, body: impl Into<String>) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.into()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
