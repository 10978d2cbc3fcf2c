#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use farmlink_agent::client::CoordinatorClient;

/// In-process stand-in for the coordinator's worker endpoints.
#[derive(Default)]
pub struct FakeCoordinator {
    workers: Mutex<HashMap<String, Value>>,
    pub registrations: AtomicUsize,
    pub heartbeats: AtomicUsize,
    pub unregistrations: AtomicUsize,
    /// Reject registrations with 503 while set.
    pub refuse_registration: AtomicBool,
    /// Reject this many upcoming registrations with 503.
    pub refuse_next: AtomicUsize,
    /// Arrival time of every registration request, accepted or not.
    pub registration_attempts: Mutex<Vec<Instant>>,
}

impl FakeCoordinator {
    pub fn knows(&self, worker_id: &str) -> bool {
        self.workers.lock().unwrap().contains_key(worker_id)
    }

    pub fn registered(&self, worker_id: &str) -> Option<Value> {
        self.workers.lock().unwrap().get(worker_id).cloned()
    }

    /// Gaps between consecutive registration requests.
    pub fn registration_gaps(&self) -> Vec<std::time::Duration> {
        let attempts = self.registration_attempts.lock().unwrap();
        attempts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Drop a worker, as a restart or stale eviction would.
    pub fn forget(&self, worker_id: &str) {
        self.workers.lock().unwrap().remove(worker_id);
    }
}

type Shared = Arc<FakeCoordinator>;

fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "success": false, "error": "Worker not found", "code": "NOT_FOUND" })),
    )
}

fn ok() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "success": true })))
}

async fn register(State(fake): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    fake.registration_attempts.lock().unwrap().push(Instant::now());
    let refuse_one = fake
        .refuse_next
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if refuse_one || fake.refuse_registration.load(Ordering::SeqCst) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "success": false, "error": "busy", "code": "UNAVAILABLE" })),
        );
    }
    let id = body["worker_id"].as_str().unwrap_or_default().to_string();
    fake.workers.lock().unwrap().insert(id, body);
    fake.registrations.fetch_add(1, Ordering::SeqCst);
    ok()
}

async fn heartbeat(State(fake): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let id = body["worker_id"].as_str().unwrap_or_default();
    if !fake.knows(id) {
        return not_found();
    }
    fake.heartbeats.fetch_add(1, Ordering::SeqCst);
    ok()
}

async fn unregister(State(fake): State<Shared>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    let id = body["worker_id"].as_str().unwrap_or_default();
    if fake.workers.lock().unwrap().remove(id).is_none() {
        return not_found();
    }
    fake.unregistrations.fetch_add(1, Ordering::SeqCst);
    ok()
}

/// Serve a fake coordinator on an ephemeral port.
pub async fn spawn_fake_coordinator() -> (Shared, SocketAddr) {
    let fake: Shared = Arc::new(FakeCoordinator::default());
    let app = Router::new()
        .route("/register_worker", post(register))
        .route("/worker_heartbeat", post(heartbeat))
        .route("/unregister_worker", post(unregister))
        .with_state(fake.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (fake, addr)
}

pub fn client_for(addr: SocketAddr) -> CoordinatorClient {
    CoordinatorClient::with_base_url(format!("http://{addr}"))
}
