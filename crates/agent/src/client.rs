//! HTTP client for the coordinator's worker callback endpoints.

use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;

use farmlink_core::registry::{META_NAME, META_PLATFORM};
use farmlink_core::worker_pool::{
    CoordinatorAddress, HEARTBEAT_REQUEST_TIMEOUT_SECS, REGISTER_TIMEOUT_SECS,
};

use crate::identity::WorkerIdentity;

/// Metadata key carrying the computed seed.
pub const META_SEED: &str = "seed";

const PLATFORM: &str = "deadline";

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Coordinator request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The coordinator does not know this worker; it must re-register.
    #[error("Worker not found")]
    NotFound,

    #[error("Coordinator rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Body of `POST /register_worker`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterPayload {
    pub worker_id: String,
    pub worker_ip: String,
    pub worker_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl RegisterPayload {
    pub fn new(identity: &WorkerIdentity, job_id: Option<String>, seed: u64) -> Self {
        let metadata = BTreeMap::from([
            (META_NAME.to_string(), Value::from(identity.name.clone())),
            (META_PLATFORM.to_string(), Value::from(PLATFORM)),
            (META_SEED.to_string(), Value::from(seed)),
        ]);

        Self {
            worker_id: identity.worker_id.clone(),
            worker_ip: identity.host.clone(),
            worker_port: identity.port,
            job_id,
            metadata,
        }
    }
}

#[derive(Serialize)]
struct WorkerIdBody<'a> {
    worker_id: &'a str,
}

pub struct CoordinatorClient {
    http: reqwest::Client,
    base_url: String,
    register_timeout: Duration,
    heartbeat_timeout: Duration,
}

impl CoordinatorClient {
    pub fn new(coordinator: &CoordinatorAddress) -> Self {
        Self::with_base_url(format!("http://{coordinator}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            register_timeout: Duration::from_secs(REGISTER_TIMEOUT_SECS),
            heartbeat_timeout: Duration::from_secs(HEARTBEAT_REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn register(&self, payload: &RegisterPayload) -> Result<(), ClientError> {
        self.post("/register_worker", payload, self.register_timeout)
            .await
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), ClientError> {
        self.post(
            "/worker_heartbeat",
            &WorkerIdBody { worker_id },
            self.heartbeat_timeout,
        )
        .await
    }

    pub async fn unregister(&self, worker_id: &str) -> Result<(), ClientError> {
        self.post(
            "/unregister_worker",
            &WorkerIdBody { worker_id },
            self.heartbeat_timeout,
        )
        .await
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<(), ClientError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound);
        }

        // Error bodies are `{ "error": ... }`; fall back to the raw text.
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or(text);

        Err(ClientError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}
