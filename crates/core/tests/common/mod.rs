#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use farmlink_core::coordinator::{ClaimRequest, Coordinator, WorkerRegistration};
use farmlink_core::gateway::{FarmSummary, GatewayError, ProvisioningRequest, SchedulerGateway};
use farmlink_core::registry::WorkerRegistry;
use farmlink_core::snapshot::InMemorySnapshotStore;
use farmlink_core::types::JobId;

pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Scripted in-process scheduler.
#[derive(Default)]
pub struct FakeGateway {
    unavailable: bool,
    submit_results: Mutex<VecDeque<Result<JobId, GatewayError>>>,
    failing_cancels: Mutex<HashSet<JobId>>,
    next_id: AtomicU64,
    submitted: Mutex<Vec<ProvisioningRequest>>,
    cancelled: Mutex<Vec<JobId>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Queue the result of the next `submit` call.
    pub fn push_submit(&self, result: Result<JobId, GatewayError>) {
        self.submit_results.lock().unwrap().push_back(result);
    }

    pub fn fail_cancel_for(&self, job_id: &str) {
        self.failing_cancels.lock().unwrap().insert(job_id.to_string());
    }

    pub fn submitted(&self) -> Vec<ProvisioningRequest> {
        self.submitted.lock().unwrap().clone()
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

    async fn submit(&self, request: &ProvisioningRequest) -> Result<JobId, GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable("fake".into()));
        }
        self.submitted.lock().unwrap().push(request.clone());
        let scripted = self.submit_results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            let n = self.next_id.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{n:024x}"))
        })
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), GatewayError> {
        if self.unavailable {
            return Err(GatewayError::Unavailable("fake".into()));
        }
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
            return Err(GatewayError::Unavailable("fake".into()));
        }
        Ok(FarmSummary { total: 10, idle: 4 })
    }
}

pub struct Harness {
    pub coordinator: Coordinator,
    pub gateway: Arc<FakeGateway>,
    pub snapshot: Arc<InMemorySnapshotStore>,
}

pub fn harness_with(gateway: FakeGateway) -> Harness {
    let gateway = Arc::new(gateway);
    let snapshot = Arc::new(InMemorySnapshotStore::new());
    let registry = Arc::new(WorkerRegistry::new(HEARTBEAT_TIMEOUT, snapshot.clone()));
    Harness {
        coordinator: Coordinator::new(registry, gateway.clone()),
        gateway,
        snapshot,
    }
}

pub fn harness() -> Harness {
    harness_with(FakeGateway::new())
}

pub fn claim(count: u32) -> ClaimRequest {
    ClaimRequest {
        count,
        coordinator: "10.0.0.5:8188".to_string(),
        priority: None,
        pool: None,
        group: None,
    }
}

pub fn worker(id: &str, port: u16, job_id: Option<&str>) -> WorkerRegistration {
    WorkerRegistration {
        worker_id: id.to_string(),
        host: "10.0.1.20".to_string(),
        port,
        job_id: job_id.map(str::to_string),
        metadata: Default::default(),
    }
}
