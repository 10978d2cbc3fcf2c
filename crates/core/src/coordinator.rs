//! Coordinator façade over the worker registry and the scheduler gateway.
//!
//! Owns the active provisioning-job table. Handlers call into this type
//! only; it never holds the job table lock across a scheduler command.
//!
//! Submissions run on their own task. A caller that goes away mid-claim
//! (client disconnect, request timeout) does not interrupt the scheduler
//! command, and an accepted job is still recorded.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::CoreError;
use crate::gateway::{GatewayError, ProvisioningRequest, SchedulerGateway};
use crate::registry::{
    RegisterOutcome, Registration, WorkerAddress, WorkerRecord, WorkerRegistry,
};
use crate::types::{JobId, Timestamp, WorkerId};
use crate::worker_pool;
use crate::worker_pool::CoordinatorAddress;

/// What a tracked scheduler job was submitted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    /// Started by a claim; eligible for release-all.
    DistributedWorkers,
    /// Submitted elsewhere and adopted for tracking; released only by id.
    Batch,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProvisioningJob {
    pub job_id: JobId,
    pub kind: JobKind,
    pub requested_workers: u32,
    pub coordinator: CoordinatorAddress,
    pub submitted_at: Timestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Raw claim input before validation.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub count: u32,
    pub coordinator: String,
    pub priority: Option<u32>,
    pub pool: Option<String>,
    pub group: Option<String>,
}

/// Raw registration input before validation.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub worker_id: WorkerId,
    pub host: String,
    pub port: u16,
    pub job_id: Option<JobId>,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    /// Whether the scheduler answered the farm query.
    pub available: bool,
    /// Idle machines reported by the scheduler.
    pub available_workers: usize,
    /// All machines reported by the scheduler.
    pub total_workers: usize,
    /// Live workers in the registry.
    pub claimed_workers: usize,
    pub active_jobs: usize,
    /// Why the scheduler query failed, if it did.
    pub error: Option<String>,
    pub workers: Vec<WorkerRecord>,
    pub jobs: Vec<ProvisioningJob>,
}

#[derive(Debug, Default)]
pub struct ReleaseOutcome {
    /// Jobs confirmed cancelled and removed by this call.
    pub released: Vec<JobId>,
    /// Jobs this call attempted to cancel.
    pub requested: usize,
    /// Ids that were not active and were skipped.
    pub unknown: Vec<JobId>,
    /// Jobs the scheduler refused to cancel, with the reason.
    pub failed: Vec<(JobId, String)>,
    /// Registry entries dropped because their job was released.
    pub removed_workers: usize,
}

pub struct Coordinator {
    registry: Arc<WorkerRegistry>,
    gateway: Arc<dyn SchedulerGateway>,
    jobs: Arc<RwLock<HashMap<JobId, ProvisioningJob>>>,
}

impl Coordinator {
    pub fn new(registry: Arc<WorkerRegistry>, gateway: Arc<dyn SchedulerGateway>) -> Self {
        Self {
            registry,
            gateway,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn scheduler_available(&self) -> bool {
        self.gateway.is_available()
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub async fn status(&self) -> CoordinatorStatus {
        let (available, available_workers, total_workers, error) =
            match self.gateway.farm_status().await {
                Ok(summary) => (true, summary.idle, summary.total, None),
                Err(e) => {
                    tracing::debug!(error = %e, "Farm status query failed");
                    (false, 0, 0, Some(e.to_string()))
                }
            };

        let workers = self.registry.list_active().await;
        let jobs = self.active_jobs().await;

        CoordinatorStatus {
            available,
            available_workers,
            total_workers,
            claimed_workers: workers.len(),
            active_jobs: jobs.len(),
            error,
            workers,
            jobs,
        }
    }

    /// Active provisioning jobs, oldest first.
    pub async fn active_jobs(&self) -> Vec<ProvisioningJob> {
        let mut jobs: Vec<ProvisioningJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| {
            a.submitted_at
                .cmp(&b.submitted_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        jobs
    }

    // -----------------------------------------------------------------------
    // Claim / release
    // -----------------------------------------------------------------------

    /// Submit a provisioning job. It is recorded only once the scheduler
    /// returns a job id.
    pub async fn claim(&self, request: ClaimRequest) -> Result<ProvisioningJob, CoordinatorError> {
        worker_pool::validate_claim_count(request.count)?;
        let priority = request.priority.unwrap_or(worker_pool::DEFAULT_PRIORITY);
        worker_pool::validate_priority(priority)?;
        let coordinator = CoordinatorAddress::parse(&request.coordinator)?;

        let provisioning = ProvisioningRequest {
            count: request.count,
            coordinator,
            priority,
            pool: request.pool,
            group: request.group,
        };

        let gateway = Arc::clone(&self.gateway);
        let jobs = Arc::clone(&self.jobs);
        let submission = tokio::spawn(async move {
            let job_id = match gateway.submit(&provisioning).await {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(
                        count = provisioning.count,
                        coordinator = %provisioning.coordinator,
                        error = %e,
                        "Provisioning job submission failed",
                    );
                    return Err(e);
                }
            };

            let job = ProvisioningJob {
                job_id: job_id.clone(),
                kind: JobKind::DistributedWorkers,
                requested_workers: provisioning.count,
                coordinator: provisioning.coordinator,
                submitted_at: Utc::now(),
            };
            jobs.write().await.insert(job_id.clone(), job.clone());

            tracing::info!(
                job_id = %job_id,
                count = job.requested_workers,
                coordinator = %job.coordinator,
                "Provisioning job submitted",
            );
            Ok(job)
        });

        let job = submission
            .await
            .map_err(|e| CoreError::Internal(format!("provisioning submission task failed: {e}")))??;
        Ok(job)
    }

    /// Track a job submitted outside [`Coordinator::claim`].
    pub async fn adopt_job(&self, job: ProvisioningJob) {
        tracing::info!(job_id = %job.job_id, kind = ?job.kind, "Tracking external job");
        self.jobs.write().await.insert(job.job_id.clone(), job);
    }

    /// Cancel provisioning jobs.
    ///
    /// `None` or an empty list selects every [`JobKind::DistributedWorkers`]
    /// job. Explicit ids are matched against the active set; unknown ids are
    /// skipped. Only jobs the scheduler confirms cancelled are removed, and
    /// their workers are dropped from the registry.
    pub async fn release(&self, job_ids: Option<Vec<JobId>>) -> ReleaseOutcome {
        let mut outcome = ReleaseOutcome::default();

        let targets: Vec<JobId> = {
            let jobs = self.jobs.read().await;
            match job_ids.filter(|ids| !ids.is_empty()) {
                None => {
                    let mut all: Vec<JobId> = jobs
                        .values()
                        .filter(|job| job.kind == JobKind::DistributedWorkers)
                        .map(|job| job.job_id.clone())
                        .collect();
                    all.sort();
                    all
                }
                Some(ids) => {
                    let mut seen = HashSet::new();
                    let mut known = Vec::new();
                    for id in ids {
                        if !seen.insert(id.clone()) {
                            continue;
                        }
                        if jobs.contains_key(&id) {
                            known.push(id);
                        } else {
                            outcome.unknown.push(id);
                        }
                    }
                    known
                }
            }
        };
        outcome.requested = targets.len();

        if !outcome.unknown.is_empty() {
            tracing::info!(unknown = ?outcome.unknown, "Ignoring release of unknown jobs");
        }
        if targets.is_empty() {
            return outcome;
        }

        let cancel = self.gateway.cancel_jobs(&targets).await;
        outcome.failed = cancel
            .failed
            .into_iter()
            .map(|(id, e)| (id, e.to_string()))
            .collect();

        for job_id in cancel.cancelled {
            let removed = self.jobs.write().await.remove(&job_id).is_some();
            if removed {
                outcome.removed_workers += self.registry.remove_by_job(&job_id).await.len();
                outcome.released.push(job_id);
            }
        }

        tracing::info!(
            released = outcome.released.len(),
            requested = outcome.requested,
            failed = outcome.failed.len(),
            removed_workers = outcome.removed_workers,
            "Release finished",
        );
        outcome
    }

    // -----------------------------------------------------------------------
    // Worker callbacks
    // -----------------------------------------------------------------------

    pub async fn register_worker(
        &self,
        input: WorkerRegistration,
    ) -> Result<RegisterOutcome, CoreError> {
        worker_pool::validate_worker_id(&input.worker_id)?;
        worker_pool::validate_worker_address(&input.host, input.port)?;

        let job_id = input.job_id.filter(|id| !id.trim().is_empty());
        let worker_id = input.worker_id.clone();

        let outcome = self
            .registry
            .register(Registration {
                id: input.worker_id,
                address: WorkerAddress {
                    host: input.host,
                    port: input.port,
                },
                job_id: job_id.clone(),
                metadata: input.metadata,
            })
            .await;

        tracing::info!(
            worker_id = %worker_id,
            job_id = job_id.as_deref().unwrap_or("-"),
            outcome = ?outcome,
            "Worker registered",
        );
        Ok(outcome)
    }

    pub async fn heartbeat(&self, worker_id: &str) -> Result<(), CoreError> {
        self.registry.heartbeat(worker_id).await?;
        tracing::debug!(worker_id = %worker_id, "Heartbeat received");
        Ok(())
    }

    pub async fn unregister_worker(&self, worker_id: &str) -> Result<(), CoreError> {
        self.registry.unregister(worker_id).await?;
        tracing::info!(worker_id = %worker_id, "Worker unregistered");
        Ok(())
    }
}
