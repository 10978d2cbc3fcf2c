//! Job submission gateway to the external render-farm scheduler.
//!
//! [`SchedulerGateway`] is the seam the coordinator talks to. The production
//! implementation, [`DeadlineGateway`], shells out to the scheduler's
//! command-line tool; tests substitute an in-process fake.
//!
//! Errors are never retried here. A hung or failing scheduler command is
//! reported back to the caller with its captured output.

pub mod command;
pub mod deadline;
pub mod job_files;
pub mod job_id;

use async_trait::async_trait;
use serde::Serialize;

use crate::types::JobId;
use crate::worker_pool::CoordinatorAddress;

pub use deadline::{DeadlineGateway, GatewayTimeouts};
pub use job_id::{parse_job_id, JobIdMatch};

/// What a claim asks the scheduler to start.
#[derive(Debug, Clone)]
pub struct ProvisioningRequest {
    pub count: u32,
    pub coordinator: CoordinatorAddress,
    pub priority: u32,
    pub pool: Option<String>,
    pub group: Option<String>,
}

/// Snapshot of the farm as reported by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FarmSummary {
    pub total: usize,
    pub idle: usize,
}

/// Result of cancelling several jobs; partial success is normal.
#[derive(Debug, Default)]
pub struct CancelOutcome {
    pub cancelled: Vec<JobId>,
    pub failed: Vec<(JobId, GatewayError)>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The scheduler executable could not be located.
    #[error("Scheduler command-line tool not found: {0}")]
    Unavailable(String),

    /// The submission command exited non-zero.
    #[error("Job submission failed (exit code {exit_code})")]
    SubmissionFailed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Submission exited zero but no job id could be read from its output.
    /// The job may exist on the scheduler.
    #[error("Job may have been submitted but its id could not be determined")]
    IdExtraction { stdout: String, stderr: String },

    #[error("Failed to cancel job {job_id} (exit code {exit_code})")]
    CancelFailed {
        job_id: JobId,
        exit_code: i32,
        stderr: String,
    },

    #[error("Scheduler command `{command}` timed out after {elapsed_ms}ms")]
    Timeout { command: String, elapsed_ms: u64 },

    #[error("Scheduler query failed: {0}")]
    QueryFailed(String),

    #[error("Scheduler I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait SchedulerGateway: Send + Sync + 'static {
    /// Whether the scheduler tool was located. Does not run it.
    fn is_available(&self) -> bool;

    /// Submit a provisioning job and return the scheduler's job id.
    async fn submit(&self, request: &ProvisioningRequest) -> Result<JobId, GatewayError>;

    /// Cancel a single job.
    async fn cancel_job(&self, job_id: &str) -> Result<(), GatewayError>;

    /// Cancel each job independently and report which succeeded.
    async fn cancel_jobs(&self, job_ids: &[JobId]) -> CancelOutcome {
        let mut outcome = CancelOutcome::default();
        for job_id in job_ids {
            match self.cancel_job(job_id).await {
                Ok(()) => outcome.cancelled.push(job_id.clone()),
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Job cancellation failed");
                    outcome.failed.push((job_id.clone(), e));
                }
            }
        }
        outcome
    }

    /// Query the farm's machine counts.
    async fn farm_status(&self) -> Result<FarmSummary, GatewayError>;
}
