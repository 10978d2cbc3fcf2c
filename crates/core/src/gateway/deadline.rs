//! [`SchedulerGateway`] backed by the Deadline command-line tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::command::SchedulerCommand;
use super::job_files::write_job_files;
use super::job_id::{parse_job_id, JobIdMatch};
use super::{FarmSummary, GatewayError, ProvisioningRequest, SchedulerGateway};
use crate::types::JobId;

/// Plugin the submitted job runs under when none is configured.
pub const DEFAULT_PLUGIN: &str = "ComfyUI";

/// Default limit on a `-SubmitJob` invocation.
pub const SUBMIT_TIMEOUT_SECS: u64 = 30;

/// Per-command timeouts.
#[derive(Debug, Clone, Copy)]
pub struct GatewayTimeouts {
    pub submit: Duration,
    pub cancel: Duration,
    pub query: Duration,
}

impl Default for GatewayTimeouts {
    fn default() -> Self {
        Self {
            submit: Duration::from_secs(SUBMIT_TIMEOUT_SECS),
            cancel: Duration::from_secs(10),
            query: Duration::from_secs(5),
        }
    }
}

pub struct DeadlineGateway {
    command: Option<SchedulerCommand>,
    plugin: String,
    scratch_dir: PathBuf,
    timeouts: GatewayTimeouts,
}

impl DeadlineGateway {
    /// Locate the scheduler tool once. A gateway without one reports
    /// [`GatewayError::Unavailable`] for every operation.
    pub fn discover(configured_path: Option<&Path>, plugin: impl Into<String>) -> Self {
        let command = SchedulerCommand::locate(configured_path);
        match &command {
            Some(cmd) => tracing::info!(path = %cmd.program().display(), "Scheduler command-line tool found"),
            None => tracing::warn!("Scheduler command-line tool not found; claims will fail"),
        }
        Self::new(command, plugin)
    }

    pub fn new(command: Option<SchedulerCommand>, plugin: impl Into<String>) -> Self {
        Self {
            command,
            plugin: plugin.into(),
            scratch_dir: std::env::temp_dir(),
            timeouts: GatewayTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: GatewayTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    fn command(&self) -> Result<&SchedulerCommand, GatewayError> {
        self.command.as_ref().ok_or_else(|| {
            GatewayError::Unavailable("deadlinecommand not found in configured or standard locations".to_string())
        })
    }
}

#[async_trait]
impl SchedulerGateway for DeadlineGateway {
    fn is_available(&self) -> bool {
        self.command.is_some()
    }

    async fn submit(&self, request: &ProvisioningRequest) -> Result<JobId, GatewayError> {
        let command = self.command()?;
        let files = write_job_files(&self.scratch_dir, request, &self.plugin).await?;

        let job_info = files.job_info.to_string_lossy().into_owned();
        let plugin_info = files.plugin_info.to_string_lossy().into_owned();
        let workload = files.workload.to_string_lossy().into_owned();

        let result = command
            .run(
                &["-SubmitJob", &job_info, &plugin_info, &workload],
                self.timeouts.submit,
            )
            .await;
        files.cleanup().await;
        let output = result?;

        if !output.success() {
            return Err(GatewayError::SubmissionFailed {
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        match parse_job_id(&output.stdout) {
            JobIdMatch::Token(id) => Ok(id),
            JobIdMatch::Pattern(id) => {
                tracing::debug!(job_id = %id, "Job id recovered by pattern fallback");
                Ok(id)
            }
            JobIdMatch::NoMatch => Err(GatewayError::IdExtraction {
                stdout: output.stdout,
                stderr: output.stderr,
            }),
        }
    }

    async fn cancel_job(&self, job_id: &str) -> Result<(), GatewayError> {
        let output = self
            .command()?
            .run(&["-DeleteJob", job_id], self.timeouts.cancel)
            .await?;

        if output.success() {
            tracing::info!(job_id = %job_id, "Scheduler job deleted");
            Ok(())
        } else {
            Err(GatewayError::CancelFailed {
                job_id: job_id.to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr,
            })
        }
    }

    async fn farm_status(&self) -> Result<FarmSummary, GatewayError> {
        let output = self
            .command()?
            .run(&["-GetSlaves", "-json"], self.timeouts.query)
            .await?;

        if !output.success() {
            return Err(GatewayError::QueryFailed(format!(
                "exit code {}: {}",
                output.exit_code,
                output.stderr.trim()
            )));
        }
        summarize_slaves(&output.stdout)
    }
}

/// Count machines in `-GetSlaves -json` output.
///
/// Accepts either a bare array or an object wrapping it under `result`.
pub fn summarize_slaves(stdout: &str) -> Result<FarmSummary, GatewayError> {
    let value: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| GatewayError::QueryFailed(format!("invalid worker list JSON: {e}")))?;

    let entries = match &value {
        Value::Array(entries) => entries,
        Value::Object(map) => match map.get("result") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(GatewayError::QueryFailed(
                    "worker list JSON has no array".to_string(),
                ))
            }
        },
        _ => {
            return Err(GatewayError::QueryFailed(
                "worker list JSON has no array".to_string(),
            ))
        }
    };

    let idle = entries
        .iter()
        .filter(|entry| {
            entry
                .get("State")
                .and_then(Value::as_str)
                .is_some_and(|state| state.eq_ignore_ascii_case("idle"))
        })
        .count();

    Ok(FarmSummary {
        total: entries.len(),
        idle,
    })
}
