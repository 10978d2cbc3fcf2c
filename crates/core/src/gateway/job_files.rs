//! Provisioning request files handed to the scheduler on submission.
//!
//! A submission is three files: job info (scheduling parameters plus the
//! environment each task inherits), plugin info (worker-side settings read
//! by the agent), and a placeholder workload.

use std::path::{Path, PathBuf};

use serde_json::{json, Value};

use crate::job_file::KeyValueFile;

use super::ProvisioningRequest;

// -- Environment handed to every worker task ---------------------------------

pub const ENV_DIST_MODE: &str = "FARMLINK_DIST_MODE";
pub const ENV_COORDINATOR_ADDR: &str = "FARMLINK_COORDINATOR_ADDR";
pub const ENV_COORDINATOR_HOST: &str = "FARMLINK_COORDINATOR_HOST";
pub const ENV_COORDINATOR_PORT: &str = "FARMLINK_COORDINATOR_PORT";
pub const ENV_FORCE_NEW_INSTANCE: &str = "FARMLINK_FORCE_NEW_INSTANCE";
pub const ENV_WORKER_MODE: &str = "FARMLINK_WORKER_MODE";

// -- Plugin-info keys ----------------------------------------------------------

pub const KEY_DISTRIBUTED_MODE: &str = "DistributedMode";
pub const KEY_WORKER_MODE: &str = "WorkerMode";
pub const KEY_FORCE_NEW_INSTANCE: &str = "ForceNewInstance";
pub const KEY_USE_EXISTING_INSTANCE: &str = "UseExistingInstance";
pub const KEY_COORDINATOR_HOST: &str = "CoordinatorHost";
pub const KEY_COORDINATOR_PORT: &str = "CoordinatorPort";
pub const KEY_SEED_MODE: &str = "SeedMode";
pub const KEY_WORKFLOW_FILE: &str = "WorkflowFile";

pub const JOB_INFO_FILE: &str = "job_info.job";
pub const PLUGIN_INFO_FILE: &str = "plugin_info.job";
pub const WORKLOAD_FILE: &str = "worker_registration.json";

/// Paths of a written submission.
///
/// Owns its directory: dropping a `JobFiles` removes it, so an early return
/// or a cancelled submission does not leave scratch files behind.
#[derive(Debug)]
pub struct JobFiles {
    pub dir: PathBuf,
    pub job_info: PathBuf,
    pub plugin_info: PathBuf,
    pub workload: PathBuf,
    removed: bool,
}

impl JobFiles {
    /// Create a fresh, empty submission directory under `base`.
    pub async fn create(base: &Path) -> std::io::Result<Self> {
        let dir = base.join(format!("farmlink-workers-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await?;

        Ok(Self {
            job_info: dir.join(JOB_INFO_FILE),
            plugin_info: dir.join(PLUGIN_INFO_FILE),
            workload: dir.join(WORKLOAD_FILE),
            dir,
            removed: false,
        })
    }

    /// Write all three documents into the directory.
    pub async fn write(&self, request: &ProvisioningRequest, plugin: &str) -> std::io::Result<()> {
        let workload = serde_json::to_vec_pretty(&placeholder_workload())?;
        tokio::fs::write(&self.workload, workload).await?;
        tokio::fs::write(&self.job_info, job_info(request, plugin).to_string()).await?;
        tokio::fs::write(
            &self.plugin_info,
            plugin_info(request, &self.workload).to_string(),
        )
        .await
    }

    /// Remove the submission directory. The scheduler copies the files into
    /// its repository on submit, so this only loses local scratch.
    pub async fn cleanup(mut self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.dir).await {
            tracing::debug!(dir = %self.dir.display(), error = %e, "Failed to remove job files");
        }
        self.removed = true;
    }
}

impl Drop for JobFiles {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => tracing::debug!(dir = %self.dir.display(), "Removed abandoned job files"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to remove job files")
            }
        }
    }
}

/// Treat absent, blank and `none` pool/group values as unset.
fn normalize_selector(value: Option<&str>) -> &str {
    match value.map(str::trim) {
        Some(v) if !v.eq_ignore_ascii_case("none") => v,
        _ => "",
    }
}

/// Build the job-info document.
pub fn job_info(request: &ProvisioningRequest, plugin: &str) -> KeyValueFile {
    let count = request.count;
    let coordinator = &request.coordinator;

    let mut file = KeyValueFile::new();
    file.set("Plugin", plugin)
        .set("Name", format!("[DIST] Render Workers x{count}"))
        .set(
            "Comment",
            format!("Distributed workers for coordinator at {coordinator}"),
        )
        .set("Department", "Distributed Rendering")
        .set("Priority", request.priority)
        .set("Pool", normalize_selector(request.pool.as_deref()))
        .set("Group", normalize_selector(request.group.as_deref()))
        .set("TaskTimeoutMinutes", 0)
        .set("EnableAutoTimeout", "false")
        // One task per machine: co-located GPU workers need their own process.
        .set("ConcurrentTasks", 1)
        .set("LimitConcurrentTasksToNumberOfCpus", "false")
        .set("MachineLimit", count)
        .set("Frames", format!("1-{count}"))
        .set("ChunkSize", 1);

    let env = [
        (ENV_DIST_MODE, "1".to_string()),
        (ENV_COORDINATOR_ADDR, coordinator.to_string()),
        (ENV_COORDINATOR_HOST, coordinator.host.clone()),
        (ENV_COORDINATOR_PORT, coordinator.port.to_string()),
        (ENV_FORCE_NEW_INSTANCE, "1".to_string()),
        (ENV_WORKER_MODE, "1".to_string()),
    ];
    for (index, (key, value)) in env.iter().enumerate() {
        file.set(format!("EnvironmentKeyValue{index}"), format!("{key}={value}"));
    }

    file
}

/// Build the plugin-info document.
pub fn plugin_info(request: &ProvisioningRequest, workload: &Path) -> KeyValueFile {
    let mut file = KeyValueFile::new();
    file.set(KEY_DISTRIBUTED_MODE, "True")
        .set(KEY_WORKER_MODE, "True")
        .set(KEY_FORCE_NEW_INSTANCE, "True")
        .set(KEY_USE_EXISTING_INSTANCE, "False")
        .set("BatchMode", "False")
        .set(KEY_SEED_MODE, "fixed")
        .set("DefaultCudaDeviceZero", "True")
        .set(KEY_COORDINATOR_HOST, &request.coordinator.host)
        .set(KEY_COORDINATOR_PORT, request.coordinator.port)
        .set(KEY_WORKFLOW_FILE, workload.display());
    file
}

/// Minimal workload: a single node that registers the worker and idles.
pub fn placeholder_workload() -> Value {
    json!({
        "1": {
            "class_type": "DistributedWorkerRegistration",
            "inputs": {},
            "_meta": { "title": "Worker Registration" }
        }
    })
}

/// Write all three files into a fresh directory under `base`.
pub async fn write_job_files(
    base: &Path,
    request: &ProvisioningRequest,
    plugin: &str,
) -> std::io::Result<JobFiles> {
    let files = JobFiles::create(base).await?;
    files.write(request, plugin).await?;
    Ok(files)
}
