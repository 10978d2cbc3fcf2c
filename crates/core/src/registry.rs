//! Worker registry and liveness eviction.
//!
//! The registry is an explicitly owned, lock-guarded table of workers that
//! have called back into the coordinator. Staleness is evaluated lazily on
//! [`WorkerRegistry::list_active`] and [`WorkerRegistry::heartbeat`], and
//! eagerly by [`WorkerRegistry::sweep`] for the periodic background task.
//!
//! Every add/remove is mirrored into the [`SnapshotStore`] while the table
//! lock is held, so the snapshot observes mutations in the same order as the
//! registry. Mirror failures are logged and never change the result. Each
//! mirror call is bounded by [`SNAPSHOT_SYNC_TIMEOUT`] so a stalled store
//! cannot hold the table lock indefinitely.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::CoreError;
use crate::snapshot::{SnapshotStore, WorkerDescriptor};
use crate::types::{JobId, Timestamp, WorkerId};

/// Metadata key carrying the worker's display name.
pub const META_NAME: &str = "name";
/// Metadata key carrying the worker's platform tag.
pub const META_PLATFORM: &str = "platform";

/// Upper bound on a single snapshot write made under the table lock.
pub const SNAPSHOT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a worker can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
}

/// Input to [`WorkerRegistry::register`].
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: WorkerId,
    pub address: WorkerAddress,
    pub job_id: Option<JobId>,
    pub metadata: BTreeMap<String, String>,
}

/// A live worker as tracked by the coordinator.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub id: WorkerId,
    pub address: WorkerAddress,
    pub job_id: Option<JobId>,
    pub registered_at: Timestamp,
    /// Coordinator receipt time of the most recent heartbeat (monotonic clock).
    pub last_heartbeat: Instant,
    pub metadata: BTreeMap<String, String>,
}

impl WorkerRecord {
    fn is_stale(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.last_heartbeat) > timeout
    }

    /// Time since the last heartbeat was received.
    pub fn heartbeat_age(&self) -> Duration {
        Instant::now().saturating_duration_since(self.last_heartbeat)
    }

    /// Descriptor written into the shared snapshot for this worker.
    pub fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            id: self.id.clone(),
            host: self.address.host.clone(),
            port: self.address.port,
            cuda_device: 0,
            enabled: true,
            source: "deadline".to_string(),
            name: self
                .metadata
                .get(META_NAME)
                .cloned()
                .unwrap_or_else(|| format!("Deadline Worker ({})", self.id)),
            args: String::new(),
            platform: self
                .metadata
                .get(META_PLATFORM)
                .cloned()
                .unwrap_or_else(|| "deadline".to_string()),
        }
    }
}

/// Whether a registration created a new record or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Replaced,
}

pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerRecord>>,
    heartbeat_timeout: Duration,
    snapshot: Arc<dyn SnapshotStore>,
}

impl WorkerRegistry {
    pub fn new(heartbeat_timeout: Duration, snapshot: Arc<dyn SnapshotStore>) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            heartbeat_timeout,
            snapshot,
        }
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// Add or overwrite a worker. Re-registering an id replaces its address,
    /// job and metadata and counts as a fresh heartbeat.
    pub async fn register(&self, registration: Registration) -> RegisterOutcome {
        let now = Instant::now();
        let mut workers = self.workers.write().await;

        let registered_at = workers
            .get(&registration.id)
            .map(|existing| existing.registered_at)
            .unwrap_or_else(Utc::now);

        let record = WorkerRecord {
            id: registration.id.clone(),
            address: registration.address,
            job_id: registration.job_id,
            registered_at,
            last_heartbeat: now,
            metadata: registration.metadata,
        };
        let descriptor = record.descriptor();
        let outcome = match workers.insert(registration.id.clone(), record) {
            Some(_) => RegisterOutcome::Replaced,
            None => RegisterOutcome::Created,
        };

        match tokio::time::timeout(SNAPSHOT_SYNC_TIMEOUT, self.snapshot.upsert_worker(&descriptor)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(worker_id = %registration.id, error = %e, "Snapshot sync failed on register")
            }
            Err(_) => tracing::warn!(
                worker_id = %registration.id,
                timeout_ms = SNAPSHOT_SYNC_TIMEOUT.as_millis() as u64,
                "Snapshot sync timed out on register",
            ),
        }

        outcome
    }

    /// Refresh a worker's heartbeat.
    ///
    /// A worker already past the timeout is evicted here rather than revived,
    /// and the caller gets `NotFound` so it re-registers.
    pub async fn heartbeat(&self, id: &str) -> Result<(), CoreError> {
        let now = Instant::now();
        let mut workers = self.workers.write().await;

        let stale = match workers.get(id) {
            None => return Err(not_found(id)),
            Some(record) => record.is_stale(now, self.heartbeat_timeout),
        };

        if stale {
            workers.remove(id);
            self.mirror_removal(&[id.to_string()]).await;
            tracing::info!(worker_id = %id, "Late heartbeat from evicted worker");
            return Err(not_found(id));
        }

        if let Some(record) = workers.get_mut(id) {
            record.last_heartbeat = record.last_heartbeat.max(now);
        }
        Ok(())
    }

    /// Remove a worker explicitly.
    pub async fn unregister(&self, id: &str) -> Result<WorkerRecord, CoreError> {
        let mut workers = self.workers.write().await;
        let record = workers.remove(id).ok_or_else(|| not_found(id))?;
        self.mirror_removal(&[record.id.clone()]).await;
        Ok(record)
    }

    /// Evict stale workers and return the live set, ordered by id.
    pub async fn list_active(&self) -> Vec<WorkerRecord> {
        let mut workers = self.workers.write().await;
        self.evict_stale(&mut workers).await;

        let mut live: Vec<WorkerRecord> = workers.values().cloned().collect();
        live.sort_by(|a, b| a.id.cmp(&b.id));
        live
    }

    /// Evict stale workers. Returns the number evicted.
    pub async fn sweep(&self) -> usize {
        let mut workers = self.workers.write().await;
        self.evict_stale(&mut workers).await.len()
    }

    /// Remove every worker that belongs to `job_id`. Returns the removed ids.
    pub async fn remove_by_job(&self, job_id: &str) -> Vec<WorkerId> {
        let mut workers = self.workers.write().await;
        let ids: Vec<WorkerId> = workers
            .values()
            .filter(|record| record.job_id.as_deref() == Some(job_id))
            .map(|record| record.id.clone())
            .collect();
        for id in &ids {
            workers.remove(id);
        }
        self.mirror_removal(&ids).await;
        ids
    }

    /// Look up a worker without evaluating staleness.
    pub async fn get(&self, id: &str) -> Option<WorkerRecord> {
        self.workers.read().await.get(id).cloned()
    }

    /// Number of records currently held, stale or not.
    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    async fn evict_stale(&self, workers: &mut HashMap<WorkerId, WorkerRecord>) -> Vec<WorkerId> {
        let now = Instant::now();
        let stale: Vec<WorkerId> = workers
            .values()
            .filter(|record| record.is_stale(now, self.heartbeat_timeout))
            .map(|record| record.id.clone())
            .collect();

        for id in &stale {
            workers.remove(id);
            tracing::info!(worker_id = %id, "Evicted stale worker");
        }
        self.mirror_removal(&stale).await;
        stale
    }

    async fn mirror_removal(&self, ids: &[WorkerId]) {
        if ids.is_empty() {
            return;
        }
        match tokio::time::timeout(SNAPSHOT_SYNC_TIMEOUT, self.snapshot.remove_workers(ids)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(count = ids.len(), error = %e, "Snapshot sync failed on removal")
            }
            Err(_) => tracing::warn!(
                count = ids.len(),
                timeout_ms = SNAPSHOT_SYNC_TIMEOUT.as_millis() as u64,
                "Snapshot sync timed out on removal",
            ),
        }
    }
}

fn not_found(id: &str) -> CoreError {
    CoreError::NotFound {
        entity: "Worker",
        id: id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
