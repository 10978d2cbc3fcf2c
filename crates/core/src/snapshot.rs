//! Shared worker snapshot consumed by the dispatch side.
//!
//! The snapshot is a JSON document with a `workers` array. The registry
//! mirrors every add/remove into it on a best-effort basis; callers log
//! [`SnapshotError`]s and never surface them as operation results.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::types::WorkerId;

/// Errors raised while reading or writing the snapshot document.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed snapshot: {0}")]
    Malformed(String),
}

/// One worker entry as the dispatcher expects to find it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    pub id: WorkerId,
    pub host: String,
    pub port: u16,
    pub cuda_device: u32,
    pub enabled: bool,
    pub source: String,
    pub name: String,
    pub args: String,
    pub platform: String,
}

/// Persistence seam for the shared worker snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Insert or update the entry whose `id` matches `worker.id`.
    async fn upsert_worker(&self, worker: &WorkerDescriptor) -> Result<(), SnapshotError>;

    /// Remove every entry whose `id` is in `ids`. Returns how many were removed.
    async fn remove_workers(&self, ids: &[WorkerId]) -> Result<usize, SnapshotError>;
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// Snapshot stored as a JSON file on disk.
///
/// Every mutation is a full read-modify-write of the document, serialized
/// through an internal lock and committed with a temp-file rename. Entries
/// and top-level keys this process does not own are preserved.
pub struct FileSnapshotStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document. A missing or empty file yields `{}`.
    pub async fn load(&self) -> Result<Value, SnapshotError> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(json!({})),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(json!({}));
        }
        let doc: Value = serde_json::from_str(&text)?;
        if !doc.is_object() {
            return Err(SnapshotError::Malformed(
                "top-level value is not an object".to_string(),
            ));
        }
        Ok(doc)
    }

    /// Write the document atomically (temp file in the same directory, then rename).
    pub async fn save(&self, doc: &Value) -> Result<(), SnapshotError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut bytes = serde_json::to_vec_pretty(doc)?;
        bytes.push(b'\n');

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "snapshot.json".into());
        tmp_name.push(".tmp");
        let tmp_path = self.path.with_file_name(tmp_name);

        tokio::fs::write(&tmp_path, &bytes).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// Return the document's `workers` array, creating it when absent.
fn workers_mut(doc: &mut Value) -> Result<&mut Vec<Value>, SnapshotError> {
    let map = doc
        .as_object_mut()
        .ok_or_else(|| SnapshotError::Malformed("top-level value is not an object".to_string()))?;
    map.entry("workers").or_insert_with(|| json!([]));
    match map.get_mut("workers") {
        Some(Value::Array(workers)) => Ok(workers),
        _ => Err(SnapshotError::Malformed(
            "`workers` is not an array".to_string(),
        )),
    }
}

fn entry_id(entry: &Value) -> Option<&str> {
    entry.get("id").and_then(Value::as_str)
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn upsert_worker(&self, worker: &WorkerDescriptor) -> Result<(), SnapshotError> {
        let _guard = self.lock.lock().await;

        let mut doc = self.load().await?;
        let fresh = serde_json::to_value(worker)?;
        let workers = workers_mut(&mut doc)?;

        match workers
            .iter_mut()
            .find(|entry| entry_id(entry) == Some(worker.id.as_str()))
        {
            Some(Value::Object(existing)) => {
                if let Value::Object(fields) = fresh {
                    existing.extend(fields);
                }
            }
            Some(other) => *other = fresh,
            None => workers.push(fresh),
        }

        self.save(&doc).await
    }

    async fn remove_workers(&self, ids: &[WorkerId]) -> Result<usize, SnapshotError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let _guard = self.lock.lock().await;

        let mut doc = self.load().await?;
        let workers = workers_mut(&mut doc)?;
        let before = workers.len();
        workers.retain(|entry| match entry_id(entry) {
            Some(id) => !ids.iter().any(|target| target == id),
            None => true,
        });
        let removed = before - workers.len();

        if removed > 0 {
            self.save(&doc).await?;
        }
        Ok(removed)
    }
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Snapshot kept only in process memory.
///
/// Used when no snapshot path is configured, and as a test double.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    workers: Mutex<Vec<WorkerDescriptor>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn workers(&self) -> Vec<WorkerDescriptor> {
        self.workers.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn upsert_worker(&self, worker: &WorkerDescriptor) -> Result<(), SnapshotError> {
        let mut workers = self.workers.lock().await;
        match workers.iter_mut().find(|w| w.id == worker.id) {
            Some(existing) => *existing = worker.clone(),
            None => workers.push(worker.clone()),
        }
        Ok(())
    }

    async fn remove_workers(&self, ids: &[WorkerId]) -> Result<usize, SnapshotError> {
        let mut workers = self.workers.lock().await;
        let before = workers.len();
        workers.retain(|w| !ids.contains(&w.id));
        Ok(before - workers.len())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
