//! Farmlink domain core.
//!
//! Worker lifecycle state (registry, liveness, snapshot mirroring), the
//! external scheduler gateway, and the coordinator façade that ties them
//! together. Nothing in here knows about HTTP.

pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod job_file;
pub mod registry;
pub mod seed;
pub mod snapshot;
pub mod types;
pub mod worker_pool;
