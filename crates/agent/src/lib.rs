//! `farmlink-agent` library crate.
//!
//! Runs inside a scheduler task next to the render worker process and keeps
//! it registered with the coordinator. The binary entrypoint lives in
//! `main.rs`; modules are exported for integration testing.

pub mod backoff;
pub mod client;
pub mod config;
pub mod heartbeat;
pub mod identity;
