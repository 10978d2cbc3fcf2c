//! Long-running background tasks spawned alongside the HTTP server.

pub mod liveness_sweep;
