//! Worker pool constants, identity derivation, and input validation.
//!
//! Pure functions shared by the coordinator service and the worker agent.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// If a worker has not sent a heartbeat within this many seconds it is
/// considered gone and is evicted on the next sweep or listing.
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;

/// How often a worker agent reports liveness.
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Per-request timeout for a single heartbeat call.
pub const HEARTBEAT_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Per-request timeout for a registration call.
pub const REGISTER_TIMEOUT_SECS: u64 = 10;

/// How often the coordinator's background sweep evicts stale workers.
pub const SWEEP_INTERVAL_SECS: u64 = 30;

/// Port the coordinator listens on when none is given.
pub const DEFAULT_COORDINATOR_PORT: u16 = 8188;

/// Worker ports start this far above the coordinator port, plus the task id.
pub const WORKER_PORT_OFFSET: u16 = 100;

/// Upper bound on workers requested by a single claim.
pub const MAX_WORKERS_PER_CLAIM: u32 = 256;

/// Scheduler priority used when the claim does not specify one.
pub const DEFAULT_PRIORITY: u32 = 50;

/// Highest scheduler priority accepted.
pub const MAX_PRIORITY: u32 = 100;

/// Maximum length of a worker identifier.
const MAX_WORKER_ID_LEN: usize = 256;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Derive the globally unique worker identifier for a scheduler task.
///
/// Format: `deadline-<hostname>-<last 8 chars of job id>-<task id>`.
pub fn worker_identity(hostname: &str, job_id: &str, task_id: &str) -> String {
    let chars: Vec<char> = job_id.chars().collect();
    let start = chars.len().saturating_sub(8);
    let job_suffix: String = chars[start..].iter().collect();
    format!("deadline-{hostname}-{job_suffix}-{task_id}")
}

/// Port a worker should listen on when none is configured.
///
/// Non-numeric task ids fall back to task zero.
pub fn default_worker_port(task_id: &str) -> u16 {
    let task: u16 = task_id.trim().parse().unwrap_or(0);
    DEFAULT_COORDINATOR_PORT
        .saturating_add(WORKER_PORT_OFFSET)
        .saturating_add(task)
}

/// Whether `host` refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "0.0.0.0" | "::1" | "[::1]") || host.starts_with("127.")
}

// ---------------------------------------------------------------------------
// Coordinator address
// ---------------------------------------------------------------------------

/// Network address of the coordinator that provisioned workers call back into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorAddress {
    pub host: String,
    pub port: u16,
}

impl CoordinatorAddress {
    /// Parse `host[:port]`, tolerating a `ws://`/`http://` scheme prefix and a
    /// trailing path. The port defaults to [`DEFAULT_COORDINATOR_PORT`].
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let without_scheme = trimmed
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(trimmed);
        let authority = without_scheme.split('/').next().unwrap_or_default();

        if authority.is_empty() {
            return Err(CoreError::Validation(
                "Coordinator address must not be empty".to_string(),
            ));
        }

        // Bracketed IPv6: [::1]:8188
        if let Some(rest) = authority.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                CoreError::Validation(format!("Malformed coordinator address: {raw}"))
            })?;
            let port = match tail.strip_prefix(':') {
                Some(p) => parse_port(p, raw)?,
                None => DEFAULT_COORDINATOR_PORT,
            };
            return Ok(Self {
                host: host.to_string(),
                port,
            });
        }

        match authority.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                if host.is_empty() {
                    return Err(CoreError::Validation(format!(
                        "Coordinator address has no host: {raw}"
                    )));
                }
                Ok(Self {
                    host: host.to_string(),
                    port: parse_port(port, raw)?,
                })
            }
            _ => Ok(Self {
                host: authority.to_string(),
                port: DEFAULT_COORDINATOR_PORT,
            }),
        }
    }
}

impl fmt::Display for CoordinatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

fn parse_port(value: &str, raw: &str) -> Result<u16, CoreError> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => Err(CoreError::Validation(format!(
            "Invalid port in coordinator address: {raw}"
        ))),
        Ok(port) => Ok(port),
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a worker identifier.
///
/// Rules:
/// - Must not be empty.
/// - Must not exceed `MAX_WORKER_ID_LEN` characters.
/// - Must not contain whitespace or control characters.
pub fn validate_worker_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() {
        return Err(CoreError::Validation(
            "worker_id must not be empty".to_string(),
        ));
    }
    if id.len() > MAX_WORKER_ID_LEN {
        return Err(CoreError::Validation(format!(
            "worker_id must not exceed {MAX_WORKER_ID_LEN} characters"
        )));
    }
    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(CoreError::Validation(
            "worker_id must not contain whitespace or control characters".to_string(),
        ));
    }
    Ok(())
}

/// Validate a worker's advertised host and port.
pub fn validate_worker_address(host: &str, port: u16) -> Result<(), CoreError> {
    if host.trim().is_empty() {
        return Err(CoreError::Validation(
            "worker_ip must not be empty".to_string(),
        ));
    }
    if port == 0 {
        return Err(CoreError::Validation(
            "worker_port must be between 1 and 65535".to_string(),
        ));
    }
    Ok(())
}

/// Validate the number of workers requested by a claim.
pub fn validate_claim_count(count: u32) -> Result<(), CoreError> {
    if count == 0 || count > MAX_WORKERS_PER_CLAIM {
        return Err(CoreError::Validation(format!(
            "count must be between 1 and {MAX_WORKERS_PER_CLAIM}"
        )));
    }
    Ok(())
}

/// Validate a scheduler priority.
pub fn validate_priority(priority: u32) -> Result<(), CoreError> {
    if priority > MAX_PRIORITY {
        return Err(CoreError::Validation(format!(
            "priority must be between 0 and {MAX_PRIORITY}"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
