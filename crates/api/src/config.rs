use std::path::PathBuf;
use std::str::FromStr;

use farmlink_core::gateway::deadline::{DEFAULT_PLUGIN, SUBMIT_TIMEOUT_SECS};
use farmlink_core::worker_pool::{
    DEFAULT_COORDINATOR_PORT, HEARTBEAT_TIMEOUT_SECS, SWEEP_INTERVAL_SECS,
};

/// Snapshot file used when `SNAPSHOT_PATH` is not set.
const DEFAULT_SNAPSHOT_PATH: &str = "distributed_config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has an invalid value: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for running next to a local scheduler
/// install. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8188`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `60`). Must be longer than
    /// the scheduler submission timeout, or claims would be cut off before
    /// the scheduler answers.
    pub request_timeout_secs: u64,
    /// How long shutdown waits for background tasks (default: `10`).
    pub shutdown_timeout_secs: u64,
    /// Directory containing, or full path to, the scheduler command-line tool.
    pub deadline_path: Option<PathBuf>,
    /// Scheduler plugin the provisioning job runs under.
    pub deadline_plugin: String,
    /// Seconds without a heartbeat before a worker is evicted.
    pub heartbeat_timeout_secs: u64,
    /// Background sweep interval; `0` disables the sweep.
    pub sweep_interval_secs: u64,
    /// Snapshot document path; `None` keeps the snapshot in memory only.
    pub snapshot_path: Option<PathBuf>,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `HOST`                   | `0.0.0.0`                  |
    /// | `PORT`                   | `8188`                     |
    /// | `CORS_ORIGINS`           | `http://localhost:8188`    |
    /// | `REQUEST_TIMEOUT_SECS`   | `60`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `10`                       |
    /// | `DEADLINE_PATH`          | unset (search)             |
    /// | `DEADLINE_PLUGIN`        | `ComfyUI`                  |
    /// | `HEARTBEAT_TIMEOUT_SECS` | `60`                       |
    /// | `SWEEP_INTERVAL_SECS`    | `30`                       |
    /// | `SNAPSHOT_PATH`          | `distributed_config.json`  |
    ///
    /// An empty `SNAPSHOT_PATH` disables the on-disk snapshot.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = parse_var(&lookup, "PORT", DEFAULT_COORDINATOR_PORT)?;

        let cors_origins: Vec<String> = lookup("CORS_ORIGINS")
            .unwrap_or_else(|| format!("http://localhost:{DEFAULT_COORDINATOR_PORT}"))
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = parse_var(&lookup, "REQUEST_TIMEOUT_SECS", 60)?;
        if request_timeout_secs <= SUBMIT_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                var: "REQUEST_TIMEOUT_SECS",
                value: request_timeout_secs.to_string(),
            });
        }
        let shutdown_timeout_secs = parse_var(&lookup, "SHUTDOWN_TIMEOUT_SECS", 10)?;

        let deadline_path = lookup("DEADLINE_PATH")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);
        let deadline_plugin = lookup("DEADLINE_PLUGIN")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PLUGIN.to_string());

        let heartbeat_timeout_secs =
            parse_var(&lookup, "HEARTBEAT_TIMEOUT_SECS", HEARTBEAT_TIMEOUT_SECS)?;
        if heartbeat_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "HEARTBEAT_TIMEOUT_SECS",
                value: "0".into(),
            });
        }
        let sweep_interval_secs = parse_var(&lookup, "SWEEP_INTERVAL_SECS", SWEEP_INTERVAL_SECS)?;

        let snapshot_path = match lookup("SNAPSHOT_PATH") {
            Some(path) if path.trim().is_empty() => None,
            Some(path) => Some(PathBuf::from(path.trim())),
            None => Some(PathBuf::from(DEFAULT_SNAPSHOT_PATH)),
        };

        Ok(Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            deadline_path,
            deadline_plugin,
            heartbeat_timeout_secs,
            sweep_interval_secs,
            snapshot_path,
        })
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
