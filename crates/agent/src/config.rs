//! Layered agent configuration.
//!
//! Settings are looked up in the plugin-info file the scheduler hands the
//! task (path in `FARMLINK_PLUGIN_INFO`), then in `FARMLINK_*` environment
//! variables, then fall back to defaults. The result is resolved once into
//! an immutable [`AgentConfig`].

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use farmlink_core::gateway::job_files::{
    ENV_COORDINATOR_ADDR, ENV_COORDINATOR_HOST, ENV_COORDINATOR_PORT, ENV_DIST_MODE,
    ENV_FORCE_NEW_INSTANCE, ENV_WORKER_MODE, KEY_COORDINATOR_HOST, KEY_COORDINATOR_PORT,
    KEY_DISTRIBUTED_MODE, KEY_FORCE_NEW_INSTANCE, KEY_SEED_MODE, KEY_WORKER_MODE,
};
use farmlink_core::job_file::{parse_flag, KeyValueFile};
use farmlink_core::seed::{SeedContext, SeedMode, SeedSettings};
use farmlink_core::worker_pool::{self, CoordinatorAddress, DEFAULT_COORDINATOR_PORT};

/// Env var naming the plugin-info file to read settings from.
pub const ENV_PLUGIN_INFO: &str = "FARMLINK_PLUGIN_INFO";

const DEFAULT_COORDINATOR_HOST: &str = "localhost";
const DEFAULT_TASK_ID: &str = "w1";
const DEFAULT_JOB_ID: &str = "unknown";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read plugin info {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{setting} has an invalid value: {value:?}")]
    Invalid {
        setting: &'static str,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Every value a source can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    DistributedMode,
    WorkerMode,
    ForceNewInstance,
    CoordinatorHost,
    CoordinatorPort,
    WorkerPort,
    WorkerHost,
    SeedMode,
    Seed,
    SeedOffset,
    SeedMultiplier,
    SeedBatchSize,
    SeedFormula,
}

impl Setting {
    /// Key in the plugin-info file.
    pub fn plugin_key(self) -> &'static str {
        match self {
            Self::DistributedMode => KEY_DISTRIBUTED_MODE,
            Self::WorkerMode => KEY_WORKER_MODE,
            Self::ForceNewInstance => KEY_FORCE_NEW_INSTANCE,
            Self::CoordinatorHost => KEY_COORDINATOR_HOST,
            Self::CoordinatorPort => KEY_COORDINATOR_PORT,
            Self::WorkerPort => "WorkerPort",
            Self::WorkerHost => "WorkerHost",
            Self::SeedMode => KEY_SEED_MODE,
            Self::Seed => "Seed",
            Self::SeedOffset => "SeedOffset",
            Self::SeedMultiplier => "SeedMultiplier",
            Self::SeedBatchSize => "SeedBatchSize",
            Self::SeedFormula => "SeedFormula",
        }
    }

    /// Environment variable name.
    pub fn env_var(self) -> &'static str {
        match self {
            Self::DistributedMode => ENV_DIST_MODE,
            Self::WorkerMode => ENV_WORKER_MODE,
            Self::ForceNewInstance => ENV_FORCE_NEW_INSTANCE,
            Self::CoordinatorHost => ENV_COORDINATOR_HOST,
            Self::CoordinatorPort => ENV_COORDINATOR_PORT,
            Self::WorkerPort => "FARMLINK_WORKER_PORT",
            Self::WorkerHost => "FARMLINK_WORKER_HOST",
            Self::SeedMode => "FARMLINK_SEED_MODE",
            Self::Seed => "FARMLINK_SEED",
            Self::SeedOffset => "FARMLINK_SEED_OFFSET",
            Self::SeedMultiplier => "FARMLINK_SEED_MULTIPLIER",
            Self::SeedBatchSize => "FARMLINK_SEED_BATCH_SIZE",
            Self::SeedFormula => "FARMLINK_SEED_FORMULA",
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// One layer of configuration.
pub trait ConfigSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw value for `setting`, if this source has one.
    fn lookup(&self, setting: Setting) -> Option<String>;
}

/// Settings from the scheduler's plugin-info file.
pub struct PluginInfoSource {
    file: KeyValueFile,
}

impl PluginInfoSource {
    pub fn new(file: KeyValueFile) -> Self {
        Self { file }
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(KeyValueFile::parse(&text)))
    }
}

impl ConfigSource for PluginInfoSource {
    fn name(&self) -> &'static str {
        "plugin-info"
    }

    fn lookup(&self, setting: Setting) -> Option<String> {
        self.file.get(setting.plugin_key()).map(str::to_string)
    }
}

type Lookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Settings from `FARMLINK_*` environment variables.
pub struct EnvSource {
    lookup: Lookup,
}

impl EnvSource {
    pub fn process() -> Self {
        Self::from_lookup(Arc::new(|key: &str| std::env::var(key).ok()))
    }

    pub fn from_lookup(lookup: Lookup) -> Self {
        Self { lookup }
    }

    /// `FARMLINK_COORDINATOR_ADDR`, parsed, for host/port fallbacks.
    fn coordinator_addr(&self) -> Option<CoordinatorAddress> {
        let raw = (self.lookup)(ENV_COORDINATOR_ADDR)?;
        match CoordinatorAddress::parse(&raw) {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "Ignoring malformed {ENV_COORDINATOR_ADDR}");
                None
            }
        }
    }
}

impl ConfigSource for EnvSource {
    fn name(&self) -> &'static str {
        "environment"
    }

    fn lookup(&self, setting: Setting) -> Option<String> {
        let direct = (self.lookup)(setting.env_var()).filter(|v| !v.trim().is_empty());
        match setting {
            Setting::CoordinatorHost => direct.or_else(|| self.coordinator_addr().map(|a| a.host)),
            Setting::CoordinatorPort => {
                direct.or_else(|| self.coordinator_addr().map(|a| a.port.to_string()))
            }
            _ => direct,
        }
    }
}

/// Ordered stack of sources; the first one with a non-empty value wins.
#[derive(Default)]
pub struct LayeredConfig {
    sources: Vec<Box<dyn ConfigSource>>,
}

impl LayeredConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lower-priority source.
    pub fn push(mut self, source: impl ConfigSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    pub fn get(&self, setting: Setting) -> Option<String> {
        self.sources.iter().find_map(|source| {
            let value = source.lookup(setting)?;
            let value = value.trim();
            if value.is_empty() {
                return None;
            }
            tracing::trace!(source = source.name(), ?setting, "Resolved setting");
            Some(value.to_string())
        })
    }

    fn flag(&self, setting: Setting) -> bool {
        self.get(setting).is_some_and(|v| parse_flag(&v))
    }

    fn parse<T: FromStr>(&self, setting: Setting) -> Result<Option<T>, ConfigError> {
        self.get(setting)
            .map(|value| {
                value.parse().map_err(|_| ConfigError::Invalid {
                    setting: setting.plugin_key(),
                    value,
                })
            })
            .transpose()
    }
}

// ---------------------------------------------------------------------------
// Task context
// ---------------------------------------------------------------------------

/// Which scheduler task this agent runs in. Read from the scheduler's own
/// environment only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    /// Scheduler worker (machine) name, if the scheduler set one.
    pub worker_name: Option<String>,
    pub task_id: String,
    pub job_id: String,
}

impl TaskContext {
    pub fn from_lookup(lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let first = |keys: &[&str]| {
            keys.iter()
                .find_map(|key| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()))
        };

        Self {
            worker_name: first(&["DEADLINE_SLAVE_NAME"]),
            task_id: first(&["DEADLINE_TASK_ID", "DEADLINE_WORKER_ID", "DEADLINE_SLAVE_ID"])
                .unwrap_or_else(|| DEFAULT_TASK_ID.to_string()),
            job_id: first(&["DEADLINE_JOB_ID", "DEADLINE_JOBID"])
                .unwrap_or_else(|| DEFAULT_JOB_ID.to_string()),
        }
    }

    /// Numeric task index; non-numeric ids count as task zero.
    pub fn task_index(&self) -> u64 {
        self.task_id.parse().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    pub distributed_mode: bool,
    pub worker_mode: bool,
    pub force_new_instance: bool,
    pub coordinator: CoordinatorAddress,
    pub worker_port: u16,
    /// Explicit advertised host; auto-detected when `None`.
    pub worker_host: Option<String>,
    pub seed: SeedSettings,
    pub task: TaskContext,
}

impl AgentConfig {
    /// Load from the process environment and the plugin-info file it names.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(Arc::new(|key: &str| std::env::var(key).ok()))
    }

    pub fn from_lookup(lookup: Lookup) -> Result<Self, ConfigError> {
        let mut layers = LayeredConfig::new();
        if let Some(path) = lookup(ENV_PLUGIN_INFO).filter(|p| !p.trim().is_empty()) {
            layers = layers.push(PluginInfoSource::load(Path::new(path.trim()))?);
        }
        layers = layers.push(EnvSource::from_lookup(Arc::clone(&lookup)));

        let task = TaskContext::from_lookup(&*lookup);
        Self::resolve(&layers, task)
    }

    pub fn resolve(layers: &LayeredConfig, task: TaskContext) -> Result<Self, ConfigError> {
        let coordinator = CoordinatorAddress {
            host: layers
                .get(Setting::CoordinatorHost)
                .unwrap_or_else(|| DEFAULT_COORDINATOR_HOST.to_string()),
            port: layers
                .parse(Setting::CoordinatorPort)?
                .unwrap_or(DEFAULT_COORDINATOR_PORT),
        };

        let worker_port = layers
            .parse(Setting::WorkerPort)?
            .unwrap_or_else(|| worker_pool::default_worker_port(&task.task_id));

        let defaults = SeedSettings::default();
        let seed = SeedSettings {
            mode: match layers.get(Setting::SeedMode) {
                Some(raw) => raw.parse::<SeedMode>().map_err(|_| ConfigError::Invalid {
                    setting: Setting::SeedMode.plugin_key(),
                    value: raw,
                })?,
                None => defaults.mode,
            },
            base: layers.parse(Setting::Seed)?.unwrap_or(defaults.base),
            offset: layers.parse(Setting::SeedOffset)?.unwrap_or(defaults.offset),
            multiplier: layers
                .parse(Setting::SeedMultiplier)?
                .unwrap_or(defaults.multiplier),
            batch_size: layers
                .parse(Setting::SeedBatchSize)?
                .unwrap_or(defaults.batch_size),
            formula: layers.get(Setting::SeedFormula),
        };

        Ok(Self {
            distributed_mode: layers.flag(Setting::DistributedMode),
            worker_mode: layers.flag(Setting::WorkerMode),
            force_new_instance: layers.flag(Setting::ForceNewInstance),
            coordinator,
            worker_port,
            worker_host: layers.get(Setting::WorkerHost),
            seed,
            task,
        })
    }

    /// Seed inputs for this task, attributed to `worker_name`.
    pub fn seed_context(&self, worker_name: &str) -> SeedContext {
        SeedContext {
            task_id: self.task.task_index(),
            worker_name: worker_name.to_string(),
            job_id: self.task.job_id.clone(),
        }
    }
}
