//! Per-task seed computation for distributed workers.
//!
//! Each scheduler task derives its own seed from a base value and its task
//! context so that workers in one job render distinct variations. Hash-based
//! modes use SHA-256 so results are stable across machines and runs.

pub mod formula;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use formula::Number;

/// Seeds wrap modulo this value.
pub const SEED_MODULUS: u64 = 0xffff_ffff_ffff_ffff;

#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Formula parse error at {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("Unknown variable in formula: {0}")]
    UnknownVariable(String),

    #[error("Division by zero in formula")]
    DivisionByZero,

    #[error("Arithmetic overflow in formula")]
    Overflow,

    #[error("Formula produced a non-finite value")]
    NotFinite,

    #[error("Formula exceeds {0} characters")]
    TooLong(usize),

    #[error("Formula mode selected but no formula given")]
    MissingFormula,

    #[error("Unknown seed mode: {0}")]
    UnknownMode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SeedMode {
    /// Base seed plus offset.
    #[default]
    Fixed,
    /// Base + task * multiplier + offset.
    Increment,
    /// Hash of job, task and base.
    Random,
    /// Base + fib(task + offset).
    Fibonacci,
    /// Base + worker hash * 10000 + task + offset.
    WorkerOffset,
    /// Hash of job, batch and base; shared by every task in a batch.
    BatchRandom,
    /// User-supplied arithmetic formula.
    Formula,
}

impl FromStr for SeedMode {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" | "direct" => Ok(Self::Fixed),
            "increment" | "task_increment" => Ok(Self::Increment),
            "random" => Ok(Self::Random),
            "fibonacci" => Ok(Self::Fibonacci),
            "worker_offset" => Ok(Self::WorkerOffset),
            "batch_random" => Ok(Self::BatchRandom),
            "formula" | "custom_formula" => Ok(Self::Formula),
            other => Err(SeedError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for SeedMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Fixed => "fixed",
            Self::Increment => "increment",
            Self::Random => "random",
            Self::Fibonacci => "fibonacci",
            Self::WorkerOffset => "worker_offset",
            Self::BatchRandom => "batch_random",
            Self::Formula => "formula",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeedSettings {
    pub mode: SeedMode,
    pub base: u64,
    pub offset: i64,
    pub multiplier: f64,
    pub batch_size: u64,
    pub formula: Option<String>,
}

impl Default for SeedSettings {
    fn default() -> Self {
        Self {
            mode: SeedMode::Fixed,
            base: 0,
            offset: 0,
            multiplier: 1.0,
            batch_size: 1,
            formula: None,
        }
    }
}

/// Where in the job this worker sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedContext {
    pub task_id: u64,
    pub worker_name: String,
    pub job_id: String,
}

fn wrap(value: i128) -> u64 {
    value.rem_euclid(SEED_MODULUS as i128) as u64
}

fn hash_u64(input: &str) -> u64 {
    let digest = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Stable 0..1000 bucket for a worker name.
pub fn worker_bucket(worker_name: &str) -> u64 {
    hash_u64(worker_name) % 1000
}

/// n-th Fibonacci number modulo [`SEED_MODULUS`] (fast doubling).
/// Negative and small `n` return `n` itself.
fn fibonacci(n: i128) -> i128 {
    if n <= 1 {
        return n;
    }
    let m = SEED_MODULUS as u128;
    let n = n as u128;

    let (mut a, mut b) = (0u128, 1u128);
    for bit in (0..u128::BITS - n.leading_zeros()).rev() {
        // F(2k) = F(k) * (2F(k+1) - F(k)); F(2k+1) = F(k)^2 + F(k+1)^2
        let c = a * ((2 * b + m - a) % m) % m;
        let d = (a * a % m + b * b % m) % m;
        if (n >> bit) & 1 == 1 {
            a = d;
            b = (c + d) % m;
        } else {
            a = c;
            b = d;
        }
    }
    a as i128
}

/// Compute the seed for this task.
pub fn compute_seed(settings: &SeedSettings, ctx: &SeedContext) -> Result<u64, SeedError> {
    let base = settings.base as i128;
    let offset = settings.offset as i128;
    let task = ctx.task_id as i128;

    let value: i128 = match settings.mode {
        SeedMode::Fixed => base + offset,
        SeedMode::Increment => {
            let step = (ctx.task_id as f64 * settings.multiplier).trunc() as i128;
            base + step + offset
        }
        SeedMode::Random => {
            hash_u64(&format!("{}_{}_{}", ctx.job_id, ctx.task_id, settings.base)) as i128
        }
        SeedMode::Fibonacci => base + fibonacci(task + offset),
        SeedMode::WorkerOffset => {
            base + worker_bucket(&ctx.worker_name) as i128 * 10_000 + task + offset
        }
        SeedMode::BatchRandom => {
            let batch = ctx.task_id / settings.batch_size.max(1);
            hash_u64(&format!("{}_batch_{}_{}", ctx.job_id, batch, settings.base)) as i128
        }
        SeedMode::Formula => {
            let source = settings
                .formula
                .as_deref()
                .filter(|f| !f.trim().is_empty())
                .ok_or(SeedError::MissingFormula)?;
            formula::evaluate(source, &formula_vars(settings, ctx))?.to_i128()?
        }
    };

    Ok(wrap(value))
}

/// Like [`compute_seed`], but falls back to the base seed on error.
pub fn resolve_seed(settings: &SeedSettings, ctx: &SeedContext) -> u64 {
    match compute_seed(settings, ctx) {
        Ok(seed) => seed,
        Err(e) => {
            tracing::warn!(mode = %settings.mode, error = %e, "Seed computation failed, using base seed");
            wrap(settings.base as i128)
        }
    }
}

fn formula_vars(settings: &SeedSettings, ctx: &SeedContext) -> HashMap<&'static str, Number> {
    let batch_size = settings.batch_size.max(1);
    HashMap::from([
        ("seed", Number::Int(settings.base as i128)),
        ("task_id", Number::Int(ctx.task_id as i128)),
        ("worker_id", Number::Int(worker_bucket(&ctx.worker_name) as i128)),
        ("batch_id", Number::Int((ctx.task_id / batch_size) as i128)),
        ("batch_task", Number::Int((ctx.task_id % batch_size) as i128)),
        ("offset", Number::Int(settings.offset as i128)),
        ("multiplier", Number::Float(settings.multiplier)),
    ])
}
