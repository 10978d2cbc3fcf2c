//! Job identifier extraction from scheduler submission output.
//!
//! Two strategies, tried in order: the explicit `JobID=<token>` marker the
//! scheduler prints on success, then a standalone 24-character hexadecimal
//! token anywhere in the output. Neither matching is a distinct outcome, not
//! a submission failure.

use std::sync::LazyLock;

use regex::Regex;

const JOB_ID_MARKER: &str = "JobID=";

/// Standalone 24-hex-character token. Compiled once, reused forever.
static HEX_JOB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b([0-9a-f]{24})\b").expect("valid regex"));

/// Result of scanning submission stdout for a job id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobIdMatch {
    /// Found via the `JobID=` marker.
    Token(String),
    /// Found via the 24-hex-character fallback pattern.
    Pattern(String),
    NoMatch,
}

impl JobIdMatch {
    pub fn into_job_id(self) -> Option<String> {
        match self {
            Self::Token(id) | Self::Pattern(id) => Some(id),
            Self::NoMatch => None,
        }
    }
}

/// Extract the job id from scheduler stdout.
pub fn parse_job_id(stdout: &str) -> JobIdMatch {
    let token = stdout
        .split_whitespace()
        .find_map(|word| word.strip_prefix(JOB_ID_MARKER))
        .map(|id| id.trim_matches(|c: char| c == '"' || c == '\'' || c == ','))
        .filter(|id| !id.is_empty());
    if let Some(id) = token {
        return JobIdMatch::Token(id.to_string());
    }

    match HEX_JOB_ID_RE.captures(stdout) {
        Some(caps) => JobIdMatch::Pattern(caps[1].to_string()),
        None => JobIdMatch::NoMatch,
    }
}
