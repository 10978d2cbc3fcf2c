/// Worker identifiers are opaque strings chosen by the worker process.
pub type WorkerId = String;

/// External scheduler job identifiers are opaque strings.
pub type JobId = String;

/// All wall-clock timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
