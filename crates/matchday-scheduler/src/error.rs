use matchday_core::SyncOutcome;
use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Underlying SQLite / rusqlite error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The job's recurrence expression could not be interpreted.
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(#[from] RecurrenceError),

    /// No job with the given ID is registered.
    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a recurrence expression was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecurrenceError {
    #[error("expected 5 fields, found {found} in {expression:?}")]
    FieldCount { expression: String, found: usize },

    #[error("invalid {field} field {value:?}: {reason}")]
    InvalidField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("{expression:?} never matches a calendar instant")]
    NoMatch { expression: String },
}

/// Failure reported by a job handler.
///
/// Per-record problems are never raised this way; handlers count them in
/// `SyncOutcome::errors` instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    /// Missing credentials or similar; fatal until the operator fixes config.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The data provider failed (HTTP, reported errors, rate limiting).
    #[error("provider error: {0}")]
    Provider(String),

    #[error("cancelled")]
    Cancelled,

    /// Some of the work failed; `outcome` still counts what was done.
    #[error("{}", errors.join("; "))]
    Partial {
        outcome: SyncOutcome,
        errors: Vec<String>,
    },

    #[error("{0}")]
    Failed(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
