use matchday_scheduler::JobError;
use thiserror::Error;

/// Failure talking to the external data provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Missing or empty credentials. Not worth retrying.
    #[error("provider not configured: {0}")]
    Configuration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited by provider")]
    RateLimited,

    /// 2xx response whose `errors` field was not empty.
    #[error("provider reported errors: {}", .0.join("; "))]
    Reported(Vec<String>),

    #[error("parse error: {0}")]
    Parse(String),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Why a submission to the request queue produced no output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("request queue is closed")]
    Closed,

    /// The worker dropped the request without answering.
    #[error("request dropped before completion")]
    Dropped,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("invalid column name: {0:?}")]
    InvalidColumn(String),

    #[error("conflict key {0} missing from row")]
    MissingKey(String),
}

/// A provider record that could not be mapped onto a row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed {entity} record: missing {field}")]
pub struct TransformError {
    pub entity: &'static str,
    pub field: String,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("sync cancelled")]
    Cancelled,
}

impl From<SyncError> for JobError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Provider(ProviderError::Configuration(msg)) => JobError::Configuration(msg),
            SyncError::Provider(other) => JobError::Provider(other.to_string()),
            SyncError::Cancelled => JobError::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_credentials_stay_configuration_errors() {
        let err: JobError =
            SyncError::from(ProviderError::Configuration("provider.api_key is not set".into())).into();
        assert_eq!(err, JobError::Configuration("provider.api_key is not set".into()));
    }

    #[test]
    fn cancellation_and_queue_failures_map_to_job_errors() {
        assert_eq!(JobError::from(SyncError::Cancelled), JobError::Cancelled);
        let err: JobError = SyncError::from(ProviderError::from(QueueError::Closed)).into();
        assert_eq!(err, JobError::Provider("request queue is closed".into()));
    }

    #[test]
    fn reported_errors_are_joined_for_the_record() {
        let err: JobError =
            SyncError::from(ProviderError::Reported(vec!["a".into(), "b".into()])).into();
        assert_eq!(err, JobError::Provider("provider reported errors: a; b".into()));
    }
}
