use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatchdayError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MatchdayError {
    /// Short error code string returned by the admin API.
    pub fn code(&self) -> &'static str {
        match self {
            MatchdayError::Config(_) => "CONFIG_ERROR",
            MatchdayError::Database(_) => "DATABASE_ERROR",
            MatchdayError::Provider(_) => "PROVIDER_ERROR",
            MatchdayError::JobNotFound { .. } => "JOB_NOT_FOUND",
            MatchdayError::Serialization(_) => "SERIALIZATION_ERROR",
            MatchdayError::Io(_) => "IO_ERROR",
            MatchdayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MatchdayError>;
