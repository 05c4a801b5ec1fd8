pub mod health;
pub mod jobs;

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use matchday_core::MatchdayError;
use matchday_scheduler::SchedulerError;
use serde_json::json;

use crate::app::AppState;

/// Error body: `{"error": "...", "code": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Conflict(String),
    Core(StatusCode, MatchdayError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, code) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "Unauthorized. Set 'Authorization: Bearer <your-token>' header.".to_string(),
                "UNAUTHORIZED",
            ),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, "CONFLICT"),
            ApiError::Core(status, e) => (status, e.to_string(), e.code()),
        };
        (status, Json(json!({ "error": error, "code": code }))).into_response()
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::JobNotFound { id } => {
                ApiError::Core(StatusCode::NOT_FOUND, MatchdayError::JobNotFound { id })
            }
            SchedulerError::InvalidSchedule(e) => {
                ApiError::Core(StatusCode::BAD_REQUEST, MatchdayError::Config(e.to_string()))
            }
            SchedulerError::Database(e) => ApiError::Core(
                StatusCode::INTERNAL_SERVER_ERROR,
                MatchdayError::Database(e.to_string()),
            ),
            SchedulerError::Serialization(e) => {
                ApiError::Core(StatusCode::INTERNAL_SERVER_ERROR, MatchdayError::Serialization(e))
            }
        }
    }
}

/// Bearer-token check. With no `gateway.token` configured the API is open.
pub(crate) fn check_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.gateway.token.as_deref() else {
        return Ok(());
    };
    match extract_bearer(headers) {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
