//! Scheduler administration endpoints.
//!
//! All routes require `Authorization: Bearer <gateway.token>` when a token is
//! configured.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use matchday_scheduler::{ExecutionRecord, JobStatus, SchedulerError};
use matchday_sync::orchestrator::FULL_SYNC_RUNNING;
use matchday_sync::FULL_SYNC_JOB;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{check_auth, ApiError};
use crate::app::AppState;

const DEFAULT_EXECUTIONS_LIMIT: usize = 50;
const MAX_EXECUTIONS_LIMIT: usize = 500;

/// GET /jobs
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobStatus>>, ApiError> {
    check_auth(&state, &headers)?;
    Ok(Json(state.scheduler.status()))
}

/// POST /jobs/{id}/run: run now and return the execution record.
pub async fn run_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ExecutionRecord>, ApiError> {
    check_auth(&state, &headers)?;
    let record = state.scheduler.run_job_now(&id).await?;
    Ok(Json(record))
}

/// POST /jobs/{id}/enable
pub async fn enable_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    check_auth(&state, &headers)?;
    state.scheduler.enable(&id)?;
    job_status(&state, id)
}

/// POST /jobs/{id}/disable
pub async fn disable_job(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<JobStatus>, ApiError> {
    check_auth(&state, &headers)?;
    state.scheduler.disable(&id)?;
    job_status(&state, id)
}

fn job_status(state: &AppState, id: String) -> Result<Json<JobStatus>, ApiError> {
    state
        .scheduler
        .status()
        .into_iter()
        .find(|s| s.id == id)
        .map(Json)
        .ok_or_else(|| SchedulerError::JobNotFound { id }.into())
}

/// POST /scheduler/start
pub async fn start_scheduler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_auth(&state, &headers)?;
    state.scheduler.start();
    Ok(Json(json!({ "running": state.scheduler.is_running() })))
}

/// POST /scheduler/stop
pub async fn stop_scheduler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    check_auth(&state, &headers)?;
    state.scheduler.stop();
    Ok(Json(json!({ "running": state.scheduler.is_running() })))
}

/// POST /sync/full: start the full sync job in the background.
///
/// Returns 202 immediately; the outcome lands in the execution log.
pub async fn full_sync(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    check_auth(&state, &headers)?;
    if state.orchestrator.is_full_sync_running() {
        return Err(ApiError::Conflict(FULL_SYNC_RUNNING.to_string()));
    }
    if state.scheduler.job(FULL_SYNC_JOB).is_none() {
        return Err(SchedulerError::JobNotFound {
            id: FULL_SYNC_JOB.to_string(),
        }
        .into());
    }

    let scheduler = state.scheduler.clone();
    tokio::spawn(async move {
        match scheduler.run_job_now(FULL_SYNC_JOB).await {
            Ok(record) => info!(success = record.success, "requested full sync finished"),
            Err(e) => warn!(error = %e, "requested full sync could not run"),
        }
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "job_id": FULL_SYNC_JOB })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionsQuery {
    pub limit: Option<usize>,
    pub job_id: Option<String>,
}

/// GET /executions?limit=N&job_id=X, newest first.
pub async fn executions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ExecutionsQuery>,
) -> Result<Json<Vec<ExecutionRecord>>, ApiError> {
    check_auth(&state, &headers)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EXECUTIONS_LIMIT)
        .clamp(1, MAX_EXECUTIONS_LIMIT);
    let records = state.executions.recent(query.job_id.as_deref(), limit)?;
    Ok(Json(records))
}
