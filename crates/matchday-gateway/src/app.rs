use axum::{
    routing::{get, post},
    Router,
};
use matchday_core::MatchdayConfig;
use matchday_scheduler::{Scheduler, SqliteExecutionLog};
use matchday_sync::{RateLimitedQueue, SyncOrchestrator};
use std::sync::Arc;

use crate::http::{health, jobs};

/// Shared state handed to every Axum handler as `Arc<AppState>`.
pub struct AppState {
    pub config: MatchdayConfig,
    pub scheduler: Scheduler,
    pub orchestrator: Arc<SyncOrchestrator>,
    /// Same log the scheduler appends to, kept concrete for queries.
    pub executions: Arc<SqliteExecutionLog>,
    pub queue: RateLimitedQueue,
}

/// Assemble the admin API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        .route("/jobs", get(jobs::list_jobs))
        .route("/jobs/{id}/run", post(jobs::run_job))
        .route("/jobs/{id}/enable", post(jobs::enable_job))
        .route("/jobs/{id}/disable", post(jobs::disable_job))
        .route("/scheduler/start", post(jobs::start_scheduler))
        .route("/scheduler/stop", post(jobs::stop_scheduler))
        .route("/sync/full", post(jobs::full_sync))
        .route("/executions", get(jobs::executions))
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
