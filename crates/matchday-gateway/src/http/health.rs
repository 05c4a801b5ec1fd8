use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health: liveness probe with scheduler and queue state.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "scheduler_running": state.scheduler.is_running(),
        "full_sync_running": state.orchestrator.is_full_sync_running(),
        "jobs": state.scheduler.status().len(),
        "queue": state.queue.stats(),
    }))
}
