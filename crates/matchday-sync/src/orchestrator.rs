use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use matchday_core::SyncOutcome;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::entities::Entity;
use crate::error::{Result, SyncError};
use crate::handlers::SyncContext;

/// Message of a full sync refused because another is in progress.
pub const FULL_SYNC_RUNNING: &str = "full sync already in progress (already running)";

/// Full-sync phases. Later phases reference keys written by earlier ones.
pub const PHASES: &[(&str, &[Entity])] = &[
    ("reference", &[Entity::Countries, Entity::Leagues, Entity::Venues]),
    ("dependent", &[Entity::Teams, Entity::Coaches]),
    ("events", &[Entity::Fixtures, Entity::Standings]),
    ("ancillary", &[Entity::Players, Entity::Injuries, Entity::Transfers]),
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub phase: &'static str,
    pub entity: &'static str,
    pub success: bool,
    pub outcome: SyncOutcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FullSyncReport {
    pub success: bool,
    pub message: String,
    pub outcome: SyncOutcome,
    pub entities: Vec<EntityReport>,
}

/// Clears the full-sync flag however the run ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns the per-entity handlers and the process-wide full-sync flag.
pub struct SyncOrchestrator {
    ctx: Arc<SyncContext>,
    full_sync_running: AtomicBool,
}

impl SyncOrchestrator {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            full_sync_running: AtomicBool::new(false),
        }
    }

    pub fn is_full_sync_running(&self) -> bool {
        self.full_sync_running.load(Ordering::Acquire)
    }

    /// Sync one entity. Not guarded by the full-sync flag.
    pub async fn sync_entity(&self, entity: Entity, cancel: &CancellationToken) -> Result<SyncOutcome> {
        self.ctx.sync_entity(entity, cancel).await
    }

    /// Run every phase in order. A failing handler is recorded and the
    /// remaining handlers still run; cancellation stops the whole sync.
    pub async fn full_sync(&self, cancel: &CancellationToken) -> FullSyncReport {
        if self
            .full_sync_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("full sync requested while one is in progress");
            return FullSyncReport {
                success: false,
                message: FULL_SYNC_RUNNING.to_string(),
                outcome: SyncOutcome::default(),
                entities: Vec::new(),
            };
        }
        let _running = RunningGuard(&self.full_sync_running);
        info!("full sync started");

        let mut total = SyncOutcome::default();
        let mut entities = Vec::new();
        let mut cancelled = false;

        'phases: for &(phase, members) in PHASES {
            info!(phase, "full sync phase");
            for entity in members.iter().copied() {
                let result = self.ctx.sync_entity(entity, cancel).await;
                let report = match result {
                    Ok(outcome) => {
                        total += outcome;
                        EntityReport {
                            phase,
                            entity: entity.id(),
                            success: true,
                            outcome,
                            error: None,
                        }
                    }
                    Err(e) => {
                        error!(phase, entity = %entity, error = %e, "full sync handler failed");
                        cancelled = matches!(e, SyncError::Cancelled);
                        EntityReport {
                            phase,
                            entity: entity.id(),
                            success: false,
                            outcome: SyncOutcome::default(),
                            error: Some(e.to_string()),
                        }
                    }
                };
                entities.push(report);
                if cancelled {
                    break 'phases;
                }
            }
        }

        let failed = entities.iter().filter(|r| !r.success).count();
        let message = if cancelled {
            "full sync cancelled".to_string()
        } else if failed == 0 {
            "full sync completed".to_string()
        } else {
            format!("full sync completed with {failed} failed handler(s)")
        };
        info!(%total, failed, "{message}");

        FullSyncReport {
            success: failed == 0,
            message,
            outcome: total,
            entities,
        }
    }
}
