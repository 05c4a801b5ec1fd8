//! Housekeeping jobs that run on the same scheduler as the sync jobs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use matchday_core::config::JobOverride;
use matchday_core::SyncOutcome;
use matchday_scheduler::{
    JobDefinition, JobError, JobHandler, Priority, Scheduler, SchedulerError, SqliteExecutionLog,
};
use matchday_sync::apply_override;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const LOG_RETENTION_JOB: &str = "log_retention";

/// Deletes execution records older than the retention period.
/// Reports the number removed as `synced`.
pub struct LogRetention {
    log: Arc<SqliteExecutionLog>,
    retention_days: u32,
}

impl LogRetention {
    pub fn new(log: Arc<SqliteExecutionLog>, retention_days: u32) -> Self {
        Self {
            log,
            retention_days,
        }
    }
}

#[async_trait]
impl JobHandler for LogRetention {
    async fn run(&self, _cancel: CancellationToken) -> Result<SyncOutcome, JobError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(self.retention_days));
        let removed = self
            .log
            .prune_older_than(cutoff)
            .map_err(|e| JobError::Failed(e.to_string()))?;
        info!(removed, retention_days = self.retention_days, "execution log pruned");
        Ok(SyncOutcome::new(removed as u64, 0))
    }
}

pub fn register(
    scheduler: &Scheduler,
    log: Arc<SqliteExecutionLog>,
    retention_days: u32,
    overrides: &HashMap<String, JobOverride>,
) -> Result<(), SchedulerError> {
    let mut def = JobDefinition::new(LOG_RETENTION_JOB, "Prune execution log", "30 3 * * *")
        .with_priority(Priority::Low)
        .with_retries(1, Duration::from_secs(600))
        .with_timeout(Duration::from_secs(120));
    if let Some(o) = overrides.get(LOG_RETENTION_JOB) {
        apply_override(&mut def, o);
    }
    scheduler.register(def, Arc::new(LogRetention::new(log, retention_days)))
}
