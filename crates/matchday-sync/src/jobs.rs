use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use matchday_core::config::JobOverride;
use matchday_core::SyncOutcome;
use matchday_scheduler::{JobDefinition, JobError, JobHandler, Priority, Scheduler, SchedulerError};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::entities::Entity;
use crate::orchestrator::SyncOrchestrator;

pub const FULL_SYNC_JOB: &str = "full_sync";

/// What a sync job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncJob {
    Entity(Entity),
    FullSync,
}

impl SyncJob {
    pub fn id(self) -> &'static str {
        match self {
            SyncJob::Entity(entity) => entity.id(),
            SyncJob::FullSync => FULL_SYNC_JOB,
        }
    }
}

/// [`JobHandler`] running one [`SyncJob`] against the shared orchestrator.
pub struct SyncJobHandler {
    job: SyncJob,
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncJobHandler {
    pub fn new(job: SyncJob, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { job, orchestrator }
    }
}

#[async_trait]
impl JobHandler for SyncJobHandler {
    async fn run(&self, cancel: CancellationToken) -> Result<SyncOutcome, JobError> {
        match self.job {
            SyncJob::Entity(entity) => Ok(self.orchestrator.sync_entity(entity, &cancel).await?),
            SyncJob::FullSync => {
                let report = self.orchestrator.full_sync(&cancel).await;
                if report.success {
                    return Ok(report.outcome);
                }
                let failed = report
                    .entities
                    .iter()
                    .filter(|r| !r.success)
                    .map(|r| format!("{}: {}", r.entity, r.error.as_deref().unwrap_or("failed")));
                let errors = std::iter::once(report.message.clone()).chain(failed).collect();
                Err(JobError::Partial {
                    outcome: report.outcome,
                    errors,
                })
            }
        }
    }
}

/// Built-in schedule and policy for one job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job: SyncJob,
    pub name: &'static str,
    pub schedule: &'static str,
    pub priority: Priority,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl JobSpec {
    fn new(job: SyncJob, name: &'static str, schedule: &'static str, priority: Priority) -> Self {
        Self {
            job,
            name,
            schedule,
            priority,
            max_retries: 2,
            retry_delay: Duration::from_secs(300),
            timeout: Duration::from_secs(600),
        }
    }

    fn retries(mut self, max_retries: u32, retry_delay_secs: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = Duration::from_secs(retry_delay_secs);
        self
    }

    fn timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    /// Definition with `overrides` applied.
    pub fn definition(&self, overrides: Option<&JobOverride>) -> JobDefinition {
        let mut def = JobDefinition::new(self.job.id(), self.name, self.schedule)
            .with_priority(self.priority)
            .with_retries(self.max_retries, self.retry_delay)
            .with_timeout(self.timeout);
        if let Some(o) = overrides {
            apply_override(&mut def, o);
        }
        def
    }
}

/// Lay the set fields of a `[jobs.<id>]` config section over `def`.
pub fn apply_override(def: &mut JobDefinition, o: &JobOverride) {
    if let Some(schedule) = &o.schedule {
        def.recurrence = schedule.clone();
    }
    if let Some(enabled) = o.enabled {
        def.enabled = enabled;
    }
    if let Some(n) = o.max_retries {
        def.max_retries = n;
    }
    if let Some(secs) = o.retry_delay_secs {
        def.retry_delay = Duration::from_secs(secs);
    }
    if let Some(secs) = o.timeout_secs {
        def.timeout = Duration::from_secs(secs);
    }
}

/// The standard job table: one job per entity plus the nightly full sync.
pub fn default_jobs() -> Vec<JobSpec> {
    use Entity::*;
    use Priority::*;
    let e = SyncJob::Entity;
    vec![
        JobSpec::new(e(Countries), "Sync countries", "0 3 * * 0", Low),
        JobSpec::new(e(Leagues), "Sync leagues", "0 4 * * *", Medium),
        JobSpec::new(e(Venues), "Sync venues", "0 4 * * 1", Low),
        JobSpec::new(e(Teams), "Sync teams", "0 5 * * *", Medium),
        JobSpec::new(e(Coaches), "Sync coaches", "0 5 * * 1", Low),
        JobSpec::new(e(Fixtures), "Sync fixtures", "*/15 * * * *", High)
            .retries(3, 60)
            .timeout(300),
        JobSpec::new(e(Standings), "Sync standings", "0 * * * *", High)
            .retries(3, 60)
            .timeout(300),
        JobSpec::new(e(Players), "Sync players", "0 6 * * *", Medium).timeout(1800),
        JobSpec::new(e(Injuries), "Sync injuries", "0 */6 * * *", Medium),
        JobSpec::new(e(Transfers), "Sync transfers", "0 7 * * *", Low),
        JobSpec::new(e(Odds), "Sync odds", "*/30 * * * *", Medium).retries(1, 120),
        JobSpec::new(SyncJob::FullSync, "Full sync", "0 2 * * *", High)
            .retries(1, 1800)
            .timeout(3 * 3600),
    ]
}

/// Register every default job on `scheduler`, applying config overrides.
///
/// An override whose schedule does not parse fails registration.
pub fn register_all(
    scheduler: &Scheduler,
    orchestrator: &Arc<SyncOrchestrator>,
    overrides: &HashMap<String, JobOverride>,
) -> Result<usize, SchedulerError> {
    let specs = default_jobs();
    for spec in &specs {
        let def = spec.definition(overrides.get(spec.job.id()));
        let handler = Arc::new(SyncJobHandler::new(spec.job, Arc::clone(orchestrator)));
        scheduler.register(def, handler)?;
    }
    info!(jobs = specs.len(), "sync jobs registered");
    Ok(specs.len())
}
