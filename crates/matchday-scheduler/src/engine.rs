use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashSet;
use futures_util::future::{BoxFuture, FutureExt};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use matchday_core::SyncOutcome;

use crate::{
    error::{JobError, Result, SchedulerError},
    handler::JobHandler,
    notify::NotificationSink,
    recurrence::{self, Recurrence},
    store::{ConfigStore, ExecutionLog},
    types::{ExecutionRecord, JobDefinition, JobPhase, JobStatus, PersistedJobState, Priority},
};

/// Error recorded when an execution is refused because one is in flight.
pub const ALREADY_RUNNING: &str = "already running";
/// Error recorded when a handler outlives its job's timeout.
pub const TIMEOUT: &str = "timeout";
/// Config namespace holding every job's [`PersistedJobState`].
pub const JOBS_NAMESPACE: &str = "scheduler.jobs";

struct JobEntry {
    def: JobDefinition,
    handler: Arc<dyn JobHandler>,
}

struct Inner {
    jobs: Mutex<HashMap<String, JobEntry>>,
    /// Last loaded/saved runtime state, including jobs not registered this run.
    persisted: Mutex<HashMap<String, PersistedJobState>>,
    /// Single-flight guard: ids with an execution in progress.
    active: DashSet<String>,
    timers: Mutex<HashMap<String, AbortHandle>>,
    retries: Mutex<HashMap<String, AbortHandle>>,
    running: AtomicBool,
    /// Bumped by every `stop()`; retries armed under an older value are void.
    generation: AtomicU64,
    config_store: Arc<dyn ConfigStore>,
    log: Arc<dyn ExecutionLog>,
    notifier: Arc<dyn NotificationSink>,
}

/// Job registry, timer lifecycle and execution engine.
///
/// Cheap to clone; every clone drives the same registry. Timers and retries
/// are tokio tasks, so the scheduler must be used inside a runtime.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

/// Removes a job from the active set when the execution ends or is dropped.
struct ActiveGuard<'a> {
    active: &'a DashSet<String>,
    id: &'a str,
}

impl<'a> ActiveGuard<'a> {
    fn acquire(active: &'a DashSet<String>, id: &'a str) -> Option<Self> {
        active.insert(id.to_string()).then_some(Self { active, id })
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(self.id);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Scheduler {
    /// Create a scheduler, loading persisted job state from `config_store`.
    ///
    /// Unreadable state is logged and ignored; jobs then start from their
    /// registered defaults.
    pub fn new(
        config_store: Arc<dyn ConfigStore>,
        log: Arc<dyn ExecutionLog>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let persisted = match config_store.load(JOBS_NAMESPACE) {
            Ok(Some(blob)) => serde_json::from_value(blob).unwrap_or_else(|e| {
                warn!("discarding unreadable job state: {e}");
                HashMap::new()
            }),
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!("job state load failed: {e}");
                HashMap::new()
            }
        };

        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                persisted: Mutex::new(persisted),
                active: DashSet::new(),
                timers: Mutex::new(HashMap::new()),
                retries: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                generation: AtomicU64::new(0),
                config_store,
                log,
                notifier,
            }),
        }
    }

    /// Register (or replace) a job.
    ///
    /// Persisted `enabled`/`last_run`/`next_run` for the same id are laid over
    /// `def`; everything else comes from `def`.
    pub fn register(&self, mut def: JobDefinition, handler: Arc<dyn JobHandler>) -> Result<()> {
        Recurrence::parse(&def.recurrence)?;

        let saved = lock(&self.inner.persisted).get(&def.id).cloned();
        if let Some(state) = saved {
            def.apply_persisted(&state);
        }

        let id = def.id.clone();
        let enabled = def.enabled;
        info!(job_id = %id, schedule = %def.recurrence, enabled, "job registered");
        lock(&self.inner.jobs).insert(id.clone(), JobEntry { def, handler });

        if self.is_running() {
            if enabled {
                self.schedule_next(&id)?;
            } else {
                self.cancel_timer(&id);
            }
        }
        Ok(())
    }

    /// Arm timers for every enabled job. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids: Vec<String> = lock(&self.inner.jobs)
            .values()
            .filter(|e| e.def.enabled)
            .map(|e| e.def.id.clone())
            .collect();
        for id in &ids {
            if let Err(e) = self.schedule_next(id) {
                error!(job_id = %id, "cannot schedule job: {e}");
            }
        }
        info!(jobs = ids.len(), "scheduler started");
    }

    /// Cancel every pending timer and retry. In-flight executions finish.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        for (_, timer) in lock(&self.inner.timers).drain() {
            timer.abort();
        }
        for (_, retry) in lock(&self.inner.retries).drain() {
            retry.abort();
        }
        info!("scheduler stopped");
    }

    /// Wait for in-flight executions to finish, for at most `limit`.
    /// Returns false if some were still running when it gave up.
    pub async fn drain(&self, limit: Duration) -> bool {
        let idle = async {
            while !self.inner.active.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(limit, idle).await.is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn enable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true)?;
        info!(job_id = %id, "job enabled");
        if self.is_running() {
            self.schedule_next(id)?;
        }
        Ok(())
    }

    /// Disable a job. A run already in progress is left alone.
    pub fn disable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false)?;
        self.cancel_timer(id);
        self.cancel_retry(id);
        info!(job_id = %id, "job disabled");
        Ok(())
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        {
            let mut jobs = lock(&self.inner.jobs);
            let entry = jobs.get_mut(id).ok_or_else(|| SchedulerError::JobNotFound {
                id: id.to_string(),
            })?;
            entry.def.enabled = enabled;
            if !enabled {
                entry.def.next_run = None;
            }
        }
        self.persist();
        Ok(())
    }

    /// Compute and persist the job's next run, and arm its timer while the
    /// scheduler is running. Returns `None` for a disabled job.
    ///
    /// The timer executes the job once and then calls `schedule_next` again.
    pub fn schedule_next(&self, id: &str) -> Result<Option<DateTime<Utc>>> {
        let next = {
            let mut jobs = lock(&self.inner.jobs);
            let entry = jobs.get_mut(id).ok_or_else(|| SchedulerError::JobNotFound {
                id: id.to_string(),
            })?;
            if !entry.def.enabled {
                return Ok(None);
            }
            let next = recurrence::next_trigger(&entry.def.recurrence, Utc::now())?;
            entry.def.next_run = Some(next);
            next
        };
        self.persist();
        self.arm(id, next);
        debug!(job_id = %id, next_run = %next, "next run scheduled");
        Ok(Some(next))
    }

    fn arm(&self, id: &str, at: DateTime<Utc>) {
        let delay = (at - Utc::now()).to_std().unwrap_or_default();
        let mut timers = lock(&self.inner.timers);
        // Checked under the timers lock so a concurrent stop() cannot miss us.
        if !self.is_running() {
            return;
        }

        let scheduler = self.clone();
        let job_id = id.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Run on its own task: aborting this timer must not abort the run.
            let run = {
                let scheduler = scheduler.clone();
                let job_id = job_id.clone();
                tokio::spawn(async move { scheduler.execute_job(&job_id).await })
            };
            match run.await {
                Ok(Err(e)) => warn!(job_id = %job_id, "scheduled execution failed: {e}"),
                Err(e) => error!(job_id = %job_id, "execution task panicked: {e}"),
                Ok(Ok(_)) => {}
            }
            if let Err(e) = scheduler.schedule_next(&job_id) {
                error!(job_id = %job_id, "cannot reschedule job: {e}");
            }
        });

        if let Some(previous) = timers.insert(id.to_string(), task.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel_timer(&self, id: &str) {
        if let Some(timer) = lock(&self.inner.timers).remove(id) {
            timer.abort();
        }
    }

    fn cancel_retry(&self, id: &str) {
        if let Some(retry) = lock(&self.inner.retries).remove(id) {
            debug!(job_id = %id, "pending retry cancelled");
            retry.abort();
        }
    }

    /// Run the job once now, awaiting the outcome. Same guard as timers.
    pub async fn run_job_now(&self, id: &str) -> Result<ExecutionRecord> {
        info!(job_id = %id, "manual run requested");
        self.execute_job(id).await
    }

    /// Execute one attempt of `id` with a fresh retry budget.
    ///
    /// Returns a failed record carrying [`ALREADY_RUNNING`] without invoking
    /// the handler when the job is already executing.
    pub async fn execute_job(&self, id: &str) -> Result<ExecutionRecord> {
        let budget = lock(&self.inner.jobs)
            .get(id)
            .map(|e| e.def.max_retries)
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })?;
        Ok(self.attempt(id.to_string(), budget, 1).await)
    }

    // Boxed so retries can spawn further attempts of the same future type.
    fn attempt(&self, id: String, retries_left: u32, attempt: u32) -> BoxFuture<'static, ExecutionRecord> {
        let scheduler = self.clone();
        async move { scheduler.run_attempt(&id, retries_left, attempt).await }.boxed()
    }

    async fn run_attempt(&self, id: &str, retries_left: u32, attempt: u32) -> ExecutionRecord {
        let entry = lock(&self.inner.jobs)
            .get(id)
            .map(|e| (e.def.clone(), Arc::clone(&e.handler)));
        let Some((def, handler)) = entry else {
            warn!(job_id = %id, "attempt for unregistered job dropped");
            return refused_record(id, attempt, "job not registered");
        };

        let Some(active) = ActiveGuard::acquire(&self.inner.active, id) else {
            debug!(job_id = %id, attempt, "execution skipped: already running");
            return refused_record(id, attempt, ALREADY_RUNNING);
        };

        let generation = self.inner.generation.load(Ordering::SeqCst);
        let start_time = Utc::now();
        let started = tokio::time::Instant::now();
        info!(job_id = %id, attempt, "job started");

        let cancel = CancellationToken::new();
        // Failures keep whatever outcome the handler could still report.
        let result = match tokio::time::timeout(def.timeout, handler.run(cancel.clone())).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(JobError::Partial { outcome, errors })) => Err((outcome, errors)),
            Ok(Err(e)) => Err((SyncOutcome::default(), vec![e.to_string()])),
            Err(_) => {
                cancel.cancel();
                Err((SyncOutcome::default(), vec![TIMEOUT.to_string()]))
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        self.mark_ran(id, start_time);

        let (outcome, errors) = match &result {
            Ok(outcome) => (*outcome, Vec::new()),
            Err((outcome, errors)) => (*outcome, errors.clone()),
        };
        let record = ExecutionRecord {
            id: Uuid::now_v7().to_string(),
            job_id: id.to_string(),
            start_time,
            end_time: Utc::now(),
            duration_ms,
            success: result.is_ok(),
            records_processed: outcome.synced,
            records_failed: outcome.errors,
            errors,
            api_calls_used: outcome.api_calls,
            attempt,
        };
        if let Err(e) = self.inner.log.append(&record) {
            warn!(job_id = %id, "execution record not written: {e}");
        }
        drop(active);

        match result {
            Ok(outcome) => {
                info!(job_id = %id, attempt, duration_ms, %outcome, "job succeeded");
                self.cancel_retry(id);
            }
            Err((_, errors)) => {
                let message = errors.join("; ");
                warn!(job_id = %id, attempt, duration_ms, error = %message, "job failed");
                if def.priority == Priority::High {
                    self.inner
                        .notifier
                        .alert(&format!("Sync job failed: {}", def.name), &message)
                        .await;
                }
                if retries_left > 0 {
                    if self.retry_allowed(id, generation) {
                        self.schedule_retry(id, retries_left - 1, attempt + 1, def.retry_delay, generation);
                    } else {
                        info!(job_id = %id, "retry skipped: job disabled or scheduler stopped");
                    }
                } else if def.max_retries > 0 {
                    warn!(job_id = %id, attempts = attempt, "retries exhausted");
                }
            }
        }
        record
    }

    /// A retry may run only while the job is enabled and no `stop()` has
    /// happened since `generation` was read.
    fn retry_allowed(&self, id: &str, generation: u64) -> bool {
        let enabled = lock(&self.inner.jobs).get(id).is_some_and(|e| e.def.enabled);
        enabled && self.inner.generation.load(Ordering::SeqCst) == generation
    }

    fn schedule_retry(&self, id: &str, retries_left: u32, attempt: u32, delay: Duration, generation: u64) {
        info!(job_id = %id, attempt, retries_left, delay_secs = delay.as_secs(), "retry scheduled");
        let scheduler = self.clone();
        let job_id = id.to_string();
        let mut retries = lock(&self.inner.retries);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // No longer pending once it fires.
            lock(&scheduler.inner.retries).remove(&job_id);
            if !scheduler.retry_allowed(&job_id, generation) {
                debug!(job_id = %job_id, attempt, "retry dropped: job disabled or scheduler stopped");
                return;
            }
            scheduler.attempt(job_id, retries_left, attempt).await;
        });
        if let Some(previous) = retries.insert(id.to_string(), task.abort_handle()) {
            previous.abort();
        }
    }

    fn mark_ran(&self, id: &str, at: DateTime<Utc>) {
        if let Some(entry) = lock(&self.inner.jobs).get_mut(id) {
            entry.def.last_run = Some(at);
        }
        self.persist();
    }

    /// Write every job's runtime state as one blob. Failures only warn.
    fn persist(&self) {
        let blob = {
            let jobs = lock(&self.inner.jobs);
            let mut persisted = lock(&self.inner.persisted);
            for (id, entry) in jobs.iter() {
                persisted.insert(id.clone(), entry.def.persisted_state());
            }
            serde_json::to_value(&*persisted)
        };
        let result = blob
            .map_err(SchedulerError::from)
            .and_then(|blob| self.inner.config_store.save(JOBS_NAMESPACE, &blob));
        if let Err(e) = result {
            warn!("job state not persisted: {e}");
        }
    }

    /// Snapshot of every registered job, highest priority first.
    pub fn status(&self) -> Vec<JobStatus> {
        let retries: Vec<String> = lock(&self.inner.retries).keys().cloned().collect();
        let mut out: Vec<JobStatus> = lock(&self.inner.jobs)
            .values()
            .map(|e| {
                let is_active = self.inner.active.contains(&e.def.id);
                let phase = if is_active {
                    JobPhase::Running
                } else if retries.contains(&e.def.id) {
                    JobPhase::RetryPending
                } else {
                    JobPhase::Idle
                };
                JobStatus {
                    id: e.def.id.clone(),
                    name: e.def.name.clone(),
                    schedule: e.def.recurrence.clone(),
                    enabled: e.def.enabled,
                    last_run: e.def.last_run,
                    next_run: e.def.next_run,
                    is_active,
                    phase,
                    priority: e.def.priority,
                }
            })
            .collect();
        out.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
        out
    }

    /// Copy of the job's current definition.
    pub fn job(&self, id: &str) -> Option<JobDefinition> {
        lock(&self.inner.jobs).get(id).map(|e| e.def.clone())
    }
}

fn refused_record(id: &str, attempt: u32, reason: &str) -> ExecutionRecord {
    let now = Utc::now();
    ExecutionRecord {
        id: Uuid::now_v7().to_string(),
        job_id: id.to_string(),
        start_time: now,
        end_time: now,
        duration_ms: 0,
        success: false,
        records_processed: 0,
        records_failed: 0,
        errors: vec![reason.to_string()],
        api_calls_used: 0,
        attempt,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use crate::notify::TracingNotifier;
    use crate::store::{MemoryConfigStore, MemoryExecutionLog};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingNotifier {
        alerts: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationSink for RecordingNotifier {
        async fn alert(&self, title: &str, message: &str) {
            lock(&self.alerts).push((title.to_string(), message.to_string()));
        }
    }

    fn build(store: Arc<MemoryConfigStore>) -> (Scheduler, Arc<MemoryExecutionLog>) {
        let log = Arc::new(MemoryExecutionLog::new());
        let scheduler = Scheduler::new(store, log.clone(), Arc::new(TracingNotifier));
        (scheduler, log)
    }

    fn counting_ok(calls: Arc<AtomicU32>) -> Arc<dyn JobHandler> {
        handler_fn(move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(SyncOutcome::new(3, 1))
            }
        })
    }

    fn counting_err(calls: Arc<AtomicU32>) -> Arc<dyn JobHandler> {
        handler_fn(move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(JobError::Provider("HTTP 503".to_string()))
            }
        })
    }

    #[tokio::test]
    async fn overlapping_execution_is_refused() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());
        let handler = {
            let calls = calls.clone();
            let gate = gate.clone();
            handler_fn(move |_| {
                let calls = calls.clone();
                let gate = gate.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(SyncOutcome::new(1, 0))
                }
            })
        };
        scheduler
            .register(JobDefinition::new("fixtures", "Fixtures", "*/2 * * * *"), handler)
            .unwrap();

        let first = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.execute_job("fixtures").await }
        });
        while !scheduler.status()[0].is_active {
            tokio::task::yield_now().await;
        }
        assert_eq!(scheduler.status()[0].phase, JobPhase::Running);

        let second = scheduler.execute_job("fixtures").await.unwrap();
        assert!(!second.success);
        assert_eq!(second.errors, vec![ALREADY_RUNNING.to_string()]);
        assert!(second.is_overlap());

        gate.notify_one();
        let first = first.await.unwrap().unwrap();
        assert!(first.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // Only the real attempt is logged.
        assert_eq!(log.len(), 1);
        assert!(!scheduler.status()[0].is_active);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_job_retries_exactly_max_retries_times() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                JobDefinition::new("standings", "Standings", "0 * * * *")
                    .with_retries(3, Duration::from_secs(10)),
                counting_err(calls.clone()),
            )
            .unwrap();

        let first = scheduler.run_job_now("standings").await.unwrap();
        assert!(!first.success);
        assert_eq!(first.errors, vec!["provider error: HTTP 503".to_string()]);
        assert_eq!(scheduler.status()[0].phase, JobPhase::RetryPending);

        tokio::time::sleep(Duration::from_secs(60)).await;
        let records = log.records();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| !r.success));
        assert_eq!(
            records.iter().map(|r| r.attempt).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(log.len(), 4);
        // The configured budget is untouched for the next occurrence.
        assert_eq!(scheduler.job("standings").unwrap().max_retries, 3);
        assert_eq!(scheduler.status()[0].phase, JobPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_chain_ends_on_success() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let handler = {
            let calls = calls.clone();
            handler_fn(move |_| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(JobError::Provider("timeout".to_string()))
                    } else {
                        Ok(SyncOutcome::new(5, 0))
                    }
                }
            })
        };
        scheduler
            .register(
                JobDefinition::new("teams", "Teams", "0 5 * * *")
                    .with_retries(3, Duration::from_secs(5)),
                handler,
            )
            .unwrap();

        scheduler.run_job_now("teams").await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        let records = log.records();
        assert_eq!(records.len(), 2);
        assert!(!records[0].success);
        assert!(records[1].success);
        assert_eq!(records[1].records_processed, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_drops_the_handler_future() {
        struct DropFlag(Arc<AtomicBool>);
        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let dropped = Arc::new(AtomicBool::new(false));
        let token_seen: Arc<Mutex<Option<CancellationToken>>> = Arc::new(Mutex::new(None));
        let handler = {
            let dropped = dropped.clone();
            let token_seen = token_seen.clone();
            handler_fn(move |cancel| {
                let flag = DropFlag(dropped.clone());
                *lock(&token_seen) = Some(cancel);
                async move {
                    let _flag = flag;
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(SyncOutcome::default())
                }
            })
        };
        scheduler
            .register(
                JobDefinition::new("players", "Players", "0 6 * * *")
                    .with_retries(0, Duration::ZERO)
                    .with_timeout(Duration::from_secs(2)),
                handler,
            )
            .unwrap();

        let record = scheduler.run_job_now("players").await.unwrap();
        assert!(!record.success);
        assert_eq!(record.errors, vec![TIMEOUT.to_string()]);
        assert!(record.duration_ms >= 2000);
        assert!(dropped.load(Ordering::SeqCst));
        assert!(lock(&token_seen).as_ref().unwrap().is_cancelled());
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn success_records_outcome_and_last_run() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                JobDefinition::new("leagues", "Leagues", "0 4 * * *"),
                counting_ok(calls.clone()),
            )
            .unwrap();

        let record = scheduler.run_job_now("leagues").await.unwrap();
        assert!(record.success);
        assert_eq!(record.records_processed, 3);
        assert_eq!(record.records_failed, 1);
        assert!(record.errors.is_empty());
        assert_eq!(record.attempt, 1);
        assert_eq!(log.records(), vec![record.clone()]);
        assert_eq!(scheduler.job("leagues").unwrap().last_run, Some(record.start_time));
    }

    #[tokio::test]
    async fn partial_failure_keeps_counts_and_every_error() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let handler = handler_fn(|_| async {
            Err(JobError::Partial {
                outcome: SyncOutcome {
                    synced: 7,
                    errors: 1,
                    api_calls: 4,
                },
                errors: vec!["2 of 5 parts failed".to_string(), "venues: HTTP 500".to_string()],
            })
        });
        scheduler
            .register(
                JobDefinition::new("bulk", "Bulk", "0 2 * * *").with_retries(0, Duration::ZERO),
                handler,
            )
            .unwrap();

        let record = scheduler.run_job_now("bulk").await.unwrap();
        assert!(!record.success);
        assert_eq!(record.records_processed, 7);
        assert_eq!(record.records_failed, 1);
        assert_eq!(record.api_calls_used, 4);
        assert_eq!(record.errors, vec!["2 of 5 parts failed", "venues: HTTP 500"]);
        assert_eq!(log.records(), vec![record]);
    }

    #[tokio::test]
    async fn only_high_priority_failures_alert() {
        let notifier = Arc::new(RecordingNotifier::default());
        let scheduler = Scheduler::new(
            Arc::new(MemoryConfigStore::new()),
            Arc::new(MemoryExecutionLog::new()),
            notifier.clone(),
        );
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                JobDefinition::new("fixtures", "Fixtures", "*/15 * * * *")
                    .with_priority(Priority::High)
                    .with_retries(0, Duration::ZERO),
                counting_err(calls.clone()),
            )
            .unwrap();
        scheduler
            .register(
                JobDefinition::new("transfers", "Transfers", "0 7 * * *")
                    .with_priority(Priority::Low)
                    .with_retries(0, Duration::ZERO),
                counting_err(calls.clone()),
            )
            .unwrap();

        scheduler.run_job_now("fixtures").await.unwrap();
        scheduler.run_job_now("transfers").await.unwrap();

        let alerts = lock(&notifier.alerts).clone();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].0, "Sync job failed: Fixtures");
        assert!(alerts[0].1.contains("HTTP 503"));
    }

    #[tokio::test]
    async fn persisted_state_survives_restart_without_touching_static_fields() {
        let store = Arc::new(MemoryConfigStore::new());
        let calls = Arc::new(AtomicU32::new(0));

        let (first, _) = build(store.clone());
        first
            .register(
                JobDefinition::new("countries", "Countries", "0 3 * * 0")
                    .with_priority(Priority::Low),
                counting_ok(calls.clone()),
            )
            .unwrap();
        let ran = first.run_job_now("countries").await.unwrap();
        first.disable("countries").unwrap();

        let (second, _) = build(store);
        second
            .register(
                JobDefinition::new("countries", "Countries", "0 4 * * 1")
                    .with_priority(Priority::Medium),
                counting_ok(calls),
            )
            .unwrap();

        let job = second.job("countries").unwrap();
        assert!(!job.enabled);
        assert_eq!(job.last_run, Some(ran.start_time));
        assert_eq!(job.recurrence, "0 4 * * 1");
        assert_eq!(job.priority, Priority::Medium);
    }

    #[tokio::test(start_paused = true)]
    async fn timers_fire_and_reschedule_until_stopped() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                JobDefinition::new("odds", "Odds", "*/1 * * * *"),
                counting_ok(calls.clone()),
            )
            .unwrap();
        assert!(scheduler.job("odds").unwrap().next_run.is_none());

        scheduler.start();
        let next = scheduler.job("odds").unwrap().next_run.unwrap();
        assert!(next > Utc::now());

        tokio::time::sleep(Duration::from_secs(125)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(log.len(), 2);

        scheduler.stop();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn disable_cancels_timer_and_enable_rearms() {
        let (scheduler, _) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                JobDefinition::new("injuries", "Injuries", "*/1 * * * *"),
                counting_ok(calls.clone()),
            )
            .unwrap();
        scheduler.start();

        scheduler.disable("injuries").unwrap();
        assert_eq!(scheduler.schedule_next("injuries").unwrap(), None);
        assert!(scheduler.job("injuries").unwrap().next_run.is_none());
        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        scheduler.enable("injuries").unwrap();
        assert!(scheduler.job("injuries").unwrap().next_run.is_some());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        scheduler.stop();
    }

    #[tokio::test]
    async fn unknown_jobs_and_bad_schedules_are_errors() {
        let (scheduler, _) = build(Arc::new(MemoryConfigStore::new()));
        assert!(matches!(
            scheduler.run_job_now("nope").await,
            Err(SchedulerError::JobNotFound { .. })
        ));
        assert!(matches!(
            scheduler.enable("nope"),
            Err(SchedulerError::JobNotFound { .. })
        ));
        let calls = Arc::new(AtomicU32::new(0));
        assert!(matches!(
            scheduler.register(JobDefinition::new("bad", "Bad", "0 5 * *"), counting_ok(calls)),
            Err(SchedulerError::InvalidSchedule(_))
        ));
        assert!(scheduler.status().is_empty());
    }

    /// Handler that fails once `gate` is released, counting calls.
    fn gated_err(calls: Arc<AtomicU32>, gate: Arc<Notify>) -> Arc<dyn JobHandler> {
        handler_fn(move |_| {
            let calls = calls.clone();
            let gate = gate.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    gate.notified().await;
                }
                Err(JobError::Provider("HTTP 503".to_string()))
            }
        })
    }

    async fn wait_active(scheduler: &Scheduler, id: &str) {
        while !scheduler.status().iter().any(|s| s.id == id && s.is_active) {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_during_a_failing_run_prevents_retries() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());
        scheduler
            .register(
                JobDefinition::new("venues", "Venues", "0 4 * * 1")
                    .with_retries(3, Duration::from_secs(10)),
                gated_err(calls.clone(), gate.clone()),
            )
            .unwrap();

        let run = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.execute_job("venues").await }
        });
        wait_active(&scheduler, "venues").await;
        scheduler.disable("venues").unwrap();
        gate.notify_one();
        assert!(!run.await.unwrap().unwrap().success);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 1);
        assert_eq!(scheduler.status()[0].phase, JobPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_while_a_retry_waits_drops_it() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        scheduler
            .register(
                JobDefinition::new("coaches", "Coaches", "0 5 * * 1")
                    .with_retries(3, Duration::from_secs(10)),
                counting_err(calls.clone()),
            )
            .unwrap();

        scheduler.run_job_now("coaches").await.unwrap();
        assert_eq!(scheduler.status()[0].phase, JobPhase::RetryPending);
        scheduler.disable("coaches").unwrap();
        scheduler.enable("coaches").unwrap();
        scheduler.disable("coaches").unwrap();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_during_a_failing_run_prevents_retries() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let gate = Arc::new(Notify::new());
        scheduler
            .register(
                JobDefinition::new("transfers", "Transfers", "0 7 * * *")
                    .with_retries(3, Duration::from_secs(10)),
                gated_err(calls.clone(), gate.clone()),
            )
            .unwrap();
        scheduler.start();

        let run = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.execute_job("transfers").await }
        });
        wait_active(&scheduler, "transfers").await;
        scheduler.stop();
        gate.notify_one();
        assert!(!run.await.unwrap().unwrap().success);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(log.len(), 1);
        // Still enabled: only the retry chain was abandoned.
        assert!(scheduler.job("transfers").unwrap().enabled);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_waits_for_in_flight_runs_up_to_the_limit() {
        let (scheduler, log) = build(Arc::new(MemoryConfigStore::new()));
        let handler = handler_fn(|_| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(SyncOutcome::new(1, 0))
        });
        scheduler
            .register(JobDefinition::new("standings", "Standings", "0 * * * *"), handler)
            .unwrap();
        assert!(scheduler.drain(Duration::ZERO).await);

        tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.execute_job("standings").await }
        });
        wait_active(&scheduler, "standings").await;

        assert!(!scheduler.drain(Duration::from_secs(1)).await);
        assert!(scheduler.drain(Duration::from_secs(10)).await);
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn status_is_sorted_by_priority() {
        let (scheduler, _) = build(Arc::new(MemoryConfigStore::new()));
        let calls = Arc::new(AtomicU32::new(0));
        for (id, priority) in [("b", Priority::Low), ("a", Priority::High), ("c", Priority::High)] {
            scheduler
                .register(
                    JobDefinition::new(id, id, "0 * * * *").with_priority(priority),
                    counting_ok(calls.clone()),
                )
                .unwrap();
        }
        let ids: Vec<String> = scheduler.status().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }
}
