use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How loudly a job's failures are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Failures also raise an alert on the notification sink.
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A registered job: static policy plus its mutable scheduling fields.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
    /// Five-field recurrence expression, see [`crate::recurrence`].
    pub recurrence: String,
    pub enabled: bool,
    pub priority: Priority,
    /// Retries after a failed attempt. Never decremented in place.
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
    /// Start of the most recent attempt, successful or not.
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

impl JobDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, recurrence: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            recurrence: recurrence.into(),
            enabled: true,
            priority: Priority::Medium,
            max_retries: 2,
            retry_delay: Duration::from_secs(60),
            timeout: Duration::from_secs(300),
            last_run: None,
            next_run: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn persisted_state(&self) -> PersistedJobState {
        PersistedJobState {
            enabled: self.enabled,
            last_run: self.last_run,
            next_run: self.next_run,
        }
    }

    /// Overlay persisted runtime fields; static policy stays as registered.
    pub(crate) fn apply_persisted(&mut self, state: &PersistedJobState) {
        self.enabled = state.enabled;
        self.last_run = state.last_run;
        self.next_run = state.next_run;
    }
}

/// The mutable slice of a [`JobDefinition`] that survives restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedJobState {
    pub enabled: bool,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run: Option<DateTime<Utc>>,
}

/// Immutable log entry for one attempt at running a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// UUIDv7, so records sort by start time.
    pub id: String,
    pub job_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub records_processed: u64,
    pub records_failed: u64,
    pub errors: Vec<String>,
    pub api_calls_used: u64,
    /// 1 for the scheduled or manual attempt, 2.. for retries.
    pub attempt: u32,
}

impl ExecutionRecord {
    /// Whether this record only reports that an overlapping run was refused.
    pub fn is_overlap(&self) -> bool {
        !self.success && self.errors.iter().any(|e| e == crate::engine::ALREADY_RUNNING)
    }
}

/// Where a job sits in its execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Idle,
    Running,
    /// Last attempt failed and a retry timer is armed.
    RetryPending,
}

/// Read-only snapshot returned by [`crate::Scheduler::status`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub schedule: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub phase: JobPhase,
    pub priority: Priority,
}
