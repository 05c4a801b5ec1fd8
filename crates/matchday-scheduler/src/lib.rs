//! `matchday-scheduler`: recurring job registry and execution engine.
//!
//! # Overview
//!
//! Jobs are registered with a five-field recurrence expression and an
//! async [`JobHandler`]. While the [`Scheduler`] is running, every enabled
//! job has one armed tokio timer; when it fires the job executes under a
//! per-job single-flight guard and a timeout, the attempt is appended to the
//! [`ExecutionLog`], failures are retried up to the job's budget, and the
//! next occurrence is computed.
//!
//! Runtime state (`enabled`, `last_run`, `next_run`) is persisted as one
//! JSON blob through a [`ConfigStore`] and overlaid on registration.
//!
//! # Recurrence expressions
//!
//! | Expression       | Next trigger                                   |
//! |------------------|------------------------------------------------|
//! | `0 3 * * *`      | Next 03:00 UTC                                 |
//! | `*/15 * * * *`   | Exactly 15 minutes after now                   |
//! | `0 * * * *`      | Next top of the hour                           |
//! | `0 4 * * 1`      | Next Monday 04:00 UTC                          |
//! | anything else    | General five-field cron match                  |

pub mod db;
pub mod engine;
pub mod error;
pub mod handler;
pub mod notify;
pub mod recurrence;
pub mod store;
pub mod types;

pub use db::{SqliteConfigStore, SqliteExecutionLog};
pub use engine::{Scheduler, ALREADY_RUNNING, TIMEOUT};
pub use error::{JobError, RecurrenceError, Result, SchedulerError};
pub use handler::{handler_fn, JobHandler};
pub use notify::{NotificationSink, TracingNotifier};
pub use recurrence::{next_trigger, Recurrence};
pub use store::{ConfigStore, ExecutionLog, MemoryConfigStore, MemoryExecutionLog};
pub use types::{ExecutionRecord, JobDefinition, JobPhase, JobStatus, PersistedJobState, Priority};
