//! `matchday-sync`: football data synchronization.
//!
//! Entity handlers fetch pages from a [`DataProvider`] (normally an
//! [`ApiFootballProvider`] behind a [`QueuedProvider`], so every call obeys
//! the per-minute ceiling), map records onto rows and upsert them into a
//! [`RelationalStore`]. [`SyncOrchestrator`] composes them into the phased
//! full sync, and [`jobs`] registers everything on a
//! [`matchday_scheduler::Scheduler`].

pub mod entities;
pub mod error;
pub mod football;
pub mod handlers;
pub mod jobs;
pub mod orchestrator;
pub mod provider;
pub mod queue;
pub mod store;

pub use entities::{Entity, SyncScope};
pub use error::{ProviderError, QueueError, Result, StoreError, SyncError, TransformError};
pub use football::ApiFootballProvider;
pub use handlers::SyncContext;
pub use jobs::{apply_override, default_jobs, register_all, SyncJob, SyncJobHandler, FULL_SYNC_JOB};
pub use orchestrator::{EntityReport, FullSyncReport, SyncOrchestrator, PHASES};
pub use provider::{DataProvider, ProviderResponse, QueuedProvider, Query};
pub use queue::{QueueStats, RateLimitedQueue, RateWindow};
pub use store::{RelationalStore, Row, SqliteStore};
