//! `matchday-core`: configuration, error type and values shared by every
//! matchday crate.

pub mod config;
pub mod error;
pub mod types;

pub use config::MatchdayConfig;
pub use error::{MatchdayError, Result};
pub use types::SyncOutcome;
