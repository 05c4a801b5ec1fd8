use std::fmt;
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};

/// Counts reported by one handler run.
///
/// `synced` and `errors` are per row: a record that fails to transform or
/// upsert bumps `errors` and the batch carries on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOutcome {
    pub synced: u64,
    pub errors: u64,
    /// Provider calls issued while producing this outcome.
    #[serde(default)]
    pub api_calls: u64,
}

impl SyncOutcome {
    pub fn new(synced: u64, errors: u64) -> Self {
        Self {
            synced,
            errors,
            api_calls: 0,
        }
    }
}

impl AddAssign for SyncOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.synced += rhs.synced;
        self.errors += rhs.errors;
        self.api_calls += rhs.api_calls;
    }
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} synced, {} errors, {} api calls",
            self.synced, self.errors, self.api_calls
        )
    }
}
