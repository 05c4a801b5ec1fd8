//! Persistence seams used by the scheduler.
//!
//! Both stores are best-effort from the scheduler's point of view: a failed
//! write is logged and the job carries on. SQLite implementations live in
//! [`crate::db`]; the in-memory ones here back tests and dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::error::Result;
use crate::types::ExecutionRecord;

/// Namespaced JSON blobs (job runtime state is one blob).
pub trait ConfigStore: Send + Sync {
    fn load(&self, namespace: &str) -> Result<Option<Value>>;
    fn save(&self, namespace: &str, value: &Value) -> Result<()>;
}

/// Append-only sink for execution records. Retention is the log's concern.
pub trait ExecutionLog: Send + Sync {
    fn append(&self, record: &ExecutionRecord) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, namespace: &str) -> Result<Option<Value>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(namespace).cloned())
    }

    fn save(&self, namespace: &str, value: &Value) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(namespace.to_string(), value.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryExecutionLog {
    records: Mutex<Vec<ExecutionRecord>>,
}

impl MemoryExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<ExecutionRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExecutionLog for MemoryExecutionLog {
    fn append(&self, record: &ExecutionRecord) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}
