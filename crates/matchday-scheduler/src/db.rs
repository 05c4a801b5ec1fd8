use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::store::{ConfigStore, ExecutionLog};
use crate::types::ExecutionRecord;

/// Initialise the scheduler schema in `conn`.
///
/// Creates the `app_config` blob table and the append-only
/// `execution_log` (idempotent), with an index on `start_time` for the
/// retention sweep and "recent runs" queries.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS app_config (
            namespace   TEXT    NOT NULL PRIMARY KEY,
            value       TEXT    NOT NULL,   -- JSON blob
            updated_at  TEXT    NOT NULL
        ) STRICT;

        CREATE TABLE IF NOT EXISTS execution_log (
            id                 TEXT    NOT NULL PRIMARY KEY,
            job_id             TEXT    NOT NULL,
            start_time         TEXT    NOT NULL,   -- RFC 3339, millisecond precision
            end_time           TEXT    NOT NULL,
            duration_ms        INTEGER NOT NULL,
            success            INTEGER NOT NULL,
            records_processed  INTEGER NOT NULL,
            records_failed     INTEGER NOT NULL,
            errors             TEXT    NOT NULL,   -- JSON array of strings
            api_calls_used     INTEGER NOT NULL,
            attempt            INTEGER NOT NULL
        ) STRICT;

        CREATE INDEX IF NOT EXISTS idx_execution_log_start ON execution_log (start_time);
        CREATE INDEX IF NOT EXISTS idx_execution_log_job ON execution_log (job_id, start_time);
        ",
    )?;
    Ok(())
}

fn ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// [`ConfigStore`] over the `app_config` table.
pub struct SqliteConfigStore {
    conn: Mutex<Connection>,
}

impl SqliteConfigStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ConfigStore for SqliteConfigStore {
    fn load(&self, namespace: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let raw: Option<String> = conn
            .query_row(
                "SELECT value FROM app_config WHERE namespace = ?1",
                [namespace],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, namespace: &str, value: &Value) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        conn.execute(
            "INSERT INTO app_config (namespace, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(namespace) DO UPDATE SET value = excluded.value,
                                                  updated_at = excluded.updated_at",
            rusqlite::params![namespace, value.to_string(), ts(&Utc::now())],
        )?;
        Ok(())
    }
}

/// [`ExecutionLog`] over the `execution_log` table.
pub struct SqliteExecutionLog {
    conn: Mutex<Connection>,
}

const RECORD_COLUMNS: &str = "id, job_id, start_time, end_time, duration_ms, success,
     records_processed, records_failed, errors, api_calls_used, attempt";

impl SqliteExecutionLog {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Most recent records first, optionally for one job.
    pub fn recent(&self, job_id: Option<&str>, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let limit = limit as i64;
        let records = match job_id {
            Some(job_id) => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {RECORD_COLUMNS} FROM execution_log
                     WHERE job_id = ?1 ORDER BY start_time DESC, id DESC LIMIT ?2"
                ))?;
                let rows = stmt.query_map(rusqlite::params![job_id, limit], record_from_row)?;
                let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                records
            }
            None => {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT {RECORD_COLUMNS} FROM execution_log
                     ORDER BY start_time DESC, id DESC LIMIT ?1"
                ))?;
                let rows = stmt.query_map([limit], record_from_row)?;
                let records = rows.collect::<rusqlite::Result<Vec<_>>>()?;
                records
            }
        };
        Ok(records)
    }

    /// Delete records that started before `cutoff`. Returns the number removed.
    pub fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let n = conn.execute(
            "DELETE FROM execution_log WHERE start_time < ?1",
            [ts(&cutoff)],
        )?;
        debug!(removed = n, cutoff = %cutoff, "execution log pruned");
        Ok(n)
    }
}

impl ExecutionLog for SqliteExecutionLog {
    fn append(&self, record: &ExecutionRecord) -> Result<()> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let errors = serde_json::to_string(&record.errors)?;
        conn.execute(
            &format!(
                "INSERT INTO execution_log ({RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            rusqlite::params![
                record.id,
                record.job_id,
                ts(&record.start_time),
                ts(&record.end_time),
                record.duration_ms as i64,
                record.success,
                record.records_processed as i64,
                record.records_failed as i64,
                errors,
                record.api_calls_used as i64,
                record.attempt,
            ],
        )?;
        Ok(())
    }
}

fn record_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let errors_json: String = row.get(8)?;
    let errors: Vec<String> = serde_json::from_str(&errors_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ExecutionRecord {
        id: row.get(0)?,
        job_id: row.get(1)?,
        start_time: parse_ts(&row.get::<_, String>(2)?)?,
        end_time: parse_ts(&row.get::<_, String>(3)?)?,
        duration_ms: row.get::<_, i64>(4)? as u64,
        success: row.get(5)?,
        records_processed: row.get::<_, i64>(6)? as u64,
        records_failed: row.get::<_, i64>(7)? as u64,
        errors,
        api_calls_used: row.get::<_, i64>(9)? as u64,
        attempt: row.get(10)?,
    })
}
