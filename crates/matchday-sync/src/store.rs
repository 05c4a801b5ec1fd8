use std::sync::{Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::StoreError;

/// One table row as column → JSON value.
pub type Row = Map<String, Value>;

/// Relational sink for synced entities.
///
/// `upsert` is insert-or-update keyed by `conflict_keys`; every row also
/// gets a fresh `synced_at`.
pub trait RelationalStore: Send + Sync {
    fn upsert(&self, table: &str, row: &Row, conflict_keys: &[&str]) -> Result<(), StoreError>;
    fn count(&self, table: &str, filter: &Row) -> Result<u64, StoreError>;
    fn select_one(&self, table: &str, filter: &Row) -> Result<Option<Row>, StoreError>;
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS countries (
        name        TEXT NOT NULL PRIMARY KEY,
        code        TEXT,
        flag        TEXT,
        synced_at   TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS leagues (
        id              INTEGER NOT NULL PRIMARY KEY,
        name            TEXT NOT NULL,
        type            TEXT,
        logo            TEXT,
        country_name    TEXT,
        current_season  INTEGER,
        synced_at       TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS venues (
        id          INTEGER NOT NULL PRIMARY KEY,
        name        TEXT,
        address     TEXT,
        city        TEXT,
        country     TEXT,
        capacity    INTEGER,
        surface     TEXT,
        image       TEXT,
        synced_at   TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS teams (
        id          INTEGER NOT NULL PRIMARY KEY,
        name        TEXT NOT NULL,
        code        TEXT,
        country     TEXT,
        founded     INTEGER,
        national    INTEGER,
        logo        TEXT,
        venue_id    INTEGER,
        synced_at   TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS coaches (
        id           INTEGER NOT NULL PRIMARY KEY,
        name         TEXT,
        firstname    TEXT,
        lastname     TEXT,
        age          INTEGER,
        nationality  TEXT,
        photo        TEXT,
        team_id      INTEGER,
        synced_at    TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS fixtures (
        id            INTEGER NOT NULL PRIMARY KEY,
        referee       TEXT,
        date          TEXT,
        timestamp     INTEGER,
        venue_id      INTEGER,
        status_short  TEXT,
        status_long   TEXT,
        elapsed       INTEGER,
        league_id     INTEGER,
        season        INTEGER,
        round         TEXT,
        home_team_id  INTEGER,
        away_team_id  INTEGER,
        home_goals    INTEGER,
        away_goals    INTEGER,
        synced_at     TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_fixtures_league ON fixtures (league_id, season);

    CREATE TABLE IF NOT EXISTS standings (
        league_id      INTEGER NOT NULL,
        season         INTEGER NOT NULL,
        team_id        INTEGER NOT NULL,
        rank           INTEGER,
        points         INTEGER,
        goals_diff     INTEGER,
        group_name     TEXT,
        form           TEXT,
        played         INTEGER,
        win            INTEGER,
        draw           INTEGER,
        lose           INTEGER,
        goals_for      INTEGER,
        goals_against  INTEGER,
        synced_at      TEXT NOT NULL,
        PRIMARY KEY (league_id, season, team_id)
    );

    CREATE TABLE IF NOT EXISTS players (
        id           INTEGER NOT NULL,
        season       INTEGER NOT NULL,
        name         TEXT,
        firstname    TEXT,
        lastname     TEXT,
        age          INTEGER,
        nationality  TEXT,
        photo        TEXT,
        team_id      INTEGER,
        league_id    INTEGER,
        position     TEXT,
        appearances  INTEGER,
        goals        INTEGER,
        assists      INTEGER,
        rating       TEXT,
        synced_at    TEXT NOT NULL,
        PRIMARY KEY (id, season)
    );

    CREATE TABLE IF NOT EXISTS injuries (
        player_id   INTEGER NOT NULL,
        fixture_id  INTEGER NOT NULL,
        team_id     INTEGER,
        league_id   INTEGER,
        season      INTEGER,
        type        TEXT,
        reason      TEXT,
        date        TEXT,
        synced_at   TEXT NOT NULL,
        PRIMARY KEY (player_id, fixture_id)
    );

    CREATE TABLE IF NOT EXISTS transfers (
        player_id      INTEGER NOT NULL,
        transfer_date  TEXT NOT NULL,
        team_in_id     INTEGER NOT NULL,
        team_out_id    INTEGER,
        type           TEXT,
        synced_at      TEXT NOT NULL,
        PRIMARY KEY (player_id, transfer_date, team_in_id)
    );

    CREATE TABLE IF NOT EXISTS odds (
        fixture_id      INTEGER NOT NULL,
        bookmaker_id    INTEGER NOT NULL,
        bet_id          INTEGER NOT NULL,
        bookmaker_name  TEXT,
        bet_name        TEXT,
        odd_values      TEXT,
        updated         TEXT,
        synced_at       TEXT NOT NULL,
        PRIMARY KEY (fixture_id, bookmaker_id, bet_id)
    );
";

/// Tables the store will write to. Anything else is rejected.
pub const TABLES: &[&str] = &[
    "countries",
    "leagues",
    "venues",
    "teams",
    "coaches",
    "fixtures",
    "standings",
    "players",
    "injuries",
    "transfers",
    "odds",
];

/// [`RelationalStore`] over SQLite with the entity schema.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::new(Connection::open_in_memory()?)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn check_table(table: &str) -> Result<(), StoreError> {
    if TABLES.contains(&table) {
        Ok(())
    } else {
        Err(StoreError::UnknownTable(table.to_string()))
    }
}

fn check_column(column: &str) -> Result<(), StoreError> {
    let mut chars = column.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_')
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidColumn(column.to_string()))
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        nested => SqlValue::Text(nested.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(_) => Value::Null,
    }
}

/// `WHERE` clause and parameters for an equality filter.
fn where_clause(filter: &Row) -> Result<(String, Vec<SqlValue>), StoreError> {
    if filter.is_empty() {
        return Ok((String::new(), Vec::new()));
    }
    let mut terms = Vec::with_capacity(filter.len());
    let mut params = Vec::with_capacity(filter.len());
    for (column, value) in filter {
        check_column(column)?;
        terms.push(format!("\"{column}\" = ?{}", params.len() + 1));
        params.push(to_sql(value));
    }
    Ok((format!(" WHERE {}", terms.join(" AND ")), params))
}

impl RelationalStore for SqliteStore {
    fn upsert(&self, table: &str, row: &Row, conflict_keys: &[&str]) -> Result<(), StoreError> {
        check_table(table)?;
        for key in conflict_keys {
            if row.get(*key).map_or(true, Value::is_null) {
                return Err(StoreError::MissingKey((*key).to_string()));
            }
        }

        let mut columns = Vec::with_capacity(row.len() + 1);
        let mut params = Vec::with_capacity(row.len() + 1);
        for (column, value) in row {
            if column == "synced_at" {
                continue;
            }
            check_column(column)?;
            columns.push(format!("\"{column}\""));
            params.push(to_sql(value));
        }
        columns.push("\"synced_at\"".to_string());
        params.push(SqlValue::Text(
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        ));

        let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("?{i}")).collect();
        let updates: Vec<String> = row
            .keys()
            .filter(|c| !conflict_keys.contains(&c.as_str()) && c.as_str() != "synced_at")
            .map(|c| format!("\"{c}\" = excluded.\"{c}\""))
            .chain(std::iter::once("\"synced_at\" = excluded.\"synced_at\"".to_string()))
            .collect();
        let keys: Vec<String> = conflict_keys.iter().map(|k| format!("\"{k}\"")).collect();

        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) ON CONFLICT ({}) DO UPDATE SET {}",
            columns.join(", "),
            placeholders.join(", "),
            keys.join(", "),
            updates.join(", "),
        );
        self.conn().execute(&sql, params_from_iter(params))?;
        Ok(())
    }

    fn count(&self, table: &str, filter: &Row) -> Result<u64, StoreError> {
        check_table(table)?;
        let (clause, params) = where_clause(filter)?;
        let n: i64 = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {table}{clause}"),
            params_from_iter(params),
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    fn select_one(&self, table: &str, filter: &Row) -> Result<Option<Row>, StoreError> {
        check_table(table)?;
        let (clause, params) = where_clause(filter)?;
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT * FROM {table}{clause} LIMIT 1"))?;
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let found = stmt
            .query_row(params_from_iter(params), |r| {
                let mut out = Row::new();
                for (i, name) in names.iter().enumerate() {
                    out.insert(name.clone(), from_sql(r.get_ref(i)?));
                }
                Ok(out)
            })
            .optional()?;
        debug!(table, found = found.is_some(), "select_one");
        Ok(found)
    }
}
