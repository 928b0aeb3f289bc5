use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::error::Result;

/// Column filter identifying one durable record, e.g.
/// `[("tenant_id", "t1"), ("user_id", "u9")]`.
///
/// Column names are static identifiers chosen by this crate, never user
/// input, so they are safe to splice into SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordKey {
    columns: Vec<(&'static str, String)>,
}

impl RecordKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &'static str, value: impl Into<String>) -> Self {
        self.columns.push((column, value.into()));
        self
    }

    pub fn columns(&self) -> &[(&'static str, String)] {
        &self.columns
    }

    fn where_clause(&self) -> String {
        self.columns
            .iter()
            .enumerate()
            .map(|(i, (col, _))| format!("{col} = ?{}", i + 1))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    fn values(&self) -> Vec<&str> {
        self.columns.iter().map(|(_, v)| v.as_str()).collect()
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .columns
            .iter()
            .map(|(c, v)| format!("{c}={v}"))
            .collect();
        write!(f, "{}", parts.join(","))
    }
}

/// The system of record: tables of JSON columns keyed by tenant or
/// (tenant, user).
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Return the JSON text stored in `field` for the newest row matching
    /// `key`, or `None` when no row exists or the column is NULL.
    async fn select_latest(
        &self,
        table: &'static str,
        field: &'static str,
        key: &RecordKey,
    ) -> Result<Option<String>>;

    /// Insert the row or overwrite `field` on the existing one.
    async fn upsert(
        &self,
        table: &'static str,
        field: &'static str,
        key: &RecordKey,
        json: &str,
    ) -> Result<()>;

    /// Delete every row matching `key`. Returns the number of rows removed.
    async fn delete(&self, table: &'static str, key: &RecordKey) -> Result<usize>;
}

/// SQLite-backed durable store.
///
/// Wraps a single connection in a `Mutex`; the guard is never held across
/// an await point.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Wrap an open connection, creating the tables if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        crate::db::init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        Self::new(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn select_latest(
        &self,
        table: &'static str,
        field: &'static str,
        key: &RecordKey,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT {field} FROM {table} WHERE {} ORDER BY id DESC LIMIT 1",
            key.where_clause()
        );
        let db = self.db.lock().unwrap();
        let value: Option<Option<String>> = db
            .query_row(
                &sql,
                rusqlite::params_from_iter(key.values()),
                |row| row.get(0),
            )
            .optional()?;
        Ok(value.flatten())
    }

    #[instrument(skip(self, json), fields(key = %key))]
    async fn upsert(
        &self,
        table: &'static str,
        field: &'static str,
        key: &RecordKey,
        json: &str,
    ) -> Result<()> {
        let cols: Vec<&str> = key.columns().iter().map(|(c, _)| *c).collect();
        let n = cols.len();
        let placeholders: Vec<String> = (1..=n).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({cols}, {field}, created_at, updated_at)
             VALUES ({ph}, ?{v}, ?{t}, ?{t})
             ON CONFLICT({cols}) DO UPDATE SET
                 {field} = excluded.{field},
                 updated_at = excluded.updated_at",
            cols = cols.join(", "),
            ph = placeholders.join(", "),
            v = n + 1,
            t = n + 2,
        );

        let now = chrono::Utc::now().to_rfc3339();
        let mut params: Vec<&str> = key.values();
        params.push(json);
        params.push(&now);

        let db = self.db.lock().unwrap();
        db.execute(&sql, rusqlite::params_from_iter(params))?;
        debug!(table, field, "durable record written");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn delete(&self, table: &'static str, key: &RecordKey) -> Result<usize> {
        let sql = format!("DELETE FROM {table} WHERE {}", key.where_clause());
        let db = self.db.lock().unwrap();
        let rows = db.execute(&sql, rusqlite::params_from_iter(key.values()))?;
        Ok(rows)
    }
}
