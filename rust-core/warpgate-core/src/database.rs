//! # Database Module
//!
//! Engine and connection interfaces consumed by the transaction manager, and
//! the SQLite implementation backing them.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Only handles driver access; scoping lives in `transaction`
//! - **O**: New backends implement `Engine` and `Connection`
//! - **D**: The transaction manager depends on the traits, not on sqlx
//!
//! Connections follow DB-API semantics: a transaction opens implicitly before
//! the first data-modifying statement after a commit or rollback, `commit` and
//! `rollback` end it (and do nothing when none is open), and `close` discards
//! pending work before returning the connection to its pool. `begin` opens one
//! explicitly so that every later statement, whatever its text, belongs to it.
//!
//! A SQLite session dropped with a transaction still open never goes back to
//! the pool: the connection is detached and closed, which rolls the
//! transaction back.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::str::FromStr;
use tracing::{debug, info, warn};

/// Database value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DbValue {
    /// Null value
    Null,
    /// Integer value
    Int(i64),
    /// Float value
    Float(f64),
    /// Text value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Binary data
    Bytes(Vec<u8>),
}

impl DbValue {
    /// Whether the value is SQL NULL
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view; booleans count as 0/1
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    /// Float view; integers are widened
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Text view
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for DbValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for DbValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl<T: Into<Self>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Result row: columns in select order with by-name lookup
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, DbValue)>,
}

impl Row {
    /// Build a row from ordered `(column, value)` pairs
    #[must_use]
    pub fn new(columns: Vec<(String, DbValue)>) -> Self {
        Self { columns }
    }

    /// Number of columns
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the row has no columns
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Value of a column by name
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Value of a column by position
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&DbValue> {
        self.columns.get(index).map(|(_, value)| value)
    }

    /// Column names in select order
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate `(column, value)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// JSON object keyed by column name
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.columns
                .iter()
                .map(|(name, value)| {
                    (
                        name.clone(),
                        serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
                    )
                })
                .collect(),
        )
    }
}

/// Source of connections, safe to call from concurrent tasks
#[async_trait]
pub trait Engine: Send + Sync {
    /// Open (or check out) a connection
    async fn connect(&self) -> Result<Box<dyn Connection>>;

    /// Name for logging
    fn name(&self) -> &str {
        "engine"
    }
}

/// One database connection, used by a single task at a time
///
/// SQL uses `?` placeholders bound positionally from `args`.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement, returning the number of affected rows
    async fn execute(&mut self, sql: &str, args: &[DbValue]) -> Result<u64>;

    /// Run a query, returning every row
    async fn fetch_all(&mut self, sql: &str, args: &[DbValue]) -> Result<Vec<Row>>;

    /// Open a transaction unless one is already open
    async fn begin(&mut self) -> Result<()>;

    /// Commit the open transaction, if any
    async fn commit(&mut self) -> Result<()>;

    /// Roll back the open transaction, if any
    async fn rollback(&mut self) -> Result<()>;

    /// Release the connection, discarding uncommitted work
    async fn close(&mut self) -> Result<()>;
}

/// SQLite engine over a sqlx pool
#[derive(Clone)]
pub struct SqliteEngine {
    pool: SqlitePool,
}

impl SqliteEngine {
    /// Connect to a SQLite database, creating the file if missing
    ///
    /// # Arguments
    ///
    /// * `url` - Database URL (e.g., "sqlite:app.db" or "sqlite::memory:")
    /// * `max_connections` - Maximum pool size (default: 10)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine = SqliteEngine::open("sqlite::memory:", Some(1)).await?;
    /// let engine = SqliteEngine::open("sqlite:app.db", None).await?;
    /// ```
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the URL is invalid or the pool cannot connect.
    pub async fn open(url: &str, max_connections: Option<u32>) -> Result<Self> {
        let pool_size = max_connections.unwrap_or(10);
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::database(format!("invalid SQLite url '{url}': {e}")))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect_with(options)
            .await
            .map_err(|e| Error::database(format!("SQLite connection failed: {e}")))?;

        info!(url, pool_size, "sqlite pool ready");
        Ok(Self { pool })
    }

    /// Wrap an existing pool
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Underlying pool
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn connect(&self) -> Result<Box<dyn Connection>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(SqliteSession {
            conn: Some(conn),
            in_transaction: false,
        }))
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}

/// Pooled SQLite connection with implicit transactions
struct SqliteSession {
    conn: Option<PoolConnection<Sqlite>>,
    in_transaction: bool,
}

impl SqliteSession {
    fn conn(&mut self) -> Result<&mut PoolConnection<Sqlite>> {
        self.conn
            .as_mut()
            .ok_or_else(|| Error::database("connection is closed"))
    }

    async fn run(&mut self, statement: &str) -> Result<()> {
        sqlx::query(statement).execute(&mut **self.conn()?).await?;
        Ok(())
    }

    async fn start(&mut self) -> Result<()> {
        // Flagged before the await so a cancelled BEGIN still counts as open.
        self.in_transaction = true;
        let result = self.run("BEGIN").await;
        if result.is_err() {
            self.in_transaction = false;
        }
        result
    }

    async fn begin_if_needed(&mut self, sql: &str) -> Result<()> {
        if self.in_transaction || !is_modifying(sql) {
            return Ok(());
        }
        self.start().await
    }

    async fn finish(&mut self, statement: &str) -> Result<()> {
        if !self.in_transaction {
            return Ok(());
        }
        // A failed COMMIT or ROLLBACK leaves the transaction marked open.
        self.run(statement).await?;
        self.in_transaction = false;
        Ok(())
    }
}

#[async_trait]
impl Connection for SqliteSession {
    async fn execute(&mut self, sql: &str, args: &[DbValue]) -> Result<u64> {
        self.begin_if_needed(sql).await?;
        let result = bind(sql, args).execute(&mut **self.conn()?).await?;
        Ok(result.rows_affected())
    }

    async fn fetch_all(&mut self, sql: &str, args: &[DbValue]) -> Result<Vec<Row>> {
        self.begin_if_needed(sql).await?;
        let rows: Vec<SqliteRow> = bind(sql, args).fetch_all(&mut **self.conn()?).await?;
        rows.iter().map(sqlite_row).collect()
    }

    async fn begin(&mut self) -> Result<()> {
        if self.in_transaction {
            return Ok(());
        }
        self.start().await
    }

    async fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK").await
    }

    async fn close(&mut self) -> Result<()> {
        if self.conn.is_none() {
            return Ok(());
        }
        let result = self.rollback().await;
        if let Some(conn) = self.conn.take() {
            if self.in_transaction {
                warn!("rollback failed, discarding sqlite connection");
                drop(conn.detach());
            } else {
                debug!("sqlite connection returned to pool");
            }
        }
        self.in_transaction = false;
        result
    }
}

impl Drop for SqliteSession {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        if let Some(conn) = self.conn.take() {
            warn!("sqlite session dropped inside a transaction, discarding connection");
            drop(conn.detach());
        }
    }
}

/// Statements that open an implicit transaction
fn is_modifying(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default();
    ["INSERT", "UPDATE", "DELETE", "REPLACE"]
        .iter()
        .any(|k| keyword.eq_ignore_ascii_case(k))
}

fn bind<'q>(sql: &'q str, args: &'q [DbValue]) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    args.iter().fold(sqlx::query(sql), |query, arg| match arg {
        DbValue::Null => query.bind(None::<i64>),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::Text(v) => query.bind(v.as_str()),
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Bytes(v) => query.bind(v.as_slice()),
    })
}

/// Convert a SQLite row using each value's runtime storage class
fn sqlite_row(row: &SqliteRow) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.columns().len());

    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            DbValue::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(i).map(DbValue::Int)?,
                "REAL" => row.try_get::<f64, _>(i).map(DbValue::Float)?,
                "BLOB" => row.try_get::<Vec<u8>, _>(i).map(DbValue::Bytes)?,
                _ => row.try_get::<String, _>(i).map(DbValue::Text)?,
            }
        };
        columns.push((column.name().to_string(), value));
    }

    Ok(Row::new(columns))
}
