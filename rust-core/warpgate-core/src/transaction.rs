//! # Connection and Transaction Manager
//!
//! Task-scoped database connection with nested transactions.
//!
//! `with_connection` gives the current task one lazily opened connection;
//! nested calls reuse it and only the outermost call closes it.
//! `with_transaction` nests on top of that with a counter: the call taking the
//! counter from 0 to 1 begins the transaction, inner calls join it, and the
//! call bringing it back to 0 commits on success or rolls back when the body
//! failed (error or panic) anywhere inside. The transaction is opened on the
//! connection before the first statement run while the counter is above 0, so
//! every statement in the scope is covered whatever its SQL looks like. A failed commit is followed by a
//! rollback and the commit error is returned.
//!
//! Statement helpers run inside `with_connection`. `update` and `insert`
//! commit immediately when no transaction is open.
//!
//! ## Example
//!
//! ```ignore
//! transaction::init_engine(Arc::new(SqliteEngine::open("sqlite:app.db", None).await?))?;
//!
//! transaction::with_transaction(async {
//!     transaction::update("UPDATE users SET name = ? WHERE id = ?", &["bob".into(), 1.into()]).await?;
//!     transaction::insert("audit", &[("action", "rename".into())]).await?;
//!     Ok(())
//! })
//! .await?;
//! ```

use crate::database::{Connection, DbValue, Engine, Row};
use crate::error::{Error, Result};
use futures::FutureExt;
use std::future::Future;
use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Statements and transactions slower than this are logged at warn
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(100);

static ENGINE: OnceLock<Arc<dyn Engine>> = OnceLock::new();

tokio::task_local! {
    static SCOPED_ENGINE: Arc<dyn Engine>;
    static DB: Arc<DbContext>;
}

/// Install the process-wide engine
///
/// # Errors
///
/// Returns `Error::Database` if an engine is already installed.
pub fn init_engine(engine: Arc<dyn Engine>) -> Result<()> {
    let name = engine.name().to_string();
    ENGINE
        .set(engine)
        .map_err(|_| Error::database("database engine is already initialized"))?;
    info!(engine = %name, "database engine initialized");
    Ok(())
}

/// Run `fut` with `engine` taking precedence over the process-wide one
pub async fn with_engine<F: Future>(engine: Arc<dyn Engine>, fut: F) -> F::Output {
    SCOPED_ENGINE.scope(engine, fut).await
}

fn engine() -> Result<Arc<dyn Engine>> {
    SCOPED_ENGINE
        .try_with(Arc::clone)
        .ok()
        .or_else(|| ENGINE.get().cloned())
        .ok_or_else(|| Error::database("database engine is not initialized"))
}

struct DbState {
    connection: Option<Box<dyn Connection>>,
    transactions: usize,
    begun: bool,
}

impl DbState {
    async fn connection(&mut self, engine: &dyn Engine) -> Result<&mut Box<dyn Connection>> {
        if self.connection.is_none() {
            info!(engine = engine.name(), "open connection");
            self.connection = Some(engine.connect().await?);
        }
        self.connection
            .as_mut()
            .ok_or_else(|| Error::database("connection unavailable"))
    }

    /// Connection for the next statement, joined to the open transaction
    async fn statement_connection(
        &mut self,
        engine: &dyn Engine,
    ) -> Result<&mut Box<dyn Connection>> {
        if self.transactions > 0 && !self.begun {
            self.connection(engine).await?.begin().await?;
            self.begun = true;
            debug!("transaction opened on connection");
        }
        self.connection(engine).await
    }
}

/// Connection context of one task
struct DbContext {
    engine: Arc<dyn Engine>,
    state: Mutex<DbState>,
}

impl DbContext {
    fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            state: Mutex::new(DbState {
                connection: None,
                transactions: 0,
                begun: false,
            }),
        }
    }

    async fn fetch_all(&self, sql: &str, args: &[DbValue]) -> Result<Vec<Row>> {
        let mut state = self.state.lock().await;
        let conn = state.statement_connection(self.engine.as_ref()).await?;
        profiled(sql, conn.fetch_all(sql, args)).await
    }

    async fn execute(&self, sql: &str, args: &[DbValue]) -> Result<u64> {
        let mut state = self.state.lock().await;
        let auto_commit = state.transactions == 0;
        let conn = state.statement_connection(self.engine.as_ref()).await?;
        let affected = profiled(sql, conn.execute(sql, args)).await?;
        if auto_commit {
            debug!("auto commit");
            conn.commit().await?;
        }
        Ok(affected)
    }

    /// Increment the counter, returning the new depth
    async fn enter(&self) -> usize {
        let mut state = self.state.lock().await;
        state.transactions += 1;
        state.transactions
    }

    /// Decrement the counter, returning the remaining depth
    async fn leave(&self) -> usize {
        let mut state = self.state.lock().await;
        state.transactions = state.transactions.saturating_sub(1);
        state.transactions
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(conn) = state.connection.as_mut() {
            conn.commit().await?;
        }
        state.begun = false;
        Ok(())
    }

    async fn rollback(&self) {
        let mut state = self.state.lock().await;
        state.begun = false;
        if let Some(conn) = state.connection.as_mut() {
            warn!("rollback transaction");
            if let Err(e) = conn.rollback().await {
                warn!(error = %e, "rollback failed");
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.connection.take() {
            Some(mut conn) => {
                info!("close connection");
                conn.close().await
            }
            None => Ok(()),
        }
    }
}

/// Run `fut` with a connection context on the current task
///
/// Reuses the active context if there is one. Otherwise a new context is
/// installed; its connection is opened on the first statement and closed when
/// `fut` finishes, fails or panics. A close failure is reported only when
/// `fut` itself succeeded.
///
/// # Errors
///
/// Returns the error of `fut`, `Error::Database` when no engine is installed,
/// or the close error.
pub async fn with_connection<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if DB.try_with(|_| ()).is_ok() {
        return fut.await;
    }

    let ctx = Arc::new(DbContext::new(engine()?));
    let outcome = DB
        .scope(Arc::clone(&ctx), AssertUnwindSafe(fut).catch_unwind())
        .await;
    let closed = ctx.close().await;

    match outcome {
        Ok(Ok(value)) => closed.map(|()| value),
        Ok(Err(e)) => {
            if let Err(close_err) = closed {
                warn!(error = %close_err, "close failed after error");
            }
            Err(e)
        }
        Err(panic) => resume_unwind(panic),
    }
}

/// Run `fut` inside a (possibly nested) transaction
///
/// # Errors
///
/// Returns the error of `fut` after rolling back, or the commit error after
/// rolling back when the outermost commit fails.
pub async fn with_transaction<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_connection(transaction_body(fut)).await
}

async fn transaction_body<F, T>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let ctx = current_db()?;
    let depth = ctx.enter().await;
    if depth == 1 {
        info!("begin transaction");
    } else {
        debug!(depth, "join current transaction");
    }

    let start = Instant::now();
    let outcome = AssertUnwindSafe(fut).catch_unwind().await;
    if ctx.leave().await > 0 {
        return outcome.unwrap_or_else(|panic| resume_unwind(panic));
    }

    let result = match outcome {
        Ok(Ok(value)) => match ctx.commit().await {
            Ok(()) => {
                info!("commit ok");
                Ok(value)
            }
            Err(e) => {
                warn!(error = %e, "commit failed, try rollback");
                ctx.rollback().await;
                Err(e)
            }
        },
        Ok(Err(e)) => {
            ctx.rollback().await;
            Err(e)
        }
        Err(panic) => {
            ctx.rollback().await;
            resume_unwind(panic)
        }
    };

    let elapsed = start.elapsed();
    if elapsed > SLOW_THRESHOLD {
        warn!(duration_ms = %elapsed.as_millis(), "slow transaction");
    }
    result
}

fn current_db() -> Result<Arc<DbContext>> {
    DB.try_with(Arc::clone)
        .map_err(|_| Error::database("no connection context is active"))
}

/// Current transaction nesting depth; 0 outside any transaction
pub async fn depth() -> usize {
    match DB.try_with(Arc::clone) {
        Ok(ctx) => ctx.state.lock().await.transactions,
        Err(_) => 0,
    }
}

async fn profiled<T>(sql: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    let start = Instant::now();
    let result = fut.await;
    let elapsed = start.elapsed();
    if elapsed > SLOW_THRESHOLD {
        warn!(sql, duration_ms = %elapsed.as_millis(), "slow sql");
    } else {
        debug!(sql, duration_us = %elapsed.as_micros(), "sql");
    }
    result
}

/// Run a query and return every row
///
/// # Errors
///
/// Returns `Error::Database` on driver failure or missing engine.
pub async fn select(sql: &str, args: &[DbValue]) -> Result<Vec<Row>> {
    with_connection(async { current_db()?.fetch_all(sql, args).await }).await
}

/// Run a query and return its first row
///
/// # Errors
///
/// Returns `Error::Database` on driver failure or missing engine.
pub async fn select_one(sql: &str, args: &[DbValue]) -> Result<Option<Row>> {
    Ok(select(sql, args).await?.into_iter().next())
}

/// Run a query returning a single integer (e.g. `SELECT COUNT(*) ...`)
///
/// # Errors
///
/// - `Error::MultiColumns` unless the row has exactly one column
/// - `Error::Database` if no row comes back or the value is not an integer
pub async fn select_int(sql: &str, args: &[DbValue]) -> Result<i64> {
    let row = select_one(sql, args)
        .await?
        .ok_or_else(|| Error::database("expect one row, got none"))?;
    if row.len() != 1 {
        return Err(Error::MultiColumns { columns: row.len() });
    }
    row.value(0)
        .and_then(DbValue::as_i64)
        .ok_or_else(|| Error::database("expect an integer value"))
}

/// Run a data-modifying statement and return the affected row count
///
/// Commits immediately when no transaction is open.
///
/// # Errors
///
/// Returns `Error::Database` on driver failure or missing engine.
pub async fn update(sql: &str, args: &[DbValue]) -> Result<u64> {
    with_connection(async { current_db()?.execute(sql, args).await }).await
}

/// Insert one row from `(column, value)` pairs
///
/// # Errors
///
/// Returns `Error::Database` on driver failure, missing engine, or no columns.
pub async fn insert(table: &str, values: &[(&str, DbValue)]) -> Result<u64> {
    if values.is_empty() {
        return Err(Error::database(format!("insert into `{table}` without columns")));
    }
    let columns = values
        .iter()
        .map(|(column, _)| format!("`{column}`"))
        .collect::<Vec<_>>()
        .join(",");
    let placeholders = vec!["?"; values.len()].join(",");
    let sql = format!("insert into `{table}` ({columns}) values ({placeholders})");
    let args: Vec<DbValue> = values.iter().map(|(_, value)| value.clone()).collect();
    update(&sql, &args).await
}

/// 50-character unique id: 15-digit millisecond timestamp, 32 hex digits of a
/// random uuid, and `000`
#[must_use]
pub fn next_id() -> String {
    format!(
        "{:015}{}000",
        chrono::Utc::now().timestamp_millis(),
        Uuid::new_v4().simple()
    )
}
