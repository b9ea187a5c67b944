//! SQLite connection wrapper.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{PoolError, PoolResult};
use crate::pool::PoolShared;
use crate::row::value_at;

struct ConnectionInner {
    /// The underlying connection; taken out on final drop.
    conn: Mutex<Option<Connection>>,
    /// Pool this handle was checked out from, if any.
    pool: Option<Arc<PoolShared>>,
    /// Whether the connection goes back to the idle queue on drop.
    /// In-memory connections only free their slot (each one is its own database).
    recycle: bool,
    /// When the underlying connection was opened (for pool recycling).
    created_at: Instant,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            match (&self.pool, self.recycle) {
                (Some(pool), true) => {
                    trace!("Returning connection to pool");
                    pool.release(conn, self.created_at);
                }
                (Some(pool), false) => pool.forget(),
                (None, _) => {} // standalone handle, connection just closes
            }
        }
    }
}

/// A handle to a checked-out SQLite connection.
///
/// Handles are cheaply cloneable; all clones observe the same underlying
/// connection, which returns to its pool only when the last clone is dropped.
/// This is what allows a reader and a writer within one step to operate on
/// the identical connection.
///
/// A handle is intended for use by one thread at a time; the interior lock
/// only serializes the individual operations below.
#[derive(Clone)]
pub struct SqliteConnection {
    inner: Arc<ConnectionInner>,
}

impl SqliteConnection {
    /// Create a standalone (non-pooled) connection wrapper.
    pub fn new(conn: Connection) -> Self {
        Self::with_pool(conn, None, false, Instant::now())
    }

    pub(crate) fn with_pool(
        conn: Connection,
        pool: Option<Arc<PoolShared>>,
        recycle: bool,
        created_at: Instant,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                conn: Mutex::new(Some(conn)),
                pool,
                recycle,
                created_at,
            }),
        }
    }

    /// Whether two handles observe the same underlying connection.
    pub fn same_connection(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> PoolResult<T>) -> PoolResult<T> {
        let guard = self.inner.conn.lock();
        let conn = guard
            .as_ref()
            .ok_or_else(|| PoolError::connection("connection already closed"))?;
        f(conn)
    }

    /// Execute a query and return all rows as JSON objects keyed by column name.
    pub fn query(&self, sql: &str) -> PoolResult<Vec<Value>> {
        debug!(sql = %sql, "Executing query");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            collect_rows(&mut stmt, [])
        })
    }

    /// Execute a query with parameters and return all rows.
    pub fn query_params(
        &self,
        sql: &str,
        params: Vec<rusqlite::types::Value>,
    ) -> PoolResult<Vec<Value>> {
        debug!(sql = %sql, "Executing parameterized query");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            collect_rows(&mut stmt, rusqlite::params_from_iter(params))
        })
    }

    /// Execute a query and return a single row.
    pub fn query_one(&self, sql: &str) -> PoolResult<Value> {
        self.query_optional(sql)?
            .ok_or_else(|| PoolError::query("query returned no rows"))
    }

    /// Execute a query and return an optional row.
    pub fn query_optional(&self, sql: &str) -> PoolResult<Option<Value>> {
        debug!(sql = %sql, "Executing query_optional");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = collect_rows(&mut stmt, [])?;
            Ok(if rows.is_empty() {
                None
            } else {
                Some(rows.swap_remove(0))
            })
        })
    }

    /// Execute a statement and return the number of affected rows.
    pub fn execute(&self, sql: &str) -> PoolResult<usize> {
        debug!(sql = %sql, "Executing statement");
        self.with_conn(|conn| Ok(conn.execute(sql, [])?))
    }

    /// Execute a statement with parameters and return the number of affected rows.
    pub fn execute_params(
        &self,
        sql: &str,
        params: Vec<rusqlite::types::Value>,
    ) -> PoolResult<usize> {
        debug!(sql = %sql, "Executing parameterized statement");
        self.with_conn(|conn| Ok(conn.execute(sql, rusqlite::params_from_iter(params))?))
    }

    /// Execute a statement and return the last insert rowid.
    pub fn execute_insert(&self, sql: &str) -> PoolResult<i64> {
        debug!(sql = %sql, "Executing insert");
        self.with_conn(|conn| {
            conn.execute(sql, [])?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Execute multiple statements in a batch.
    pub fn execute_batch(&self, sql: &str) -> PoolResult<()> {
        debug!("Executing batch");
        self.with_conn(|conn| Ok(conn.execute_batch(sql)?))
    }

    /// Run a closure against the raw connection inside an immediate transaction.
    ///
    /// Commits on success, rolls back on error.
    pub fn transaction<T>(&self, f: impl FnOnce(&Connection) -> PoolResult<T>) -> PoolResult<T> {
        self.with_conn(|conn| {
            conn.execute_batch("BEGIN IMMEDIATE")?;
            match f(conn) {
                Ok(value) => {
                    conn.execute_batch("COMMIT")?;
                    Ok(value)
                }
                Err(err) => {
                    let _ = conn.execute_batch("ROLLBACK");
                    Err(err)
                }
            }
        })
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("pooled", &self.inner.pool.is_some())
            .field("open", &self.inner.conn.lock().is_some())
            .finish()
    }
}

fn collect_rows<P: rusqlite::Params>(
    stmt: &mut rusqlite::Statement<'_>,
    params: P,
) -> PoolResult<Vec<Value>> {
    let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
    let mut rows = stmt.query(params)?;
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = serde_json::Map::new();
        for (i, col) in columns.iter().enumerate() {
            map.insert(col.clone(), value_at(row, i));
        }
        results.push(Value::Object(map));
    }
    Ok(results)
}
