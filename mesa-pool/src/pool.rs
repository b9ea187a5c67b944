//! Bounded connection pool for SQLite.
//!
//! File databases share one database file across connections, so idle
//! connections are worth reusing; in-memory databases are private per
//! connection and always open fresh. Checkout blocks while all
//! `max_connections` are in use, which makes the pool double as the
//! concurrency bound for worker threads.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use rusqlite::Connection;
use tracing::{debug, info, trace};

use crate::config::{DatabasePath, PoolConfig, SqliteConfig};
use crate::connection::SqliteConnection;
use crate::error::{PoolError, PoolResult};

/// State shared between the pool and checked-out connection handles.
pub(crate) struct PoolShared {
    inner: Mutex<PoolInner>,
    available: Condvar,
}

struct PoolInner {
    idle: VecDeque<IdleConnection>,
    in_use: usize,
    stats: PoolStats,
}

struct IdleConnection {
    conn: Connection,
    created_at: Instant,
    last_used: Instant,
}

impl PoolShared {
    /// Return a connection to the idle queue and wake one waiter.
    pub(crate) fn release(&self, conn: Connection, created_at: Instant) {
        let mut inner = self.inner.lock();
        inner.in_use = inner.in_use.saturating_sub(1);
        inner.stats.in_use = inner.in_use;
        inner.idle.push_back(IdleConnection {
            conn,
            created_at,
            last_used: Instant::now(),
        });
        drop(inner);
        self.available.notify_one();
    }

    /// Free a slot without keeping the connection (in-memory, or open failure).
    pub(crate) fn forget(&self) {
        let mut inner = self.inner.lock();
        inner.in_use = inner.in_use.saturating_sub(1);
        inner.stats.in_use = inner.in_use;
        drop(inner);
        self.available.notify_one();
    }
}

/// Counters describing pool activity.
#[derive(Debug, Default, Clone)]
pub struct PoolStats {
    /// Checkouts served from the idle queue.
    pub reuses: u64,
    /// Connections opened fresh.
    pub opens: u64,
    /// Idle connections discarded as expired.
    pub expirations: u64,
    /// Connections checked out right now.
    pub in_use: usize,
}

/// A bounded connection pool for SQLite.
///
/// # Example
///
/// ```rust,ignore
/// use mesa_pool::{SqlitePool, SqliteConfig};
///
/// let pool = SqlitePool::new(SqliteConfig::file("data.db"))?;
/// let conn = pool.get()?;
/// // Connection returns to the pool when the last handle clone drops.
/// ```
#[derive(Clone)]
pub struct SqlitePool {
    config: Arc<SqliteConfig>,
    pool_config: Arc<PoolConfig>,
    shared: Arc<PoolShared>,
}

impl SqlitePool {
    /// Create a new connection pool from configuration.
    pub fn new(config: SqliteConfig) -> PoolResult<Self> {
        Self::with_pool_config(config, PoolConfig::default())
    }

    /// Create a new connection pool with custom pool configuration.
    pub fn with_pool_config(config: SqliteConfig, pool_config: PoolConfig) -> PoolResult<Self> {
        info!(
            path = %config.path_str(),
            max_connections = pool_config.max_connections,
            "Connection pool created"
        );

        // Fail construction early if the database cannot be opened at all.
        drop(Self::open_connection(&config)?);

        let pool = Self {
            config: Arc::new(config),
            pool_config: Arc::new(pool_config),
            shared: Arc::new(PoolShared {
                inner: Mutex::new(PoolInner {
                    idle: VecDeque::new(),
                    in_use: 0,
                    stats: PoolStats::default(),
                }),
                available: Condvar::new(),
            }),
        };

        // Pre-warm file pools up to min_connections.
        if !pool.config.path.is_memory() && pool.pool_config.min_connections > 0 {
            debug!(count = pool.pool_config.min_connections, "Pre-warming pool");
            for _ in 0..pool.pool_config.min_connections {
                if let Ok(conn) = Self::open_connection(&pool.config) {
                    let now = Instant::now();
                    pool.shared.inner.lock().idle.push_back(IdleConnection {
                        conn,
                        created_at: now,
                        last_used: now,
                    });
                }
            }
        }

        Ok(pool)
    }

    /// Open a connection and run the configuration's pragma script on it.
    ///
    /// File paths are passed to SQLite as-is, without a lossy string
    /// conversion, so a non-UTF-8 path opens the file it names or fails.
    fn open_connection(config: &SqliteConfig) -> PoolResult<Connection> {
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory()?,
            DatabasePath::File(path) => Connection::open(path)?,
        };
        conn.execute_batch(&config.init_sql())?;
        Ok(conn)
    }

    /// Get a connection from the pool, blocking while all slots are in use.
    ///
    /// For file-based databases, an idle connection is reused before a new
    /// one is opened. For in-memory databases, a new connection is always
    /// opened (each one has its own database).
    pub fn get(&self) -> PoolResult<SqliteConnection> {
        trace!("Acquiring connection from pool");

        let deadline = self
            .pool_config
            .connection_timeout
            .map(|timeout| Instant::now() + timeout);

        let mut inner = self.shared.inner.lock();
        loop {
            // Try to reuse an idle connection, discarding expired ones.
            while let Some(pooled) = inner.idle.pop_front() {
                let expired = self
                    .pool_config
                    .max_lifetime
                    .is_some_and(|lifetime| pooled.created_at.elapsed() > lifetime);
                let idle_expired = self
                    .pool_config
                    .idle_timeout
                    .is_some_and(|timeout| pooled.last_used.elapsed() > timeout);

                if expired || idle_expired {
                    inner.stats.expirations += 1;
                    continue; // connection is dropped
                }

                inner.in_use += 1;
                inner.stats.reuses += 1;
                inner.stats.in_use = inner.in_use;
                return Ok(SqliteConnection::with_pool(
                    pooled.conn,
                    Some(self.shared.clone()),
                    true,
                    pooled.created_at,
                ));
            }

            // Room for a new connection?
            if inner.in_use < self.pool_config.max_connections {
                inner.in_use += 1;
                inner.stats.opens += 1;
                inner.stats.in_use = inner.in_use;
                drop(inner);

                debug!("No idle connections, opening new connection");
                return match Self::open_connection(&self.config) {
                    Ok(conn) => Ok(SqliteConnection::with_pool(
                        conn,
                        Some(self.shared.clone()),
                        !self.config.path.is_memory(),
                        Instant::now(),
                    )),
                    Err(err) => {
                        self.shared.forget();
                        Err(err)
                    }
                };
            }

            // All slots busy; wait for a release.
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .available
                        .wait_until(&mut inner, deadline)
                        .timed_out()
                    {
                        return Err(PoolError::timeout(format!(
                            "no connection available within {:?}",
                            self.pool_config.connection_timeout.unwrap_or_default()
                        )));
                    }
                }
                None => self.shared.available.wait(&mut inner),
            }
        }
    }

    /// The database configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// The pool sizing settings.
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    /// A snapshot of the activity counters.
    pub fn stats(&self) -> PoolStats {
        self.shared.inner.lock().stats.clone()
    }

    /// Zero the activity counters, keeping the in-use gauge.
    pub fn reset_stats(&self) {
        let mut inner = self.shared.inner.lock();
        let in_use = inner.in_use;
        inner.stats = PoolStats {
            in_use,
            ..PoolStats::default()
        };
    }

    /// Probe the database by opening a throwaway connection.
    pub fn is_healthy(&self) -> bool {
        Self::open_connection(&self.config)
            .and_then(|conn| Ok(conn.query_row("SELECT 1", [], |_| Ok(()))?))
            .is_ok()
    }

    /// Number of checkout slots currently free.
    pub fn available_slots(&self) -> usize {
        let inner = self.shared.inner.lock();
        self.pool_config.max_connections.saturating_sub(inner.in_use)
    }

    /// Number of connections sitting idle in the pool.
    pub fn idle_count(&self) -> usize {
        self.shared.inner.lock().idle.len()
    }

    /// Start building a pool.
    pub fn builder() -> SqlitePoolBuilder {
        SqlitePoolBuilder::new()
    }
}

impl fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlitePool")
            .field("config", &self.config)
            .field("pool_config", &self.pool_config)
            .finish()
    }
}

/// Builder for [`SqlitePool`].
///
/// The database may be given as a parsed config or as a URL; building with
/// neither is a configuration error.
#[derive(Debug, Default)]
pub struct SqlitePoolBuilder {
    config: Option<SqliteConfig>,
    url: Option<String>,
    pool_config: PoolConfig,
}

impl SqlitePoolBuilder {
    /// Create a builder with default pool sizing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Target database as a URL (see [`SqliteConfig::from_url`]).
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Target database as a parsed configuration.
    pub fn config(mut self, config: SqliteConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Cap on concurrently checked-out connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.pool_config.max_connections = n;
        self
    }

    /// Connections to pre-warm for file databases.
    pub fn min_connections(mut self, n: usize) -> Self {
        self.pool_config.min_connections = n;
        self
    }

    /// How long a checkout may wait for a free slot.
    pub fn connection_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.pool_config.connection_timeout = Some(timeout);
        self
    }

    /// Idle time after which pooled connections are closed.
    pub fn idle_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.pool_config.idle_timeout = Some(timeout);
        self
    }

    /// Build the pool.
    pub fn build(self) -> PoolResult<SqlitePool> {
        let config = match (self.config, self.url) {
            (Some(config), _) => config,
            (None, Some(url)) => SqliteConfig::from_url(url)?,
            (None, None) => {
                return Err(PoolError::config("no database URL or config provided"));
            }
        };

        SqlitePool::with_pool_config(config, self.pool_config)
    }
}
