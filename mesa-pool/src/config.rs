//! Database and pool configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PoolError, PoolResult};

/// SQLite database configuration.
///
/// Defaults favor the concurrent-batch case: WAL journaling so readers on one
/// connection do not block writers on another, and a busy timeout long enough
/// to ride out write-lock contention between partitions.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Where the database lives.
    pub path: DatabasePath,
    /// Enforce foreign key constraints.
    pub foreign_keys: bool,
    /// Use WAL journaling (file databases only).
    pub wal_mode: bool,
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: Option<u32>,
}

/// Where a database lives.
#[derive(Debug, Clone, Default)]
pub enum DatabasePath {
    /// Private in-memory database, one per connection.
    #[default]
    Memory,
    /// Database file on disk, shared by every connection in the pool.
    File(PathBuf),
}

impl DatabasePath {
    /// Display form of the path. Databases are opened from the real
    /// [`Path`], so a non-UTF-8 file path is never misread as `:memory:`.
    pub fn as_str(&self) -> &str {
        match self {
            DatabasePath::Memory => ":memory:",
            DatabasePath::File(path) => path.to_str().unwrap_or("<non-utf8 path>"),
        }
    }

    /// Whether this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, DatabasePath::Memory)
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::Memory,
            foreign_keys: true,
            wal_mode: true,
            busy_timeout_ms: Some(5000),
        }
    }
}

impl SqliteConfig {
    /// Configuration for an in-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// Configuration for a database file at `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: DatabasePath::File(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Parse a SQLite URL.
    ///
    /// Accepted forms: `sqlite::memory:`, `sqlite://path/to/db`, a bare file
    /// path, each optionally followed by
    /// `?foreign_keys=…&wal_mode=…&busy_timeout=…`.
    pub fn from_url(url: impl AsRef<str>) -> PoolResult<Self> {
        let url = url.as_ref();
        let (target, query) = match url.split_once('?') {
            Some((target, query)) => (target, query),
            None => (url, ""),
        };

        let target = target
            .strip_prefix("sqlite://")
            .or_else(|| target.strip_prefix("sqlite:"))
            .unwrap_or(target);

        let mut config = if target == ":memory:" {
            Self::memory()
        } else if target.is_empty() {
            return Err(PoolError::config("database path is required"));
        } else {
            Self::file(target)
        };

        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            match key {
                "foreign_keys" => config.foreign_keys = matches!(value, "true" | "1"),
                "wal_mode" => config.wal_mode = matches!(value, "true" | "1"),
                "busy_timeout" => {
                    if let Ok(ms) = value.parse() {
                        config.busy_timeout_ms = Some(ms);
                    }
                }
                _ => {}
            }
        }

        Ok(config)
    }

    /// Display form of the database path.
    pub fn path_str(&self) -> &str {
        self.path.as_str()
    }

    /// The pragma script run once against every freshly opened connection.
    pub fn init_sql(&self) -> String {
        let mut pragmas = Vec::new();
        if self.foreign_keys {
            pragmas.push("PRAGMA foreign_keys = ON;".to_string());
        }
        // journal_mode is a property of the database file; skip it for
        // in-memory databases.
        if self.wal_mode && !self.path.is_memory() {
            pragmas.push("PRAGMA journal_mode = WAL;".to_string());
        }
        if let Some(ms) = self.busy_timeout_ms {
            pragmas.push(format!("PRAGMA busy_timeout = {ms};"));
        }
        pragmas.join("\n")
    }

    /// Enable or disable foreign key enforcement.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Enable or disable WAL journaling.
    pub fn wal_mode(mut self, enabled: bool) -> Self {
        self.wal_mode = enabled;
        self
    }

    /// Set the busy timeout in milliseconds.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = Some(ms);
        self
    }
}

/// Sizing and recycling settings for [`SqlitePool`](crate::pool::SqlitePool).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections checked out at once. Checkout blocks
    /// when the limit is reached, so this is also the concurrency bound for
    /// worker threads.
    pub max_connections: usize,
    /// Connections opened ahead of time for file databases.
    pub min_connections: usize,
    /// How long a checkout waits for a free slot before failing.
    pub connection_timeout: Option<Duration>,
    /// Idle time after which a pooled connection is closed.
    pub idle_timeout: Option<Duration>,
    /// Total age after which a pooled connection is closed.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5, // SQLite benefits from fewer connections
            min_connections: 1,
            connection_timeout: Some(Duration::from_secs(30)),
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_memory_config() {
        let config = SqliteConfig::memory();
        assert!(config.path.is_memory());
        assert_eq!(config.path_str(), ":memory:");
    }

    #[test]
    fn test_file_config() {
        let config = SqliteConfig::file("batch.db");
        assert!(!config.path.is_memory());
        assert_eq!(config.path_str(), "batch.db");
    }

    #[test]
    fn test_from_url_memory_forms() {
        for url in ["sqlite::memory:", ":memory:", "sqlite::memory:?wal_mode=1"] {
            let config = SqliteConfig::from_url(url).unwrap();
            assert!(config.path.is_memory(), "{url} should parse as memory");
        }
    }

    #[test]
    fn test_from_url_file_forms() {
        let config = SqliteConfig::from_url("sqlite://./batch.db").unwrap();
        assert_eq!(config.path_str(), "./batch.db");

        let config = SqliteConfig::from_url("data/batch.db").unwrap();
        assert_eq!(config.path_str(), "data/batch.db");
    }

    #[test]
    fn test_from_url_rejects_empty_path() {
        assert!(SqliteConfig::from_url("sqlite://").is_err());
    }

    #[test]
    fn test_from_url_query_params() {
        let config =
            SqliteConfig::from_url("sqlite://./b.db?foreign_keys=false&busy_timeout=10000")
                .unwrap();
        assert!(!config.foreign_keys);
        assert_eq!(config.busy_timeout_ms, Some(10000));
        assert!(config.wal_mode); // untouched params keep their default
    }

    #[test]
    fn test_init_sql_file() {
        let sql = SqliteConfig::file("batch.db").init_sql();
        assert!(sql.contains("foreign_keys = ON"));
        assert!(sql.contains("journal_mode = WAL"));
        assert!(sql.contains("busy_timeout = 5000"));
    }

    #[test]
    fn test_init_sql_memory_skips_wal() {
        assert!(!SqliteConfig::memory().init_sql().contains("journal_mode"));
    }

    #[test]
    fn test_fluent_setters() {
        let config = SqliteConfig::memory()
            .foreign_keys(false)
            .wal_mode(false)
            .busy_timeout(3000);
        assert!(!config.foreign_keys);
        assert!(!config.wal_mode);
        assert_eq!(config.busy_timeout_ms, Some(3000));
    }

    #[test]
    fn test_pool_config_default_is_bounded() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.min_connections, 1);
        assert!(config.connection_timeout.is_some());
    }
}
