//! Thread-affine SQLite connection pooling for partitioned batch steps.
//!
//! This crate provides a bounded SQLite connection pool together with a
//! thread-affinity layer that prevents reader/writer deadlocks in
//! concurrently partitioned batch jobs: every worker thread is handed its
//! own [`SharedConnectionProxy`] by the [`ThreadBoundProviderFactory`], and
//! the reader and writer of a step share one pinned connection through it.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mesa_pool::{SqliteConfig, SqlitePool, ThreadBoundProviderFactory};
//!
//! let pool = Arc::new(SqlitePool::new(SqliteConfig::file("batch.db"))?);
//! let factory = ThreadBoundProviderFactory::new(pool);
//!
//! // On a worker thread; call `get()` on every acquisition, never cache it.
//! let provider = factory.get();
//! let conn = provider.begin_shared()?;
//! // ... reader and writer both work through `provider` ...
//! provider.end_shared();
//! ```

pub mod affinity;
pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod provider;
pub mod row;

pub use affinity::{
    SharedConnectionProxy, ThreadBoundProviderFactory, ThreadBoundProviderFactoryBuilder,
};
pub use config::{DatabasePath, PoolConfig, SqliteConfig};
pub use connection::SqliteConnection;
pub use error::{PoolError, PoolResult};
pub use pool::{PoolStats, SqlitePool, SqlitePoolBuilder};
pub use provider::ConnectionProvider;
