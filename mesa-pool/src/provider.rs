//! The connection-provider seam.

use crate::connection::SqliteConnection;
use crate::error::PoolResult;
use crate::pool::SqlitePool;

/// Something that can hand out connections.
///
/// This is the seam between batch components and the pooling layer: readers
/// and writers are written against `ConnectionProvider`, never against a
/// concrete pool, so a delegating proxy can be substituted without the
/// component noticing.
pub trait ConnectionProvider: Send + Sync {
    /// Obtain a connection.
    fn connection(&self) -> PoolResult<SqliteConnection>;
}

impl ConnectionProvider for SqlitePool {
    fn connection(&self) -> PoolResult<SqliteConnection> {
        self.get()
    }
}

impl<P: ConnectionProvider + ?Sized> ConnectionProvider for std::sync::Arc<P> {
    fn connection(&self) -> PoolResult<SqliteConnection> {
        (**self).connection()
    }
}
