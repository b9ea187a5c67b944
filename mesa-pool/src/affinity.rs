//! Thread-bound connection providers.
//!
//! Partitioned batch steps run a reader and a writer back to back on one
//! worker thread, while other partitions run concurrently on other threads
//! against the same tables. If the reader and writer of one step end up on
//! *different* connections, a concurrent step holding row locks on a third
//! connection can deadlock them. The fix is connection affinity: every step
//! works through one [`SharedConnectionProxy`], and every worker thread gets
//! its own proxy from the [`ThreadBoundProviderFactory`].
//!
//! The factory keys its cache by thread identity, not by step identity. A
//! worker thread reused for a later step deterministically receives the same
//! proxy it got the first time; two threads never observe each other's entry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::connection::SqliteConnection;
use crate::error::{PoolError, PoolResult};
use crate::provider::ConnectionProvider;

/// Process-wide proxy sequence. Identities must stay unique and stable for
/// the process lifetime, so the counter is never reset.
static PROXY_SEQ: AtomicU64 = AtomicU64::new(1);

/// A delegating [`ConnectionProvider`] with a stable, inspectable identity
/// and an optional pinned ("shared") connection.
///
/// Outside shared mode every [`connection`](ConnectionProvider::connection)
/// call delegates straight to the wrapped provider. Between
/// [`begin_shared`](Self::begin_shared) and [`end_shared`](Self::end_shared)
/// the proxy pins one checked-out connection and hands out clones of it, so a
/// reader and a writer asking the same proxy observe the identical underlying
/// connection.
///
/// A proxy instance is used by one thread at a time (the factory below
/// guarantees this); the interior lock exists only to make the type `Sync`.
pub struct SharedConnectionProxy {
    provider: Arc<dyn ConnectionProvider>,
    /// Connection pinned for the duration of a step, if any.
    pinned: Mutex<Option<SqliteConnection>>,
    id: u64,
}

impl SharedConnectionProxy {
    /// Wrap the given provider in a new proxy with a fresh identity.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            provider,
            pinned: Mutex::new(None),
            id: PROXY_SEQ.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Numeric identity of this proxy, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Identity token for external comparison, e.g.
    /// `SharedConnectionProxy@2a`. Stable for the proxy's lifetime.
    pub fn identity(&self) -> String {
        self.to_string()
    }

    /// Check out a connection and pin it until [`end_shared`](Self::end_shared).
    ///
    /// Idempotent: if a connection is already pinned, a clone of it is
    /// returned.
    pub fn begin_shared(&self) -> PoolResult<SqliteConnection> {
        let mut pinned = self.pinned.lock();
        if let Some(conn) = pinned.as_ref() {
            return Ok(conn.clone());
        }
        let conn = self.provider.connection()?;
        debug!(proxy = %self, "Pinned shared connection");
        *pinned = Some(conn.clone());
        Ok(conn)
    }

    /// Unpin the shared connection. It returns to the pool once the last
    /// outstanding clone drops.
    pub fn end_shared(&self) {
        if self.pinned.lock().take().is_some() {
            debug!(proxy = %self, "Unpinned shared connection");
        }
    }

    /// Whether a shared connection is currently pinned.
    pub fn is_shared(&self) -> bool {
        self.pinned.lock().is_some()
    }
}

impl ConnectionProvider for SharedConnectionProxy {
    fn connection(&self) -> PoolResult<SqliteConnection> {
        if let Some(conn) = self.pinned.lock().as_ref() {
            return Ok(conn.clone());
        }
        self.provider.connection()
    }
}

impl fmt::Display for SharedConnectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedConnectionProxy@{:x}", self.id)
    }
}

impl fmt::Debug for SharedConnectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedConnectionProxy")
            .field("id", &self.id)
            .field("shared", &self.is_shared())
            .finish()
    }
}

/// Factory handing out a per-thread singleton [`SharedConnectionProxy`] over
/// one fixed underlying provider.
///
/// The first `get` from a thread creates that thread's proxy; every later
/// `get` from the same thread returns the identical instance. Distinct
/// threads always receive distinct proxies, so the number of proxies ever
/// created is bounded by the number of worker threads that call in.
///
/// The product is request-scoped by calling-thread identity: hosts must call
/// [`get`](Self::get) on every logical acquisition and never retain the
/// result across a thread-pool rebind. A proxy cached across a rebind would
/// silently be used on the wrong thread; the factory cannot detect that.
pub struct ThreadBoundProviderFactory {
    provider: Arc<dyn ConnectionProvider>,
    /// One entry per thread that ever called `get`; entries are never
    /// evicted. Contention is negligible: one insert per thread, ever.
    proxies: Mutex<HashMap<ThreadId, Arc<SharedConnectionProxy>>>,
}

impl ThreadBoundProviderFactory {
    /// Create a factory over the given provider.
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        info!("Thread-bound provider factory created");
        Self {
            provider,
            proxies: Mutex::new(HashMap::new()),
        }
    }

    /// Create a builder.
    pub fn builder() -> ThreadBoundProviderFactoryBuilder {
        ThreadBoundProviderFactoryBuilder::new()
    }

    /// Return the calling thread's proxy, creating it on first use.
    pub fn get(&self) -> Arc<SharedConnectionProxy> {
        let thread_id = thread::current().id();
        let mut proxies = self.proxies.lock();
        let proxy = proxies
            .entry(thread_id)
            .or_insert_with(|| {
                let proxy = Arc::new(SharedConnectionProxy::new(self.provider.clone()));
                debug!(thread = ?thread_id, proxy = %proxy, "Created proxy for thread");
                proxy
            })
            .clone();
        debug!(thread = ?thread_id, proxy = %proxy, "Returning thread-bound proxy");
        proxy
    }

    /// Number of proxies created so far (== number of distinct calling threads).
    pub fn proxy_count(&self) -> usize {
        self.proxies.lock().len()
    }
}

impl fmt::Debug for ThreadBoundProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadBoundProviderFactory")
            .field("proxy_count", &self.proxy_count())
            .finish()
    }
}

/// Builder for [`ThreadBoundProviderFactory`].
///
/// Building without a provider is a configuration error; the factory is
/// useless without the resource it wraps.
#[derive(Default)]
pub struct ThreadBoundProviderFactoryBuilder {
    provider: Option<Arc<dyn ConnectionProvider>>,
}

impl ThreadBoundProviderFactoryBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self { provider: None }
    }

    /// Set the underlying provider.
    pub fn provider(mut self, provider: Arc<dyn ConnectionProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Build the factory.
    pub fn build(self) -> PoolResult<ThreadBoundProviderFactory> {
        let provider = self
            .provider
            .ok_or_else(|| PoolError::config("no connection provider configured"))?;
        Ok(ThreadBoundProviderFactory::new(provider))
    }
}
