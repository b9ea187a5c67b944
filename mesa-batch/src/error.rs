//! Error types for batch execution.

use mesa_pool::PoolError;
use thiserror::Error;

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Error type for batch operations.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Pooling or connection error.
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Job or step configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Step execution error.
    #[error("Step error: {0}")]
    Step(String),

    /// Worker pool error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Item read/process/write error.
    #[error("Item error: {0}")]
    Item(String),
}

impl BatchError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a step error.
    pub fn step(msg: impl Into<String>) -> Self {
        Self::Step(msg.into())
    }

    /// Create a worker error.
    pub fn worker(msg: impl Into<String>) -> Self {
        Self::Worker(msg.into())
    }

    /// Create an item error.
    pub fn item(msg: impl Into<String>) -> Self {
        Self::Item(msg.into())
    }
}
