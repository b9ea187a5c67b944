//! SQL cursor reader.

use std::collections::VecDeque;
use std::sync::Arc;

use mesa_pool::{SharedConnectionProxy, ThreadBoundProviderFactory};
use serde_json::Value;
use tracing::debug;

use crate::error::BatchResult;
use crate::step::{ItemReader, StepExecution};

/// Maps one JSON row to an item.
pub type RowMapper<T> = Box<dyn Fn(&Value) -> BatchResult<T> + Send>;

/// Reads the rows of one SQL query through a thread-bound provider.
///
/// The provider is requested from the factory in [`ItemReader::open`], on the
/// worker thread executing the step — never in the constructor and never
/// across steps — and the step's connection is pinned there so the step's
/// writer observes the same connection. Rows are fetched eagerly at open
/// (SQLite statements cannot outlive the borrow of their connection) and
/// drained by `read`.
pub struct SqlCursorReader<T> {
    factory: Arc<ThreadBoundProviderFactory>,
    sql: String,
    mapper: RowMapper<T>,
    provider: Option<Arc<SharedConnectionProxy>>,
    rows: VecDeque<Value>,
}

impl<T> SqlCursorReader<T> {
    /// Create a reader for the given query.
    pub fn new(
        factory: Arc<ThreadBoundProviderFactory>,
        sql: impl Into<String>,
        mapper: RowMapper<T>,
    ) -> Self {
        Self {
            factory,
            sql: sql.into(),
            mapper,
            provider: None,
            rows: VecDeque::new(),
        }
    }

    /// Identity of the provider in use, once the reader is open.
    pub fn provider_identity(&self) -> Option<String> {
        self.provider.as_ref().map(|p| p.identity())
    }
}

impl<T> ItemReader<T> for SqlCursorReader<T> {
    fn open(&mut self, execution: &StepExecution) -> BatchResult<()> {
        let provider = self.factory.get();
        debug!(
            step = %execution.step_name,
            provider = %provider,
            "Opening cursor reader"
        );
        let conn = provider.begin_shared()?;
        match conn.query(&self.sql) {
            Ok(rows) => {
                self.rows = rows.into();
                self.provider = Some(provider);
                Ok(())
            }
            Err(err) => {
                // A failed open must not leave the thread's proxy pinned; the
                // step never reaches close() for a reader that did not open.
                provider.end_shared();
                Err(err.into())
            }
        }
    }

    fn read(&mut self) -> BatchResult<Option<T>> {
        match self.rows.pop_front() {
            Some(row) => Ok(Some((self.mapper)(&row)?)),
            None => Ok(None),
        }
    }

    fn close(&mut self, execution: &StepExecution) -> BatchResult<()> {
        if let Some(provider) = self.provider.take() {
            debug!(step = %execution.step_name, "Closing cursor reader");
            provider.end_shared();
        }
        self.rows.clear();
        Ok(())
    }
}
