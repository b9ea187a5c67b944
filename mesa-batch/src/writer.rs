//! SQL batch writer.

use std::sync::Arc;

use mesa_pool::{ConnectionProvider, SharedConnectionProxy, ThreadBoundProviderFactory};
use tracing::debug;

use crate::error::{BatchError, BatchResult};
use crate::step::{ItemWriter, StepExecution};

/// Binds one item to the parameters of the write statement.
pub type ParamBinder<T> = Box<dyn Fn(&T) -> Vec<rusqlite::types::Value> + Send>;

/// Writes chunks of items with one parameterized SQL statement per item,
/// inside a transaction per chunk.
///
/// Like the reader, the writer requests its provider from the factory in
/// [`ItemWriter::open`] on the executing worker thread. Because the step's
/// reader has pinned a shared connection on the same proxy by then, the
/// writer's statements run on the identical connection that holds the read —
/// which is what prevents cross-connection lock conflicts between
/// concurrently running partitions.
pub struct SqlBatchWriter<T> {
    factory: Arc<ThreadBoundProviderFactory>,
    sql: String,
    binder: ParamBinder<T>,
    provider: Option<Arc<SharedConnectionProxy>>,
}

impl<T> SqlBatchWriter<T> {
    /// Create a writer for the given parameterized statement.
    pub fn new(
        factory: Arc<ThreadBoundProviderFactory>,
        sql: impl Into<String>,
        binder: ParamBinder<T>,
    ) -> Self {
        Self {
            factory,
            sql: sql.into(),
            binder,
            provider: None,
        }
    }

    /// Identity of the provider in use, once the writer is open.
    pub fn provider_identity(&self) -> Option<String> {
        self.provider.as_ref().map(|p| p.identity())
    }
}

impl<T> ItemWriter<T> for SqlBatchWriter<T> {
    fn open(&mut self, execution: &StepExecution) -> BatchResult<()> {
        let provider = self.factory.get();
        debug!(
            step = %execution.step_name,
            provider = %provider,
            "Opening batch writer"
        );
        self.provider = Some(provider);
        Ok(())
    }

    fn write(&mut self, items: &[T]) -> BatchResult<()> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| BatchError::step("batch writer used before open"))?;
        let conn = provider.connection()?;

        conn.transaction(|raw| {
            let mut stmt = raw.prepare(&self.sql)?;
            for item in items {
                stmt.execute(rusqlite::params_from_iter((self.binder)(item)))?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn close(&mut self, execution: &StepExecution) -> BatchResult<()> {
        if self.provider.take().is_some() {
            debug!(step = %execution.step_name, "Closing batch writer");
        }
        Ok(())
    }
}
