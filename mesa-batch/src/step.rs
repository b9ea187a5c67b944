//! Chunk-oriented step execution.
//!
//! A step processes one partition: items flow reader → processor → writer in
//! chunks, entirely on the worker thread the step was dispatched to. The
//! reader opens before the writer, so within a step the reader's resource
//! acquisition always precedes the writer's.

use tracing::{debug, info, warn};

use crate::context::ExecutionContext;
use crate::error::BatchResult;

/// Outcome of a step or job execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed(String),
}

impl ExitStatus {
    /// The exit code string.
    pub fn exit_code(&self) -> &str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed(_) => "FAILED",
        }
    }

    /// Whether this is a completed status.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// State of one step execution: its partition-scoped context, a handle to
/// the job-scoped context, and the run's counters and outcome.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Step name (e.g. `step3`).
    pub step_name: String,
    /// Step-scoped context, seeded by the partitioner.
    pub context: ExecutionContext,
    /// Job-scoped context, shared by all steps of the job.
    pub job_context: ExecutionContext,
    /// Items read so far.
    pub read_count: u64,
    /// Items written so far.
    pub write_count: u64,
    /// Outcome; `Completed` until a failure occurs.
    pub exit_status: ExitStatus,
}

impl StepExecution {
    /// Create a step execution over the given contexts.
    pub fn new(
        step_name: impl Into<String>,
        context: ExecutionContext,
        job_context: ExecutionContext,
    ) -> Self {
        Self {
            step_name: step_name.into(),
            context,
            job_context,
            read_count: 0,
            write_count: 0,
            exit_status: ExitStatus::Completed,
        }
    }
}

/// Reads items for a step, one at a time.
///
/// `open` runs on the worker thread before the first `read`; resource
/// acquisition belongs there, not in the constructor, because step
/// components may be constructed on a different thread than they execute on.
pub trait ItemReader<T>: Send {
    /// Called once before reading starts.
    fn open(&mut self, _execution: &StepExecution) -> BatchResult<()> {
        Ok(())
    }

    /// Read the next item, or `None` when the input is exhausted.
    fn read(&mut self) -> BatchResult<Option<T>>;

    /// Called once after reading ends, also on failure paths.
    fn close(&mut self, _execution: &StepExecution) -> BatchResult<()> {
        Ok(())
    }
}

/// Transforms items between reading and writing.
pub trait ItemProcessor<I, O>: Send {
    /// Process one item.
    fn process(&mut self, item: I) -> BatchResult<O>;
}

/// Processor that passes items through unchanged.
#[derive(Default)]
pub struct PassthroughProcessor;

impl<T> ItemProcessor<T, T> for PassthroughProcessor {
    fn process(&mut self, item: T) -> BatchResult<T> {
        Ok(item)
    }
}

/// Processor backed by a closure.
pub struct FnProcessor<F>(F);

impl<F> FnProcessor<F> {
    /// Wrap a closure as a processor.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<I, O, F> ItemProcessor<I, O> for FnProcessor<F>
where
    F: FnMut(I) -> BatchResult<O> + Send,
{
    fn process(&mut self, item: I) -> BatchResult<O> {
        (self.0)(item)
    }
}

/// Writes chunks of processed items.
pub trait ItemWriter<T>: Send {
    /// Called once before the first chunk, after the reader has opened.
    fn open(&mut self, _execution: &StepExecution) -> BatchResult<()> {
        Ok(())
    }

    /// Write one chunk of items.
    fn write(&mut self, items: &[T]) -> BatchResult<()>;

    /// Called once after the last chunk, also on failure paths.
    fn close(&mut self, _execution: &StepExecution) -> BatchResult<()> {
        Ok(())
    }
}

/// A chunk-oriented step: reader, processor, writer and a chunk size.
pub struct Step<I, O> {
    name: String,
    reader: Box<dyn ItemReader<I>>,
    processor: Box<dyn ItemProcessor<I, O>>,
    writer: Box<dyn ItemWriter<O>>,
    chunk_size: usize,
}

impl<I, O> Step<I, O> {
    /// Create a step.
    pub fn new(
        name: impl Into<String>,
        reader: Box<dyn ItemReader<I>>,
        processor: Box<dyn ItemProcessor<I, O>>,
        writer: Box<dyn ItemWriter<O>>,
        chunk_size: usize,
    ) -> Self {
        Self {
            name: name.into(),
            reader,
            processor,
            writer,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Step name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute the step, recording counts and outcome on `execution`.
    pub fn execute(&mut self, execution: &mut StepExecution) {
        info!(step = %execution.step_name, "Executing step");
        match self.try_execute(execution) {
            Ok(()) => execution.exit_status = ExitStatus::Completed,
            Err(err) => {
                warn!(step = %execution.step_name, error = %err, "Step failed");
                execution.exit_status = ExitStatus::Failed(err.to_string());
            }
        }
    }

    fn try_execute(&mut self, execution: &mut StepExecution) -> BatchResult<()> {
        // Reader first: its resource request precedes the writer's.
        self.reader.open(execution)?;
        if let Err(err) = self.writer.open(execution) {
            let _ = self.reader.close(execution);
            return Err(err);
        }

        let result = self.run_chunks(execution);

        let writer_closed = self.writer.close(execution);
        let reader_closed = self.reader.close(execution);
        result?;
        writer_closed?;
        reader_closed
    }

    fn run_chunks(&mut self, execution: &mut StepExecution) -> BatchResult<()> {
        loop {
            let mut chunk = Vec::with_capacity(self.chunk_size);
            let mut exhausted = false;
            while chunk.len() < self.chunk_size {
                match self.reader.read()? {
                    Some(item) => {
                        execution.read_count += 1;
                        chunk.push(self.processor.process(item)?);
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }

            if !chunk.is_empty() {
                debug!(step = %execution.step_name, items = chunk.len(), "Writing chunk");
                self.writer.write(&chunk)?;
                execution.write_count += chunk.len() as u64;
            }
            if exhausted {
                return Ok(());
            }
        }
    }
}
