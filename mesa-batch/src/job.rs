//! Partitioned job execution.

use std::sync::Arc;
use std::sync::mpsc::channel;

use tracing::{info, warn};

use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::partition::{PARTITION_NUMBER_KEY, Partitioner};
use crate::step::{ExitStatus, Step, StepExecution};
use crate::worker::WorkerPool;

/// Result of a job run: aggregate outcome, the job-scoped context, and every
/// partition's step execution.
#[derive(Debug)]
pub struct JobExecution {
    /// Job name.
    pub job_name: String,
    /// Aggregate outcome.
    pub exit_status: ExitStatus,
    /// Job-scoped context (receives values promoted by step hooks).
    pub context: ExecutionContext,
    /// Per-partition step executions, ordered by partition number.
    pub step_executions: Vec<StepExecution>,
}

/// Builds a fresh step for one partition, on the worker thread that will
/// execute it.
///
/// Step scope matters: components that acquire thread-bound resources must
/// re-acquire them per step rather than being shared across partitions, so
/// the job constructs a new reader/processor/writer set for every partition.
pub type StepFactory<I, O> =
    Arc<dyn Fn(&ExecutionContext) -> BatchResult<Step<I, O>> + Send + Sync>;

/// A job that splits its input into partitions and executes them
/// concurrently on a fixed-size worker pool.
pub struct PartitionedJob<I, O> {
    name: String,
    grid_size: usize,
    workers: usize,
    partitioner: Box<dyn Partitioner>,
    step_factory: StepFactory<I, O>,
}

impl<I: 'static, O: 'static> PartitionedJob<I, O> {
    /// Create a job with one partition and one worker; adjust with
    /// [`grid_size`](Self::grid_size) and [`workers`](Self::workers).
    pub fn new(
        name: impl Into<String>,
        partitioner: Box<dyn Partitioner>,
        step_factory: StepFactory<I, O>,
    ) -> Self {
        Self {
            name: name.into(),
            grid_size: 1,
            workers: 1,
            partitioner,
            step_factory,
        }
    }

    /// Set the number of partitions.
    pub fn grid_size(mut self, grid_size: usize) -> Self {
        self.grid_size = grid_size;
        self
    }

    /// Set the worker pool size.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Run every partition to completion and aggregate the results.
    pub fn run(&self) -> BatchResult<JobExecution> {
        if self.grid_size == 0 {
            return Err(BatchError::config("grid size must be at least 1"));
        }
        info!(
            job = %self.name,
            grid_size = self.grid_size,
            workers = self.workers,
            "Launching partitioned job"
        );

        let job_context = ExecutionContext::new();
        let partitions = self.partitioner.partition(self.grid_size);
        let pool = WorkerPool::new(self.workers)?;
        let (tx, rx) = channel::<StepExecution>();

        let expected = partitions.len();
        for (step_name, step_context) in partitions {
            let factory = self.step_factory.clone();
            let tx = tx.clone();
            let mut execution = StepExecution::new(step_name, step_context, job_context.clone());
            pool.execute(move || {
                // The step is built here, on the executing worker thread.
                match factory(&execution.context) {
                    Ok(mut step) => step.execute(&mut execution),
                    Err(err) => {
                        execution.exit_status = ExitStatus::Failed(err.to_string());
                    }
                }
                let _ = tx.send(execution);
            })?;
        }
        drop(tx);

        let mut step_executions: Vec<StepExecution> = rx.iter().collect();
        if step_executions.len() != expected {
            return Err(BatchError::worker(format!(
                "job {}: {} of {} partitions never reported",
                self.name,
                expected - step_executions.len(),
                expected
            )));
        }
        step_executions
            .sort_by_key(|exec| exec.context.get_i64(PARTITION_NUMBER_KEY).unwrap_or(i64::MAX));
        drop(pool); // joins the workers

        let failed = step_executions
            .iter()
            .filter(|exec| !exec.exit_status.is_completed())
            .count();
        let exit_status = if failed == 0 {
            ExitStatus::Completed
        } else {
            warn!(job = %self.name, failed, "Partitions failed");
            ExitStatus::Failed(format!("{failed} of {expected} partitions failed"))
        };

        Ok(JobExecution {
            job_name: self.name.clone(),
            exit_status,
            context: job_context,
            step_executions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use crate::partition::TablePartitioner;
    use crate::step::{ItemReader, ItemWriter, PassthroughProcessor};
    use std::collections::HashSet;
    use std::time::Duration;

    struct CountingReader {
        remaining: i64,
    }

    impl ItemReader<i64> for CountingReader {
        fn read(&mut self) -> BatchResult<Option<i64>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            Ok(Some(self.remaining))
        }
    }

    struct ThreadRecordingWriter;

    impl ItemWriter<i64> for ThreadRecordingWriter {
        fn open(&mut self, execution: &StepExecution) -> BatchResult<()> {
            // Let every pooled worker engage before any step finishes.
            std::thread::sleep(Duration::from_millis(10));
            execution
                .context
                .put_string("thread", format!("{:?}", std::thread::current().id()));
            Ok(())
        }

        fn write(&mut self, _items: &[i64]) -> BatchResult<()> {
            Ok(())
        }
    }

    fn counting_job(grid: usize, workers: usize) -> PartitionedJob<i64, i64> {
        let factory: StepFactory<i64, i64> = Arc::new(|ctx| {
            let n = ctx.get_i64(PARTITION_NUMBER_KEY).unwrap_or(0);
            Ok(Step::new(
                format!("step{n}"),
                Box::new(CountingReader { remaining: n }),
                Box::new(PassthroughProcessor),
                Box::new(ThreadRecordingWriter),
                2,
            ))
        });
        PartitionedJob::new("counting", Box::new(TablePartitioner::new("T_")), factory)
            .grid_size(grid)
            .workers(workers)
    }

    #[test]
    fn test_job_runs_all_partitions() {
        let execution = counting_job(4, 2).run().unwrap();

        assert!(execution.exit_status.is_completed());
        assert_eq!(execution.step_executions.len(), 4);
        for (i, step) in execution.step_executions.iter().enumerate() {
            let n = (i + 1) as u64;
            assert_eq!(step.step_name, format!("step{n}"));
            assert_eq!(step.read_count, n);
            assert_eq!(step.write_count, n);
        }
    }

    #[test]
    fn test_job_bounded_by_worker_pool() {
        let execution = counting_job(6, 2).run().unwrap();

        let threads: HashSet<String> = execution
            .step_executions
            .iter()
            .filter_map(|step| step.context.get_string("thread"))
            .collect();
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn test_job_zero_grid_is_config_error() {
        let err = counting_job(4, 2).grid_size(0).run().unwrap_err();
        assert!(matches!(err, BatchError::Config(_)));
    }

    #[test]
    fn test_job_aggregates_failures() {
        let factory: StepFactory<i64, i64> = Arc::new(|ctx| {
            let n = ctx.get_i64(PARTITION_NUMBER_KEY).unwrap_or(0);
            if n == 2 {
                return Err(BatchError::step("partition 2 cannot be built"));
            }
            Ok(Step::new(
                format!("step{n}"),
                Box::new(CountingReader { remaining: 1 }),
                Box::new(PassthroughProcessor),
                Box::new(ThreadRecordingWriter),
                1,
            ))
        });
        let job = PartitionedJob::new("flaky", Box::new(TablePartitioner::new("T_")), factory)
            .grid_size(3)
            .workers(2);

        let execution = job.run().unwrap();
        assert_eq!(execution.exit_status.exit_code(), "FAILED");
        let completed = execution
            .step_executions
            .iter()
            .filter(|s| s.exit_status.is_completed())
            .count();
        assert_eq!(completed, 2);
    }
}
