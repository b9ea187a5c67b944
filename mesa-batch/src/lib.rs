//! Partitioned chunk-oriented batch execution over thread-affine connection
//! pooling.
//!
//! A [`PartitionedJob`] splits its input into independent partitions and runs
//! each as a chunk-oriented [`Step`] (reader → processor → writer) on a
//! fixed-size [`worker::WorkerPool`]. SQL readers and writers acquire their
//! connections through `mesa-pool`'s thread-bound provider factory, so the
//! reader and writer of one step always share a connection while concurrent
//! partitions on other workers get their own.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mesa_batch::{PartitionedJob, Step, StepFactory, TablePartitioner};
//!
//! let factory: StepFactory<Row, Row> = Arc::new(|ctx| {
//!     let table = ctx.get_string("partition.table").unwrap();
//!     Ok(Step::new(/* reader, processor, writer over `table` */))
//! });
//!
//! let execution = PartitionedJob::new("nightly", Box::new(TablePartitioner::new("REF_TABLE_")), factory)
//!     .grid_size(10)
//!     .workers(3)
//!     .run()?;
//! assert_eq!(execution.exit_status.exit_code(), "COMPLETED");
//! ```

pub mod context;
pub mod error;
pub mod job;
pub mod observe;
pub mod partition;
pub mod reader;
pub mod step;
pub mod worker;
pub mod writer;

pub use context::ExecutionContext;
pub use error::{BatchError, BatchResult};
pub use job::{JobExecution, PartitionedJob, StepFactory};
pub use observe::record_provider_identity;
pub use partition::{
    PARTITION_NUMBER_KEY, PARTITION_TABLE_KEY, PROVIDER_LIST_KEY_PREFIX, Partitioner,
    TablePartitioner, provider_list_key,
};
pub use reader::{RowMapper, SqlCursorReader};
pub use step::{
    ExitStatus, FnProcessor, ItemProcessor, ItemReader, ItemWriter, PassthroughProcessor, Step,
    StepExecution,
};
pub use worker::WorkerPool;
pub use writer::{ParamBinder, SqlBatchWriter};
