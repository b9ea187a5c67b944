//! Integration test for thread-bound provider affinity under a concurrently
//! partitioned job.
//!
//! Ten partitions run over a pool of three worker threads, each step reading
//! and then updating the same rows of its own reference table. Spying
//! decorators record which provider proxy the reader and writer of every
//! step observed, which lets the tests verify after the run that
//!
//! - reader and writer of one step shared a provider, and
//! - concurrently running steps on different threads did not.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use mesa_batch::{
    BatchError, BatchResult, ExecutionContext, ItemProcessor, ItemReader, ItemWriter,
    JobExecution, PARTITION_TABLE_KEY, PartitionedJob, SqlBatchWriter, SqlCursorReader, Step,
    StepExecution, StepFactory, TablePartitioner, provider_list_key, record_provider_identity,
};
use mesa_pool::{SqliteConfig, SqlitePool, ThreadBoundProviderFactory};
use pretty_assertions::assert_eq;
use serde_json::Value;

/// The number of partitions to create.
const GRID_SIZE: usize = 10;

/// Worker pool size; partitions outnumber workers so threads are reused.
const POOL_SIZE: usize = 3;

/// Prefix of the per-partition table name, sans the number.
const REF_TABLE_PREFIX: &str = "REF_TABLE_";

/// Placeholder table name replaced in the template script.
const TABLE_NAME_PLACEHOLDER: &str = "REF_TABLE_X";

/// Template SQL create table/insert script.
const TESTDATA_TEMPLATE_SQL: &str = include_str!("fixtures/testdata_template.sql");

/// Rows inserted per table by the template script.
const ROWS_PER_TABLE: u64 = 8;

// -------------- SPYING DECORATORS --------------

/// Reader decorator that records the provider identity its delegate used.
struct SpyingReader {
    inner: SqlCursorReader<Value>,
}

impl ItemReader<Value> for SpyingReader {
    fn open(&mut self, execution: &StepExecution) -> BatchResult<()> {
        self.inner.open(execution)
    }

    fn read(&mut self) -> BatchResult<Option<Value>> {
        self.inner.read()
    }

    fn close(&mut self, execution: &StepExecution) -> BatchResult<()> {
        // Record before closing; the delegate forgets its provider on close.
        if let Some(identity) = self.inner.provider_identity() {
            record_provider_identity(execution, &identity);
        }
        self.inner.close(execution)
    }
}

/// Writer decorator that records the provider identity its delegate used.
struct SpyingWriter {
    inner: SqlBatchWriter<Value>,
}

impl ItemWriter<Value> for SpyingWriter {
    fn open(&mut self, execution: &StepExecution) -> BatchResult<()> {
        self.inner.open(execution)
    }

    fn write(&mut self, items: &[Value]) -> BatchResult<()> {
        self.inner.write(items)
    }

    fn close(&mut self, execution: &StepExecution) -> BatchResult<()> {
        if let Some(identity) = self.inner.provider_identity() {
            record_provider_identity(execution, &identity);
        }
        self.inner.close(execution)
    }
}

/// Processor that slows each item down just enough for every pooled worker
/// to pick up a partition before the first one finishes.
struct SlowProcessor;

impl ItemProcessor<Value, Value> for SlowProcessor {
    fn process(&mut self, item: Value) -> BatchResult<Value> {
        std::thread::sleep(Duration::from_millis(5));
        Ok(item)
    }
}

// -------------- SETUP AND KICK OFF JOB (ONCE) --------------

struct Harness {
    execution: JobExecution,
    pool: Arc<SqlitePool>,
    _dir: tempfile::TempDir,
}

static HARNESS: OnceLock<Harness> = OnceLock::new();

fn harness() -> &'static Harness {
    HARNESS.get_or_init(launch_job)
}

fn launch_job() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let pool = Arc::new(
        SqlitePool::builder()
            .config(SqliteConfig::file(dir.path().join("batch.db")))
            .max_connections(POOL_SIZE)
            .build()
            .unwrap(),
    );

    // One table with test data per partition.
    let admin = pool.get().unwrap();
    for i in 1..=GRID_SIZE {
        let table = format!("{REF_TABLE_PREFIX}{i}");
        admin
            .execute_batch(&TESTDATA_TEMPLATE_SQL.replace(TABLE_NAME_PLACEHOLDER, &table))
            .unwrap();
    }
    drop(admin);

    let provider_factory = Arc::new(ThreadBoundProviderFactory::new(pool.clone()));
    let step_factory: StepFactory<Value, Value> = Arc::new(move |ctx: &ExecutionContext| {
        let table = ctx
            .get_string(PARTITION_TABLE_KEY)
            .ok_or_else(|| BatchError::config("partition table not seeded"))?;

        let reader = SpyingReader {
            inner: SqlCursorReader::new(
                provider_factory.clone(),
                format!("SELECT id, name FROM {table} ORDER BY id"),
                Box::new(|row| Ok(row.clone())),
            ),
        };
        let writer = SpyingWriter {
            inner: SqlBatchWriter::new(
                provider_factory.clone(),
                format!("UPDATE {table} SET processed = 1 WHERE id = ?1"),
                Box::new(|row: &Value| {
                    vec![rusqlite::types::Value::from(
                        row["id"].as_i64().unwrap_or_default(),
                    )]
                }),
            ),
        };

        Ok(Step::new(
            format!("step-{table}"),
            Box::new(reader),
            Box::new(SlowProcessor),
            Box::new(writer),
            3,
        ))
    });

    let execution = PartitionedJob::new(
        "ref-table-sweep",
        Box::new(TablePartitioner::new(REF_TABLE_PREFIX)),
        step_factory,
    )
    .grid_size(GRID_SIZE)
    .workers(POOL_SIZE)
    .run()
    .unwrap();

    Harness {
        execution,
        pool,
        _dir: dir,
    }
}

fn recorded_identities(partition: i64) -> Vec<String> {
    harness()
        .execution
        .context
        .get_string_list(&provider_list_key(partition))
}

// -------------- PRELIM TESTS, ENSURE JOB FUNCTIONALITY --------------

/// The job completes and every partition reads and updates all of its rows.
#[test]
fn test_job_completes_and_processes_all_rows() {
    let harness = harness();
    assert_eq!(harness.execution.exit_status.exit_code(), "COMPLETED");
    assert_eq!(harness.execution.step_executions.len(), GRID_SIZE);

    for step in &harness.execution.step_executions {
        assert_eq!(step.read_count, ROWS_PER_TABLE);
        assert_eq!(step.write_count, ROWS_PER_TABLE);
    }

    let conn = harness.pool.get().unwrap();
    for i in 1..=GRID_SIZE {
        let row = conn
            .query_one(&format!(
                "SELECT COUNT(*) AS unprocessed FROM {REF_TABLE_PREFIX}{i} WHERE processed = 0"
            ))
            .unwrap();
        assert_eq!(row["unprocessed"], 0, "table {i} has unprocessed rows");
    }
}

/// Every partition promoted exactly two recordings into the job context:
/// one for the reader and one for the writer.
#[test]
fn test_every_partition_recorded_reader_and_writer() {
    for i in 1..=GRID_SIZE as i64 {
        let identities = recorded_identities(i);
        assert_eq!(
            identities.len(),
            2,
            "partition {i}: expected one recording each from reader and writer"
        );
    }
}

/// Recorded identities carry the per-instance suffix; without it the
/// remaining tests could not tell proxy instances apart.
#[test]
fn test_identities_expose_instance_suffix() {
    for i in 1..=GRID_SIZE as i64 {
        for identity in recorded_identities(i) {
            let suffix = identity
                .strip_prefix("SharedConnectionProxy@")
                .unwrap_or_else(|| panic!("unexpected identity format: {identity}"));
            assert!(
                !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_hexdigit()),
                "expected hex instance suffix: {identity}"
            );
        }
    }
}

// -------------- ACTUAL THREADING TESTS OF THE PROVIDER PROXY --------------

/// The reader and writer of the same step received the same provider proxy.
#[test]
fn test_reader_and_writer_received_same_provider() {
    for i in 1..=GRID_SIZE as i64 {
        let identities = recorded_identities(i);
        assert_eq!(
            identities[0], identities[1],
            "partition {i}: reader and writer saw different providers"
        );
    }
}

/// Concurrently running partitioned steps received different provider
/// proxies, bounded by (and with thread reuse, equal to) the worker pool
/// size.
#[test]
fn test_distinct_providers_match_worker_pool_size() {
    let mut unique = std::collections::HashSet::new();
    for i in 1..=GRID_SIZE as i64 {
        unique.extend(recorded_identities(i));
    }
    // min() in case the number of partitions is smaller than the pool.
    assert_eq!(unique.len(), GRID_SIZE.min(POOL_SIZE));
}
