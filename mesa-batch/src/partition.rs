//! Partitioning of a job into independent units of work.

use crate::context::ExecutionContext;

/// Context key holding the 1-based partition number.
pub const PARTITION_NUMBER_KEY: &str = "partition.number";

/// Context key holding the table a partition operates on.
pub const PARTITION_TABLE_KEY: &str = "partition.table";

/// Prefix of the per-partition key under which provider identities are
/// recorded (one list entry per reader/writer observation).
pub const PROVIDER_LIST_KEY_PREFIX: &str = "providers.";

/// The provider-identity list key for a partition number.
pub fn provider_list_key(partition_number: i64) -> String {
    format!("{PROVIDER_LIST_KEY_PREFIX}{partition_number}")
}

/// Splits a job into named partitions, each with its own seeded step context.
pub trait Partitioner: Send + Sync {
    /// Create `grid_size` partitions.
    fn partition(&self, grid_size: usize) -> Vec<(String, ExecutionContext)>;
}

/// Partitioner creating one partition per numbered table
/// (`{prefix}1` .. `{prefix}{grid_size}`).
pub struct TablePartitioner {
    table_prefix: String,
}

impl TablePartitioner {
    /// Create a partitioner over tables with the given name prefix.
    pub fn new(table_prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: table_prefix.into(),
        }
    }
}

impl Partitioner for TablePartitioner {
    fn partition(&self, grid_size: usize) -> Vec<(String, ExecutionContext)> {
        (1..=grid_size as i64)
            .map(|i| {
                let context = ExecutionContext::new();
                context.put_i64(PARTITION_NUMBER_KEY, i);
                context.put_string(PARTITION_TABLE_KEY, format!("{}{}", self.table_prefix, i));
                context.put(provider_list_key(i), serde_json::Value::Array(Vec::new()));
                (format!("step{i}"), context)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_partitioner_creates_grid_size_partitions() {
        let partitions = TablePartitioner::new("REF_TABLE_").partition(3);
        assert_eq!(partitions.len(), 3);

        let (name, ctx) = &partitions[1];
        assert_eq!(name, "step2");
        assert_eq!(ctx.get_i64(PARTITION_NUMBER_KEY), Some(2));
        assert_eq!(
            ctx.get_string(PARTITION_TABLE_KEY).as_deref(),
            Some("REF_TABLE_2")
        );
        assert!(ctx.contains_key(&provider_list_key(2)));
    }

    #[test]
    fn test_provider_list_key() {
        assert_eq!(provider_list_key(4), "providers.4");
    }
}
