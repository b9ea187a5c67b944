//! Recording provider identities for after-the-fact verification.

use tracing::warn;

use crate::partition::{PARTITION_NUMBER_KEY, provider_list_key};
use crate::step::StepExecution;

/// Append the identity of the provider a step phase used to the partition's
/// identity list, and promote the list into the job context so it can be
/// inspected after the job ends.
///
/// Called from step-lifecycle hooks (typically a spying reader/writer
/// decorator); the identity is an opaque string as far as this module is
/// concerned.
pub fn record_provider_identity(execution: &StepExecution, identity: &str) {
    let Some(partition) = execution.context.get_i64(PARTITION_NUMBER_KEY) else {
        warn!(
            step = %execution.step_name,
            "No partition number in step context; identity not recorded"
        );
        return;
    };

    let key = provider_list_key(partition);
    execution.context.push_string(&key, identity);

    // Promote for access after the job ends.
    if let Some(list) = execution.context.get(&key) {
        execution.job_context.put(key, list);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    #[test]
    fn test_record_appends_and_promotes() {
        let step_ctx = ExecutionContext::new();
        step_ctx.put_i64(PARTITION_NUMBER_KEY, 5);
        let execution = StepExecution::new("step5", step_ctx, ExecutionContext::new());

        record_provider_identity(&execution, "SharedConnectionProxy@a");
        record_provider_identity(&execution, "SharedConnectionProxy@a");

        let key = provider_list_key(5);
        assert_eq!(execution.context.get_string_list(&key).len(), 2);
        assert_eq!(
            execution.job_context.get_string_list(&key),
            vec!["SharedConnectionProxy@a", "SharedConnectionProxy@a"]
        );
    }

    #[test]
    fn test_record_without_partition_number_is_ignored() {
        let execution =
            StepExecution::new("step0", ExecutionContext::new(), ExecutionContext::new());
        record_provider_identity(&execution, "SharedConnectionProxy@b");
        assert!(execution.job_context.is_empty());
    }
}
