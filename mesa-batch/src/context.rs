//! Execution-scoped key-value store.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;

/// A shared key-value store scoped to a job or step execution.
///
/// Contexts are cheap to clone and all clones observe the same backing map,
/// so values recorded by a step-lifecycle hook are visible to whoever holds
/// another handle to the same context (e.g. the job execution after the run).
#[derive(Clone, Default, Debug)]
pub struct ExecutionContext {
    values: Arc<Mutex<HashMap<String, Value>>>,
}

impl ExecutionContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        self.values.lock().insert(key.into(), value);
    }

    /// Fetch a value.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    /// Store a string value.
    pub fn put_string(&self, key: impl Into<String>, value: impl Into<String>) {
        self.put(key, Value::String(value.into()));
    }

    /// Fetch a string value.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Store an integer value.
    pub fn put_i64(&self, key: impl Into<String>, value: i64) {
        self.put(key, Value::from(value));
    }

    /// Fetch an integer value.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    /// Append a string to the array stored under `key`, creating the array
    /// if absent.
    pub fn push_string(&self, key: &str, value: impl Into<String>) {
        let mut values = self.values.lock();
        let entry = values
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = entry {
            list.push(Value::String(value.into()));
        }
    }

    /// Fetch the array stored under `key` as strings.
    pub fn get_string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(list)) => list
                .into_iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Whether the context holds a value for `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    /// Whether the context is empty.
    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}
