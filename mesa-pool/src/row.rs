//! Row value conversion helpers.

use rusqlite::Row;
use rusqlite::types::ValueRef;
use serde_json::Value;

/// Convert the value at the given column index into a JSON value.
///
/// Blobs are represented as arrays of byte values; text that is not valid
/// UTF-8 is converted lossily.
pub fn value_at(row: &Row<'_>, idx: usize) -> Value {
    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::from(i),
        Ok(ValueRef::Real(f)) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Ok(ValueRef::Text(t)) => Value::String(String::from_utf8_lossy(t).into_owned()),
        Ok(ValueRef::Blob(b)) => Value::Array(b.iter().map(|&byte| Value::from(byte)).collect()),
        Err(_) => Value::Null,
    }
}
