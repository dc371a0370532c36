//! Aggregation rows to typed records.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result, StoreError};

/// Collapse a joined reference to a scalar: `[]` and null become `""`, a
/// non-empty array becomes its first element.
pub fn normalize_reference(value: Value) -> Value {
    match value {
        Value::Null => Value::String(String::new()),
        Value::Array(items) => items
            .into_iter()
            .next()
            .map_or_else(|| Value::String(String::new()), normalize_reference),
        other => other,
    }
}

fn normalize_row(mut row: Value, reference_fields: &[&str]) -> Value {
    if let Some(map) = row.as_object_mut() {
        for field in reference_fields {
            let value = map.remove(*field).unwrap_or(Value::Null);
            map.insert(field.to_string(), normalize_reference(value));
        }
    }
    row
}

/// Deserialize every row. Zero rows is an empty list.
pub fn map_list<T: DeserializeOwned>(rows: Vec<Value>, reference_fields: &[&str]) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| Ok(serde_json::from_value(normalize_row(row, reference_fields))?))
        .collect()
}

/// Deserialize the first row, or `NotFound("<entity> not found")`.
pub fn map_one<T: DeserializeOwned>(rows: Vec<Value>, reference_fields: &[&str], entity: &str) -> Result<T> {
    let row = rows
        .into_iter()
        .next()
        .ok_or_else(|| Error::NotFound(format!("{entity} not found")))?;
    Ok(serde_json::from_value(normalize_row(row, reference_fields))?)
}

/// The `count` of a single-group count result. No group means nothing
/// matched, which is a count of zero.
pub fn map_count(rows: &[Value]) -> Result<u64> {
    let Some(row) = rows.first() else {
        return Ok(0);
    };
    row.get("count")
        .and_then(Value::as_u64)
        .ok_or_else(|| Error::Store(StoreError::InvalidPipeline("count result without a count".into())))
}
