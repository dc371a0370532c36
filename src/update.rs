use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};
use crate::pipeline::{resolve_field, set_field};
use crate::query;
use crate::value::FieldValue;

/// Apply all update operators in `update` to `doc`.
///
/// `update` must be an object whose keys are operator names (`$set`,
/// `$push`, `$pull`) and whose values map field paths to operands.
/// Operators are applied in key order.
pub fn apply_update(doc: &mut Value, update: &Value) -> StoreResult<()> {
    let obj = update
        .as_object()
        .ok_or_else(|| StoreError::InvalidUpdate("update must be an object".into()))?;
    if obj.is_empty() {
        return Err(StoreError::InvalidUpdate("update must not be empty".into()));
    }

    for (op, fields) in obj {
        let fields = fields
            .as_object()
            .ok_or_else(|| StoreError::InvalidUpdate(format!("{op} value must be an object")))?;
        if fields.is_empty() {
            return Err(StoreError::InvalidUpdate(format!("{op} must not be empty")));
        }
        match op.as_str() {
            "$set" => apply_set(doc, fields),
            "$push" => apply_push(doc, fields)?,
            "$pull" => apply_pull(doc, fields)?,
            _ => {
                return Err(StoreError::InvalidUpdate(format!(
                    "unknown update operator: {op}"
                )));
            }
        }
    }
    Ok(())
}

fn apply_set(doc: &mut Value, fields: &Map<String, Value>) {
    for (path, value) in fields {
        set_field(doc, path, value.clone());
    }
}

/// `{$push: {field: value}}` appends one value; `{$push: {field: {$each:
/// [...]}}}` appends every element in order.
fn apply_push(doc: &mut Value, fields: &Map<String, Value>) -> StoreResult<()> {
    for (path, value) in fields {
        let items = match value.get("$each") {
            Some(Value::Array(each)) => each.clone(),
            Some(_) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$each for '{path}' must be an array"
                )));
            }
            None => vec![value.clone()],
        };
        match resolve_field(doc, path) {
            Value::Null => set_field(doc, path, Value::Array(items)),
            Value::Array(mut arr) => {
                arr.extend(items);
                set_field(doc, path, Value::Array(arr));
            }
            _ => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$push requires field '{path}' to be an array"
                )));
            }
        }
    }
    Ok(())
}

/// `{$pull: {field: cond}}` removes every element matching `cond`. An
/// operator object or sub-document is evaluated as a filter against each
/// element; any other value is compared for equality.
fn apply_pull(doc: &mut Value, fields: &Map<String, Value>) -> StoreResult<()> {
    for (path, cond) in fields {
        let filter = match cond {
            Value::Object(_) => Some(query::parse_query(cond)?),
            _ => None,
        };
        match resolve_field(doc, path) {
            Value::Null => {}
            Value::Array(arr) => {
                let target = FieldValue::from_json(cond);
                let kept: Vec<Value> = arr
                    .into_iter()
                    .filter(|el| match &filter {
                        Some(q) if el.is_object() => !query::matches_value(q, el),
                        Some(_) => true,
                        None => FieldValue::from_json(el) != target,
                    })
                    .collect();
                set_field(doc, path, Value::Array(kept));
            }
            _ => {
                return Err(StoreError::InvalidUpdate(format!(
                    "$pull requires field '{path}' to be an array"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // $set
    // -----------------------------------------------------------------------

    #[test]
    fn set_top_level_field() {
        let mut doc = json!({"title": "rent"});
        apply_update(&mut doc, &json!({"$set": {"currentVat": 7}})).unwrap();
        assert_eq!(doc, json!({"title": "rent", "currentVat": 7}));
    }

    #[test]
    fn set_nested_field_dot_notation() {
        let mut doc = json!({"workRef": {"$ref": "works"}});
        apply_update(&mut doc, &json!({"$set": {"workRef.$id": "w1"}})).unwrap();
        assert_eq!(doc["workRef"], json!({"$ref": "works", "$id": "w1"}));
    }

    // -----------------------------------------------------------------------
    // $push
    // -----------------------------------------------------------------------

    #[test]
    fn push_single_value() {
        let mut doc = json!({"tags": ["a"]});
        apply_update(&mut doc, &json!({"$push": {"tags": "b"}})).unwrap();
        assert_eq!(doc["tags"], json!(["a", "b"]));
    }

    #[test]
    fn push_each_appends_in_order() {
        let mut doc = json!({"lists": [{"_id": "1"}]});
        apply_update(
            &mut doc,
            &json!({"$push": {"lists": {"$each": [{"_id": "2"}, {"_id": "3"}]}}}),
        )
        .unwrap();
        assert_eq!(doc["lists"], json!([{"_id": "1"}, {"_id": "2"}, {"_id": "3"}]));
    }

    #[test]
    fn push_creates_missing_array() {
        let mut doc = json!({});
        apply_update(&mut doc, &json!({"$push": {"lists": {"$each": [1]}}})).unwrap();
        assert_eq!(doc["lists"], json!([1]));
    }

    #[test]
    fn push_errors() {
        let mut doc = json!({"lists": "nope"});
        assert!(apply_update(&mut doc, &json!({"$push": {"lists": 1}})).is_err());
        let mut doc = json!({"lists": []});
        assert!(apply_update(&mut doc, &json!({"$push": {"lists": {"$each": 1}}})).is_err());
    }

    // -----------------------------------------------------------------------
    // $pull
    // -----------------------------------------------------------------------

    #[test]
    fn pull_by_value() {
        let mut doc = json!({"tags": ["a", "b", "c", "b"]});
        apply_update(&mut doc, &json!({"$pull": {"tags": "b"}})).unwrap();
        assert_eq!(doc["tags"], json!(["a", "c"]));
    }

    #[test]
    fn pull_by_id_set_leaves_others() {
        let mut doc = json!({"lists": [
            {"_id": "a", "title": "x"},
            {"_id": "b", "title": "y"},
            {"_id": "c", "title": "z"}
        ]});
        apply_update(
            &mut doc,
            &json!({"$pull": {"lists": {"_id": {"$in": ["a", "c", "zz"]}}}}),
        )
        .unwrap();
        assert_eq!(doc["lists"], json!([{"_id": "b", "title": "y"}]));
    }

    #[test]
    fn pull_condition_ignores_scalars() {
        let mut doc = json!({"lists": [1, {"_id": "a"}]});
        apply_update(&mut doc, &json!({"$pull": {"lists": {"_id": "a"}}})).unwrap();
        assert_eq!(doc["lists"], json!([1]));
    }

    #[test]
    fn pull_noop_on_missing() {
        let mut doc = json!({"title": "x"});
        apply_update(&mut doc, &json!({"$pull": {"lists": {"_id": "a"}}})).unwrap();
        assert_eq!(doc, json!({"title": "x"}));
    }

    // -----------------------------------------------------------------------
    // Errors
    // -----------------------------------------------------------------------

    #[test]
    fn invalid_updates() {
        let mut doc = json!({"a": 1});
        assert!(apply_update(&mut doc, &json!("x")).is_err());
        assert!(apply_update(&mut doc, &json!({})).is_err());
        assert!(apply_update(&mut doc, &json!({"$set": {}})).is_err());
        assert!(apply_update(&mut doc, &json!({"$set": 1})).is_err());
        assert!(apply_update(&mut doc, &json!({"$inc": {"a": 1}})).is_err());
    }
}
