use regex::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;

use crate::error::{StoreError, StoreResult};
use crate::value::FieldValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    /// Direction as written in a `$sort` stage.
    pub fn as_i64(self) -> i64 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }
}

// ---------------------------------------------------------------------------
// Filter AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(FieldValue),
    Ne(FieldValue),
    Gt(FieldValue),
    Gte(FieldValue),
    Lt(FieldValue),
    Lte(FieldValue),
    In(Vec<FieldValue>),
    Exists(bool),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub enum Query {
    Field { field: String, op: QueryOp },
    And(Vec<Query>),
    Or(Vec<Query>),
    All,
}

// ---------------------------------------------------------------------------
// Parsing: JSON → Query AST
// ---------------------------------------------------------------------------

pub fn parse_query(query: &JsonValue) -> StoreResult<Query> {
    let obj = query
        .as_object()
        .ok_or_else(|| StoreError::InvalidQuery("query must be a JSON object".into()))?;

    if obj.is_empty() {
        return Ok(Query::All);
    }

    let mut conditions: Vec<Query> = Vec::new();

    for (key, value) in obj {
        match key.as_str() {
            "$and" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| StoreError::InvalidQuery("$and must be an array".into()))?;
                let subs: StoreResult<Vec<Query>> = arr.iter().map(parse_query).collect();
                conditions.push(Query::And(subs?));
            }
            "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| StoreError::InvalidQuery("$or must be an array".into()))?;
                let subs: StoreResult<Vec<Query>> = arr.iter().map(parse_query).collect();
                conditions.push(Query::Or(subs?));
            }
            field => match value.as_object() {
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    // `$options` only modifies a sibling `$regex`.
                    let options = ops.get("$options").and_then(|v| v.as_str()).unwrap_or("");
                    for (op_key, op_val) in ops {
                        if op_key == "$options" {
                            continue;
                        }
                        conditions.push(Query::Field {
                            field: field.to_string(),
                            op: parse_op(op_key, op_val, options)?,
                        });
                    }
                }
                _ => conditions.push(Query::Field {
                    field: field.to_string(),
                    op: QueryOp::Eq(FieldValue::from_json(value)),
                }),
            },
        }
    }

    if conditions.len() == 1 {
        Ok(conditions.remove(0))
    } else {
        Ok(Query::And(conditions))
    }
}

fn parse_op(op_key: &str, op_val: &JsonValue, options: &str) -> StoreResult<QueryOp> {
    match op_key {
        "$eq" => Ok(QueryOp::Eq(FieldValue::from_json(op_val))),
        "$ne" => Ok(QueryOp::Ne(FieldValue::from_json(op_val))),
        "$gt" => Ok(QueryOp::Gt(FieldValue::from_json(op_val))),
        "$gte" => Ok(QueryOp::Gte(FieldValue::from_json(op_val))),
        "$lt" => Ok(QueryOp::Lt(FieldValue::from_json(op_val))),
        "$lte" => Ok(QueryOp::Lte(FieldValue::from_json(op_val))),
        "$in" => {
            let arr = op_val
                .as_array()
                .ok_or_else(|| StoreError::InvalidQuery("$in must be an array".into()))?;
            Ok(QueryOp::In(arr.iter().map(FieldValue::from_json).collect()))
        }
        "$exists" => {
            let b = op_val
                .as_bool()
                .ok_or_else(|| StoreError::InvalidQuery("$exists must be a boolean".into()))?;
            Ok(QueryOp::Exists(b))
        }
        "$regex" => {
            let pattern = op_val
                .as_str()
                .ok_or_else(|| StoreError::InvalidQuery("$regex must be a string".into()))?;
            let re = RegexBuilder::new(pattern)
                .case_insensitive(options.contains('i'))
                .build()
                .map_err(|e| StoreError::InvalidQuery(format!("invalid $regex: {e}")))?;
            Ok(QueryOp::Regex(re))
        }
        _ => Err(StoreError::InvalidQuery(format!(
            "unknown operator: {}",
            op_key
        ))),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn resolve_field_ref<'a>(data: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut current = data;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_op(op: &QueryOp, val: &JsonValue) -> bool {
    if let QueryOp::Regex(re) = op {
        return match val {
            JsonValue::String(s) => re.is_match(s),
            JsonValue::Array(items) => items.iter().any(|v| matches_op(op, v)),
            _ => false,
        };
    }
    let fv = FieldValue::from_json(val);
    match op {
        QueryOp::Eq(v) => fv == *v,
        QueryOp::Ne(v) => fv != *v,
        QueryOp::Gt(v) => fv > *v,
        QueryOp::Gte(v) => fv >= *v,
        QueryOp::Lt(v) => fv < *v,
        QueryOp::Lte(v) => fv <= *v,
        QueryOp::In(vals) => vals.contains(&fv),
        QueryOp::Exists(_) | QueryOp::Regex(_) => false,
    }
}

/// Evaluate `query` against a single JSON document.
pub fn matches_value(query: &Query, data: &JsonValue) -> bool {
    match query {
        Query::All => true,
        Query::Field { field, op } => {
            let field_val = resolve_field_ref(data, field);
            match (op, field_val) {
                (QueryOp::Exists(expected), v) => v.is_some() == *expected,
                // A missing field is unequal to everything.
                (QueryOp::Ne(_), None) => true,
                (_, None) => false,
                (op, Some(val)) => matches_op(op, val),
            }
        }
        Query::And(subs) => subs.iter().all(|s| matches_value(s, data)),
        Query::Or(subs) => subs.iter().any(|s| matches_value(s, data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_eq() {
        let q = parse_query(&json!({"status": 1})).unwrap();
        assert!(matches_value(&q, &json!({"status": 1})));
        assert!(!matches_value(&q, &json!({"status": 0})));
        assert!(!matches_value(&q, &json!({})));
    }

    #[test]
    fn parse_eq_operator() {
        let q = parse_query(&json!({"status": {"$eq": 1}})).unwrap();
        assert!(matches_value(&q, &json!({"status": 1})));
        assert!(!matches_value(&q, &json!({"status": 2})));
    }

    #[test]
    fn parse_range() {
        let q = parse_query(&json!({"currentVat": {"$gte": 5, "$lt": 10}})).unwrap();
        assert!(matches_value(&q, &json!({"currentVat": 7})));
        assert!(!matches_value(&q, &json!({"currentVat": 3})));
        assert!(!matches_value(&q, &json!({"currentVat": 10})));
    }

    #[test]
    fn parse_in() {
        let q = parse_query(&json!({"_id": {"$in": ["a", "b"]}})).unwrap();
        assert!(matches_value(&q, &json!({"_id": "a"})));
        assert!(matches_value(&q, &json!({"_id": "b"})));
        assert!(!matches_value(&q, &json!({"_id": "c"})));
    }

    #[test]
    fn parse_exists_and_ne() {
        let q = parse_query(&json!({"detail": {"$exists": false}})).unwrap();
        assert!(matches_value(&q, &json!({"title": "x"})));
        let q = parse_query(&json!({"detail": {"$ne": "x"}})).unwrap();
        assert!(matches_value(&q, &json!({"title": "x"})));
    }

    #[test]
    fn parse_or() {
        let q = parse_query(&json!({
            "$or": [{"title": "fuel"}, {"currentVat": {"$gte": 5}}]
        }))
        .unwrap();
        assert!(matches_value(&q, &json!({"title": "fuel", "currentVat": 0})));
        assert!(matches_value(&q, &json!({"title": "rent", "currentVat": 7})));
        assert!(!matches_value(&q, &json!({"title": "rent", "currentVat": 1})));
    }

    #[test]
    fn regex_case_insensitive() {
        let q = parse_query(&json!({"title": {"$regex": "fuel", "$options": "i"}})).unwrap();
        assert!(matches_value(&q, &json!({"title": "Diesel FUEL"})));
        assert!(!matches_value(&q, &json!({"title": "rent"})));
        assert!(!matches_value(&q, &json!({"title": 3})));
    }

    #[test]
    fn regex_case_sensitive_without_options() {
        let q = parse_query(&json!({"title": {"$regex": "^Fuel$"}})).unwrap();
        assert!(matches_value(&q, &json!({"title": "Fuel"})));
        assert!(!matches_value(&q, &json!({"title": "fuel"})));
    }

    #[test]
    fn nested_path() {
        let q = parse_query(&json!({"workRef.$id": "abc"})).unwrap();
        assert!(matches_value(&q, &json!({"workRef": {"$ref": "works", "$id": "abc"}})));
    }

    #[test]
    fn invalid_queries() {
        assert!(parse_query(&json!([])).is_err());
        assert!(parse_query(&json!({"a": {"$bogus": 1}})).is_err());
        assert!(parse_query(&json!({"a": {"$in": 1}})).is_err());
        assert!(parse_query(&json!({"a": {"$regex": "("}})).is_err());
    }
}
