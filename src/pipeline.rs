use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::error::{StoreError, StoreResult};
use crate::query::{self, SortOrder};
use crate::value::FieldValue;

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expression {
    Literal(Value),
    FieldRef(String),
    Eq(Box<Expression>, Box<Expression>),
    Cond {
        test: Box<Expression>,
        then: Box<Expression>,
        otherwise: Box<Expression>,
    },
    ArrayElemAt(Box<Expression>, Box<Expression>),
    ToDate(Box<Expression>),
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum GroupKey {
    Null,
    Single(Expression),
}

#[derive(Debug, Clone)]
enum Accumulator {
    Sum(Expression),
    Count,
}

enum AccumulatorState {
    Sum(f64),
    Count(u64),
}

// ---------------------------------------------------------------------------
// Projection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ProjectionField {
    Include,
    Exclude,
    Compute(Expression),
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Stage {
    Match(query::Query),
    Group {
        key: GroupKey,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Vec<(String, SortOrder)>),
    Skip(u64),
    Limit(u64),
    Project(Vec<(String, ProjectionField)>),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
}

/// A parsed aggregation pipeline, ready to run over a set of documents.
pub struct Pipeline {
    stages: Vec<Stage>,
    leading_match: Option<Value>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Resolve a dotted path. Arrays along the path are traversed element-wise,
/// so `"items.title"` over `{"items": [{"title": "a"}, {"title": "b"}]}`
/// yields `["a", "b"]`.
pub(crate) fn resolve_field(doc: &Value, path: &str) -> Value {
    let parts: Vec<&str> = path.split('.').collect();
    resolve_parts(doc, &parts)
}

fn resolve_parts(current: &Value, parts: &[&str]) -> Value {
    let Some((head, rest)) = parts.split_first() else {
        return current.clone();
    };
    match current {
        Value::Object(map) => match map.get(*head) {
            Some(next) => resolve_parts(next, rest),
            None => Value::Null,
        },
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_parts(item, parts))
                .filter(|v| !v.is_null())
                .collect(),
        ),
        _ => Value::Null,
    }
}

pub(crate) fn set_field(doc: &mut Value, path: &str, value: Value) {
    let parts: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, part) in parts.iter().enumerate() {
        let Value::Object(map) = current else {
            return;
        };
        if i == parts.len() - 1 {
            map.insert(part.to_string(), value);
            return;
        }
        let entry = map.entry(part.to_string()).or_insert_with(|| json!({}));
        if !entry.is_object() {
            *entry = json!({});
        }
        current = entry;
    }
}

fn number_to_value(n: f64) -> Value {
    if n.fract() == 0.0 && n >= i64::MIN as f64 && n <= i64::MAX as f64 {
        Value::Number((n as i64).into())
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

fn single_entry(map: &Map<String, Value>) -> Option<(&String, &Value)> {
    if map.len() == 1 { map.iter().next() } else { None }
}

// ---------------------------------------------------------------------------
// Expression parsing & evaluation
// ---------------------------------------------------------------------------

fn expression_args<'a>(op: &str, arg: &'a Value, n: usize) -> StoreResult<&'a [Value]> {
    match arg.as_array() {
        Some(arr) if arr.len() == n => Ok(arr.as_slice()),
        _ => Err(StoreError::InvalidPipeline(format!(
            "{op} requires an array of {n} arguments"
        ))),
    }
}

fn parse_expression(val: &Value) -> StoreResult<Expression> {
    match val {
        Value::String(s) if s.starts_with('$') => Ok(Expression::FieldRef(s[1..].to_string())),
        Value::Object(map) => {
            let Some((key, arg)) = single_entry(map).filter(|(k, _)| k.starts_with('$')) else {
                return Ok(Expression::Literal(val.clone()));
            };
            match key.as_str() {
                "$eq" => {
                    let args = expression_args(key, arg, 2)?;
                    Ok(Expression::Eq(
                        Box::new(parse_expression(&args[0])?),
                        Box::new(parse_expression(&args[1])?),
                    ))
                }
                "$cond" => parse_cond(arg),
                "$arrayElemAt" => {
                    let args = expression_args(key, arg, 2)?;
                    Ok(Expression::ArrayElemAt(
                        Box::new(parse_expression(&args[0])?),
                        Box::new(parse_expression(&args[1])?),
                    ))
                }
                "$toDate" => Ok(Expression::ToDate(Box::new(parse_expression(arg)?))),
                "$literal" => Ok(Expression::Literal(arg.clone())),
                _ => Err(StoreError::InvalidPipeline(format!(
                    "unknown expression operator: {key}"
                ))),
            }
        }
        _ => Ok(Expression::Literal(val.clone())),
    }
}

fn parse_cond(arg: &Value) -> StoreResult<Expression> {
    let (test, then, otherwise) = match arg {
        Value::Array(arr) if arr.len() == 3 => (&arr[0], &arr[1], &arr[2]),
        Value::Object(obj) => match (obj.get("if"), obj.get("then"), obj.get("else")) {
            (Some(i), Some(t), Some(e)) => (i, t, e),
            _ => {
                return Err(StoreError::InvalidPipeline(
                    "$cond requires 'if', 'then' and 'else'".into(),
                ));
            }
        },
        _ => {
            return Err(StoreError::InvalidPipeline(
                "$cond requires an array of 3 arguments or an object".into(),
            ));
        }
    };
    Ok(Expression::Cond {
        test: Box::new(parse_expression(test)?),
        then: Box::new(parse_expression(then)?),
        otherwise: Box::new(parse_expression(otherwise)?),
    })
}

impl Expression {
    fn eval(&self, doc: &Value) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => resolve_field(doc, path),
            Expression::Eq(a, b) => {
                let a = FieldValue::from_json(&a.eval(doc));
                let b = FieldValue::from_json(&b.eval(doc));
                Value::Bool(a == b)
            }
            Expression::Cond {
                test,
                then,
                otherwise,
            } => {
                if is_truthy(&test.eval(doc)) {
                    then.eval(doc)
                } else {
                    otherwise.eval(doc)
                }
            }
            Expression::ArrayElemAt(arr, idx) => {
                let (Value::Array(items), Some(i)) = (arr.eval(doc), idx.eval(doc).as_i64())
                else {
                    return Value::Null;
                };
                let pos = if i < 0 { items.len() as i64 + i } else { i };
                usize::try_from(pos)
                    .ok()
                    .and_then(|p| items.into_iter().nth(p))
                    .unwrap_or(Value::Null)
            }
            Expression::ToDate(inner) => match inner.eval(doc) {
                Value::String(s) => match FieldValue::parse_string(&s) {
                    dt @ FieldValue::DateTime(_) => dt.to_json(),
                    _ => Value::Null,
                },
                Value::Number(n) => match n.as_i64() {
                    Some(ms) => FieldValue::DateTime(ms).to_json(),
                    None => Value::Null,
                },
                _ => Value::Null,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Stage parsing helpers
// ---------------------------------------------------------------------------

fn parse_accumulator(val: &Value) -> StoreResult<Accumulator> {
    let (op, arg) = val
        .as_object()
        .and_then(single_entry)
        .ok_or_else(|| {
            StoreError::InvalidPipeline("accumulator must be an object with one operator".into())
        })?;
    match op.as_str() {
        "$sum" => Ok(Accumulator::Sum(parse_expression(arg)?)),
        "$count" => Ok(Accumulator::Count),
        _ => Err(StoreError::InvalidPipeline(format!(
            "unknown accumulator: {}",
            op
        ))),
    }
}

fn parse_group_stage(val: &Value) -> StoreResult<Stage> {
    let obj = val
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$group must be an object".into()))?;

    let id_val = obj
        .get("_id")
        .ok_or_else(|| StoreError::InvalidPipeline("$group requires '_id' field".into()))?;

    let key = match id_val {
        Value::Null => GroupKey::Null,
        other => GroupKey::Single(parse_expression(other)?),
    };

    let mut accumulators = Vec::new();
    for (name, spec) in obj {
        if name == "_id" {
            continue;
        }
        accumulators.push((name.clone(), parse_accumulator(spec)?));
    }

    Ok(Stage::Group { key, accumulators })
}

fn parse_sort(val: &Value) -> StoreResult<Vec<(String, SortOrder)>> {
    let obj = val
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$sort must be an object".into()))?;
    let mut fields = Vec::new();
    for (field, dir) in obj {
        let order = match dir.as_i64() {
            Some(1) => SortOrder::Asc,
            Some(-1) => SortOrder::Desc,
            _ => {
                return Err(StoreError::InvalidPipeline(
                    "sort direction must be 1 or -1".into(),
                ));
            }
        };
        fields.push((field.clone(), order));
    }
    Ok(fields)
}

fn parse_project(val: &Value) -> StoreResult<Vec<(String, ProjectionField)>> {
    let obj = val
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$project must be an object".into()))?;
    let mut fields = Vec::new();
    for (field, spec) in obj {
        let pf = match spec {
            Value::Number(n) if n.as_i64() == Some(1) => ProjectionField::Include,
            Value::Number(n) if n.as_i64() == Some(0) => ProjectionField::Exclude,
            Value::Bool(true) => ProjectionField::Include,
            Value::Bool(false) => ProjectionField::Exclude,
            _ => ProjectionField::Compute(parse_expression(spec)?),
        };
        fields.push((field.clone(), pf));
    }
    Ok(fields)
}

fn parse_lookup(val: &Value) -> StoreResult<Stage> {
    let obj = val
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$lookup must be an object".into()))?;
    let get = |key: &str| {
        obj.get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| StoreError::InvalidPipeline(format!("$lookup requires '{key}' string")))
    };
    Ok(Stage::Lookup {
        from: get("from")?,
        local_field: get("localField")?,
        foreign_field: get("foreignField")?,
        as_field: get("as")?,
    })
}

fn parse_count_arg(stage: &str, val: &Value) -> StoreResult<u64> {
    val.as_u64().ok_or_else(|| {
        StoreError::InvalidPipeline(format!("{stage} must be a non-negative integer"))
    })
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

fn exec_match(docs: Vec<Value>, query: &query::Query) -> Vec<Value> {
    docs.into_iter()
        .filter(|doc| query::matches_value(query, doc))
        .collect()
}

fn exec_group(docs: Vec<Value>, key: &GroupKey, accumulators: &[(String, Accumulator)]) -> Vec<Value> {
    let mut groups: HashMap<String, (Value, Vec<AccumulatorState>)> = HashMap::new();
    let mut insertion_order: Vec<String> = Vec::new();

    for doc in &docs {
        let key_val = match key {
            GroupKey::Null => Value::Null,
            GroupKey::Single(expr) => expr.eval(doc),
        };
        let key_str = key_val.to_string();

        let (_, states) = groups.entry(key_str.clone()).or_insert_with(|| {
            insertion_order.push(key_str);
            let initial = accumulators
                .iter()
                .map(|(_, acc)| match acc {
                    Accumulator::Sum(_) => AccumulatorState::Sum(0.0),
                    Accumulator::Count => AccumulatorState::Count(0),
                })
                .collect();
            (key_val, initial)
        });

        for ((_, acc), state) in accumulators.iter().zip(states.iter_mut()) {
            match (acc, state) {
                (Accumulator::Sum(expr), AccumulatorState::Sum(s)) => {
                    if let Some(n) = expr.eval(doc).as_f64() {
                        *s += n;
                    }
                }
                (Accumulator::Count, AccumulatorState::Count(c)) => *c += 1,
                _ => {}
            }
        }
    }

    insertion_order
        .iter()
        .filter_map(|key_str| groups.remove(key_str))
        .map(|(key_val, states)| {
            let mut doc = Map::new();
            doc.insert("_id".to_string(), key_val);
            for ((name, _), state) in accumulators.iter().zip(states) {
                let val = match state {
                    AccumulatorState::Sum(s) => number_to_value(s),
                    AccumulatorState::Count(c) => Value::Number(c.into()),
                };
                doc.insert(name.clone(), val);
            }
            Value::Object(doc)
        })
        .collect()
}

fn exec_sort(mut docs: Vec<Value>, sort_fields: &[(String, SortOrder)]) -> Vec<Value> {
    docs.sort_by(|a, b| {
        for (field, order) in sort_fields {
            let av = FieldValue::from_json(&resolve_field(a, field));
            let bv = FieldValue::from_json(&resolve_field(b, field));
            let cmp = match order {
                SortOrder::Asc => av.cmp(&bv),
                SortOrder::Desc => bv.cmp(&av),
            };
            if cmp != std::cmp::Ordering::Equal {
                return cmp;
            }
        }
        std::cmp::Ordering::Equal
    });
    docs
}

fn exec_project(docs: Vec<Value>, fields: &[(String, ProjectionField)]) -> Vec<Value> {
    let inclusion_mode = fields.iter().any(|(name, pf)| {
        matches!(pf, ProjectionField::Compute(_))
            || (name != "_id" && matches!(pf, ProjectionField::Include))
    });

    docs.into_iter()
        .map(|doc| {
            let mut result = Map::new();

            if inclusion_mode {
                let id_excluded = fields
                    .iter()
                    .any(|(name, pf)| name == "_id" && matches!(pf, ProjectionField::Exclude));
                if !id_excluded {
                    if let Some(id_val) = doc.get("_id") {
                        result.insert("_id".to_string(), id_val.clone());
                    }
                }

                for (name, pf) in fields {
                    match pf {
                        ProjectionField::Include => {
                            let val = resolve_field(&doc, name);
                            if !val.is_null() || doc.get(name.as_str()).is_some() {
                                result.insert(name.clone(), val);
                            }
                        }
                        ProjectionField::Compute(expr) => {
                            result.insert(name.clone(), expr.eval(&doc));
                        }
                        ProjectionField::Exclude => {}
                    }
                }
            } else {
                if let Value::Object(map) = &doc {
                    result = map.clone();
                }
                for (name, pf) in fields {
                    if matches!(pf, ProjectionField::Exclude) {
                        result.remove(name.as_str());
                    }
                }
            }

            Value::Object(result)
        })
        .collect()
}

fn exec_lookup<F>(
    docs: Vec<Value>,
    from: &str,
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
    lookup_fn: &F,
) -> StoreResult<Vec<Value>>
where
    F: Fn(&str, &Value) -> StoreResult<Vec<Value>>,
{
    let mut result = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let local_val = resolve_field(&doc, local_field);
        let query = match local_val {
            Value::Array(vals) => json!({ foreign_field: { "$in": vals } }),
            other => json!({ foreign_field: { "$eq": other } }),
        };
        let foreign_docs = lookup_fn(from, &query)?;
        set_field(&mut doc, as_field, Value::Array(foreign_docs));
        result.push(doc);
    }
    Ok(result)
}

// ---------------------------------------------------------------------------
// Pipeline parsing & execution
// ---------------------------------------------------------------------------

impl Pipeline {
    pub fn parse(stages_json: &[Value]) -> StoreResult<Self> {
        let mut stages = Vec::with_capacity(stages_json.len());
        let mut leading_match = None;

        for (i, stage_val) in stages_json.iter().enumerate() {
            let (stage_name, stage_body) = stage_val
                .as_object()
                .and_then(single_entry)
                .ok_or_else(|| {
                    StoreError::InvalidPipeline(
                        "each pipeline stage must be an object with exactly one key".into(),
                    )
                })?;

            let stage = match stage_name.as_str() {
                "$match" => {
                    if i == 0 {
                        leading_match = Some(stage_body.clone());
                    }
                    Stage::Match(query::parse_query(stage_body)?)
                }
                "$group" => parse_group_stage(stage_body)?,
                "$sort" => Stage::Sort(parse_sort(stage_body)?),
                "$skip" => Stage::Skip(parse_count_arg("$skip", stage_body)?),
                "$limit" => Stage::Limit(parse_count_arg("$limit", stage_body)?),
                "$project" => Stage::Project(parse_project(stage_body)?),
                "$lookup" => parse_lookup(stage_body)?,
                _ => {
                    return Err(StoreError::InvalidPipeline(format!(
                        "unknown stage: {}",
                        stage_name
                    )));
                }
            };
            stages.push(stage);
        }

        Ok(Pipeline {
            stages,
            leading_match,
        })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// If the first stage is `$match`, return its filter and the index to
    /// resume execution from.
    pub fn take_leading_match(&self) -> (Option<&Value>, usize) {
        match &self.leading_match {
            Some(val) => (Some(val), 1),
            None => (None, 0),
        }
    }

    /// Execute stages starting at `start` over `docs`. `lookup_fn` resolves
    /// `$lookup` stages: it receives the foreign collection name and a filter.
    pub fn execute_from<F>(&self, start: usize, docs: Vec<Value>, lookup_fn: &F) -> StoreResult<Vec<Value>>
    where
        F: Fn(&str, &Value) -> StoreResult<Vec<Value>>,
    {
        let mut current = docs;
        for stage in &self.stages[start..] {
            current = match stage {
                Stage::Match(q) => exec_match(current, q),
                Stage::Group { key, accumulators } => exec_group(current, key, accumulators),
                Stage::Sort(fields) => exec_sort(current, fields),
                Stage::Skip(n) => current
                    .into_iter()
                    .skip(usize::try_from(*n).unwrap_or(usize::MAX))
                    .collect(),
                Stage::Limit(n) => current
                    .into_iter()
                    .take(usize::try_from(*n).unwrap_or(usize::MAX))
                    .collect(),
                Stage::Project(fields) => exec_project(current, fields),
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } => exec_lookup(current, from, local_field, foreign_field, as_field, lookup_fn)?,
            };
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_lookup(_col: &str, _q: &Value) -> StoreResult<Vec<Value>> {
        Ok(vec![])
    }

    fn run(stages: Value, docs: Vec<Value>) -> Vec<Value> {
        let stages = stages.as_array().unwrap().clone();
        Pipeline::parse(&stages)
            .unwrap()
            .execute_from(0, docs, &no_lookup)
            .unwrap()
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    #[test]
    fn expr_field_ref_through_array() {
        let doc = json!({"workRef": [{"title": "Bridge"}, {"title": "Road"}]});
        let expr = parse_expression(&json!("$workRef.title")).unwrap();
        assert_eq!(expr.eval(&doc), json!(["Bridge", "Road"]));
    }

    #[test]
    fn expr_field_ref_through_empty_array() {
        let doc = json!({"workRef": []});
        let expr = parse_expression(&json!("$workRef.title")).unwrap();
        assert_eq!(expr.eval(&doc), json!([]));
    }

    #[test]
    fn expr_missing_field_returns_null() {
        let expr = parse_expression(&json!("$missing")).unwrap();
        assert_eq!(expr.eval(&json!({})), Value::Null);
    }

    #[test]
    fn expr_eq_empty_array() {
        let expr = parse_expression(&json!({"$eq": ["$refs", []]})).unwrap();
        assert_eq!(expr.eval(&json!({"refs": []})), json!(true));
        assert_eq!(expr.eval(&json!({"refs": [1]})), json!(false));
    }

    #[test]
    fn expr_cond_array_and_object_forms() {
        let doc = json!({"flag": true});
        let a = parse_expression(&json!({"$cond": ["$flag", "yes", "no"]})).unwrap();
        let b = parse_expression(&json!({"$cond": {"if": "$missing", "then": "yes", "else": "no"}}))
            .unwrap();
        assert_eq!(a.eval(&doc), json!("yes"));
        assert_eq!(b.eval(&doc), json!("no"));
    }

    #[test]
    fn expr_array_elem_at() {
        let doc = json!({"xs": [10, 20, 30]});
        let first = parse_expression(&json!({"$arrayElemAt": ["$xs", 0]})).unwrap();
        let last = parse_expression(&json!({"$arrayElemAt": ["$xs", -1]})).unwrap();
        let past = parse_expression(&json!({"$arrayElemAt": ["$xs", 5]})).unwrap();
        assert_eq!(first.eval(&doc), json!(10));
        assert_eq!(last.eval(&doc), json!(30));
        assert_eq!(past.eval(&doc), Value::Null);
    }

    #[test]
    fn expr_to_date() {
        let expr = parse_expression(&json!({"$toDate": "$date"})).unwrap();
        assert_eq!(
            expr.eval(&json!({"date": "2024-05-01"})),
            json!("2024-05-01T00:00:00+00:00")
        );
        assert_eq!(
            expr.eval(&json!({"date": 0})),
            json!("1970-01-01T00:00:00+00:00")
        );
        assert_eq!(expr.eval(&json!({"date": "soon"})), Value::Null);
    }

    #[test]
    fn expr_unknown_operator_errors() {
        assert!(parse_expression(&json!({"$bogus": 1})).is_err());
        assert!(parse_expression(&json!({"$eq": [1]})).is_err());
        assert!(parse_expression(&json!({"$cond": [1, 2]})).is_err());
    }

    #[test]
    fn expr_plain_object_is_literal() {
        let expr = parse_expression(&json!({"a": 1})).unwrap();
        assert_eq!(expr.eval(&json!({})), json!({"a": 1}));
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    #[test]
    fn match_filters_docs() {
        let docs = vec![
            json!({"status": 1, "title": "a"}),
            json!({"status": 0, "title": "b"}),
            json!({"status": 1, "title": "c"}),
        ];
        let out = run(json!([{"$match": {"status": 1}}]), docs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["title"], "c");
    }

    #[test]
    fn group_null_key_sums_literal() {
        let docs = vec![json!({"a": 1}), json!({"a": 2}), json!({"a": 3})];
        let out = run(
            json!([{"$group": {"_id": null, "count": {"$sum": 1}, "total": {"$sum": "$a"}}}]),
            docs,
        );
        assert_eq!(out, vec![json!({"_id": null, "count": 3, "total": 6})]);
    }

    #[test]
    fn group_by_field_with_count() {
        let docs = vec![
            json!({"kind": "x"}),
            json!({"kind": "y"}),
            json!({"kind": "x"}),
        ];
        let out = run(json!([{"$group": {"_id": "$kind", "n": {"$count": {}}}}]), docs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], json!({"_id": "x", "n": 2}));
        assert_eq!(out[1], json!({"_id": "y", "n": 1}));
    }

    #[test]
    fn group_over_nothing_yields_no_groups() {
        let out = run(json!([{"$group": {"_id": null, "count": {"$sum": 1}}}]), vec![]);
        assert!(out.is_empty());
    }

    #[test]
    fn sort_asc_desc() {
        let docs = vec![json!({"v": 2}), json!({"v": 3}), json!({"v": 1})];
        let asc = run(json!([{"$sort": {"v": 1}}]), docs.clone());
        let desc = run(json!([{"$sort": {"v": -1}}]), docs);
        assert_eq!(asc, vec![json!({"v": 1}), json!({"v": 2}), json!({"v": 3})]);
        assert_eq!(desc, vec![json!({"v": 3}), json!({"v": 2}), json!({"v": 1})]);
    }

    #[test]
    fn sort_by_date_strings() {
        let docs = vec![
            json!({"date": "2024-03-01T00:00:00+00:00"}),
            json!({"date": "2024-01-01"}),
        ];
        let out = run(json!([{"$sort": {"date": 1}}]), docs);
        assert_eq!(out[0]["date"], "2024-01-01");
    }

    #[test]
    fn skip_and_limit() {
        let docs: Vec<Value> = (0..10).map(|i| json!({"i": i})).collect();
        let out = run(json!([{"$skip": 3}, {"$limit": 2}]), docs);
        assert_eq!(out, vec![json!({"i": 3}), json!({"i": 4})]);
    }

    #[test]
    fn skip_past_end() {
        let docs = vec![json!({"i": 0})];
        assert!(run(json!([{"$skip": 5}]), docs).is_empty());
    }

    #[test]
    fn skip_and_limit_saturate_at_max() {
        let docs: Vec<Value> = (0..3).map(|i| json!({"i": i})).collect();
        assert_eq!(run(json!([{"$limit": u64::MAX}]), docs.clone()).len(), 3);
        assert!(run(json!([{"$skip": u64::MAX}]), docs).is_empty());
    }

    #[test]
    fn project_include_rename_compute() {
        let docs = vec![json!({"_id": "id1", "title": "t", "secret": "s", "n": 2})];
        let out = run(
            json!([{"$project": {"expenseID": "$_id", "title": 1, "flag": {"$eq": ["$n", 2]}}}]),
            docs,
        );
        assert_eq!(
            out[0],
            json!({"_id": "id1", "expenseID": "id1", "title": "t", "flag": true})
        );
    }

    #[test]
    fn project_include_skips_missing_fields() {
        let out = run(json!([{"$project": {"title": 1, "detail": 1}}]), vec![json!({"title": "t"})]);
        assert_eq!(out[0], json!({"title": "t"}));
    }

    #[test]
    fn project_exclude() {
        let out = run(
            json!([{"$project": {"password": 0}}]),
            vec![json!({"_id": "u", "username": "a", "password": "h"})],
        );
        assert_eq!(out[0], json!({"_id": "u", "username": "a"}));
    }

    #[test]
    fn lookup_sets_matches_or_empty() {
        let lookup = |from: &str, q: &Value| -> StoreResult<Vec<Value>> {
            assert_eq!(from, "works");
            let parsed = query::parse_query(q)?;
            Ok([json!({"_id": "w1", "title": "Bridge"})]
                .into_iter()
                .filter(|d| query::matches_value(&parsed, d))
                .collect())
        };
        let stages = vec![json!({"$lookup": {
            "from": "works",
            "localField": "workRef.$id",
            "foreignField": "_id",
            "as": "workRef"
        }})];
        let docs = vec![
            json!({"workRef": {"$ref": "works", "$id": "w1"}}),
            json!({"workRef": {"$ref": "works", "$id": "w9"}}),
            json!({}),
        ];
        let out = Pipeline::parse(&stages)
            .unwrap()
            .execute_from(0, docs, &lookup)
            .unwrap();
        assert_eq!(out[0]["workRef"], json!([{"_id": "w1", "title": "Bridge"}]));
        assert_eq!(out[1]["workRef"], json!([]));
        assert_eq!(out[2]["workRef"], json!([]));
    }

    #[test]
    fn reference_normalization_projection() {
        let stages = json!([{"$project": {"workRef": {"$cond": [
            {"$eq": ["$workRef", []]},
            "",
            {"$arrayElemAt": ["$workRef.title", 0]}
        ]}}}]);
        let out = run(
            stages,
            vec![
                json!({"workRef": [{"_id": "w1", "title": "Bridge"}]}),
                json!({"workRef": []}),
            ],
        );
        assert_eq!(out[0]["workRef"], "Bridge");
        assert_eq!(out[1]["workRef"], "");
    }

    // -----------------------------------------------------------------------
    // Parsing
    // -----------------------------------------------------------------------

    #[test]
    fn parse_empty_pipeline() {
        let p = Pipeline::parse(&[]).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.take_leading_match(), (None, 0));
    }

    #[test]
    fn parse_leading_match() {
        let p = Pipeline::parse(&[json!({"$match": {"status": 1}}), json!({"$limit": 1})]).unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.take_leading_match(), (Some(&json!({"status": 1})), 1));
    }

    #[test]
    fn parse_errors() {
        assert!(Pipeline::parse(&[json!({"$unknown": {}})]).is_err());
        assert!(Pipeline::parse(&[json!("stage")]).is_err());
        assert!(Pipeline::parse(&[json!({"$skip": 1, "$limit": 1})]).is_err());
        assert!(Pipeline::parse(&[json!({"$skip": -1})]).is_err());
        assert!(Pipeline::parse(&[json!({"$sort": {"a": 2}})]).is_err());
        assert!(Pipeline::parse(&[json!({"$group": {"count": {"$sum": 1}}})]).is_err());
        assert!(Pipeline::parse(&[json!({"$group": {"_id": null, "x": {"$avg": 1}}})]).is_err());
        assert!(Pipeline::parse(&[json!({"$lookup": {"from": "a"}})]).is_err());
    }
}
