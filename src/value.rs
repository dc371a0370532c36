use std::cmp::Ordering;

use serde_json::Value as JsonValue;

/// JSON scalar with type-aware ordering, used by filters and `$sort`.
///
/// Date-looking strings are compared as millisecond timestamps so that
/// `"2024-01-05"` and `"2024-01-05T00:00:00Z"` are equal and order by time.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    DateTime(i64),
    String(String),
}

impl Eq for FieldValue {}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        use FieldValue::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,

            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Boolean(_), _) => Ordering::Less,
            (_, Boolean(_)) => Ordering::Greater,

            (Integer(a), Integer(b)) => a.cmp(b),
            (Integer(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Integer(b)) => a.total_cmp(&(*b as f64)),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Integer(_) | Float(_), _) => Ordering::Less,
            (_, Integer(_) | Float(_)) => Ordering::Greater,

            (DateTime(a), DateTime(b)) => a.cmp(b),
            (DateTime(_), _) => Ordering::Less,
            (_, DateTime(_)) => Ordering::Greater,

            (String(a), String(b)) => a.cmp(b),
        }
    }
}

impl FieldValue {
    pub fn from_json(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => FieldValue::Null,
            JsonValue::Bool(b) => FieldValue::Boolean(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    FieldValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    FieldValue::Float(f)
                } else {
                    FieldValue::Null
                }
            }
            JsonValue::String(s) => Self::parse_string(s),
            // Arrays and objects compare by their canonical JSON text.
            other => FieldValue::String(other.to_string()),
        }
    }

    pub fn parse_string(s: &str) -> Self {
        // Anything that does not start with YYYY-MM is not a date.
        let b = s.as_bytes();
        if b.len() < 10
            || !b[0].is_ascii_digit()
            || !b[1].is_ascii_digit()
            || !b[2].is_ascii_digit()
            || !b[3].is_ascii_digit()
            || b[4] != b'-'
            || !b[5].is_ascii_digit()
            || !b[6].is_ascii_digit()
        {
            return FieldValue::String(s.to_string());
        }

        if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
            return FieldValue::DateTime(dt.timestamp_millis());
        }
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return FieldValue::DateTime(dt.and_utc().timestamp_millis());
        }
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
            return FieldValue::DateTime(dt.and_utc().timestamp_millis());
        }
        if let Ok(d) = chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return FieldValue::DateTime(dt.and_utc().timestamp_millis());
            }
        }
        FieldValue::String(s.to_string())
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Null => JsonValue::Null,
            FieldValue::Boolean(b) => JsonValue::Bool(*b),
            FieldValue::Integer(i) => JsonValue::Number((*i).into()),
            FieldValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            FieldValue::DateTime(ms) => match chrono::DateTime::from_timestamp_millis(*ms) {
                Some(dt) => JsonValue::String(dt.to_rfc3339()),
                None => JsonValue::Number((*ms).into()),
            },
            FieldValue::String(s) => JsonValue::String(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn date_parsing() {
        let v = FieldValue::from_json(&json!("2024-01-15T10:30:00Z"));
        assert!(matches!(v, FieldValue::DateTime(_)));
    }

    #[test]
    fn date_only_equals_midnight_rfc3339() {
        let a = FieldValue::from_json(&json!("2024-01-15"));
        let b = FieldValue::from_json(&json!("2024-01-15T00:00:00+00:00"));
        assert_eq!(a, b);
    }

    #[test]
    fn date_ordering() {
        let a = FieldValue::from_json(&json!("2024-01-15"));
        let b = FieldValue::from_json(&json!("2024-02-01 08:00:00"));
        assert!(a < b);
    }

    #[test]
    fn type_ordering() {
        let null = FieldValue::from_json(&json!(null));
        let b = FieldValue::from_json(&json!(true));
        let n = FieldValue::from_json(&json!(1));
        let d = FieldValue::from_json(&json!("2024-01-01"));
        let s = FieldValue::from_json(&json!("abc"));
        assert!(null < b && b < n && n < d && d < s);
    }

    #[test]
    fn integer_float_cross_type() {
        assert_eq!(FieldValue::from_json(&json!(7)), FieldValue::from_json(&json!(7.0)));
        assert!(FieldValue::from_json(&json!(7)) < FieldValue::from_json(&json!(7.5)));
    }

    #[test]
    fn short_string_not_date() {
        assert!(matches!(
            FieldValue::from_json(&json!("2024")),
            FieldValue::String(_)
        ));
    }

    #[test]
    fn objects_compare_by_json_text() {
        let a = FieldValue::from_json(&json!({"$ref": "works", "$id": "1"}));
        let b = FieldValue::from_json(&json!({"$ref": "works", "$id": "1"}));
        assert_eq!(a, b);
    }

    #[test]
    fn datetime_to_json_is_rfc3339() {
        let v = FieldValue::parse_string("2024-03-01");
        assert_eq!(v.to_json(), json!("2024-03-01T00:00:00+00:00"));
    }
}
