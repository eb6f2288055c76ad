//! Conversions between [`Value`] and `serde_json::Value`.

use crate::error::{ValueError, ValueResult};
use crate::value::{Attributes, Value};

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                // u64 above i64::MAX and real floats both land here
                None => Value::Float(n.as_f64().unwrap_or(f64::MAX)),
            },
            serde_json::Value::String(s) => Value::Text(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Integer(i) => serde_json::Value::from(i),
            // non-finite floats have no JSON form
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Value::Text(s) => serde_json::Value::String(s),
            Value::Array(a) => {
                serde_json::Value::Array(a.into_iter().map(serde_json::Value::from).collect())
            }
            Value::Map(m) => serde_json::Value::Object(
                m.into_iter()
                    .map(|(k, v)| (k, serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

/// Convert a JSON object into an attribute map.
///
/// # Errors
///
/// Returns [`ValueError::UnexpectedType`] if `json` is not an object.
pub fn attributes_from_json(json: serde_json::Value) -> ValueResult<Attributes> {
    match json {
        serde_json::Value::Object(_) => Value::from(json).into_map(),
        other => Err(ValueError::unexpected_type(
            "map",
            Value::from(other).type_name(),
        )),
    }
}

/// Convert an attribute map into a JSON object.
pub fn attributes_to_json(attributes: Attributes) -> serde_json::Value {
    serde_json::Value::from(Value::Map(attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_numbers_keep_integer_shape() {
        assert_eq!(Value::from(json!(3)), Value::Integer(3));
        assert_eq!(Value::from(json!(3.5)), Value::Float(3.5));
    }

    #[test]
    fn json_object_to_attributes() {
        let attrs = attributes_from_json(json!({"title": "a", "tags": ["x", "y"], "n": null}))
            .unwrap();
        assert_eq!(attrs["title"], Value::from("a"));
        assert_eq!(attrs["tags"], Value::from(vec!["x", "y"]));
        assert!(attrs["n"].is_null());
    }

    #[test]
    fn non_object_is_rejected() {
        assert!(attributes_from_json(json!([1, 2])).is_err());
    }

    #[test]
    fn back_to_json() {
        let attrs = attributes_from_json(json!({"a": 1, "b": {"c": true}})).unwrap();
        assert_eq!(attributes_to_json(attrs), json!({"a": 1, "b": {"c": true}}));
    }

    #[test]
    fn serde_untagged_parses_json_text() {
        let v: Value = serde_json::from_str(r#"{"a": [1, 2.5, "x", null, false]}"#).unwrap();
        let arr = v.get("a").and_then(Value::as_array).unwrap();
        assert_eq!(arr[0], Value::Integer(1));
        assert_eq!(arr[1], Value::Float(2.5));
        assert_eq!(arr[2], Value::from("x"));
        assert!(arr[3].is_null());
        assert_eq!(arr[4], Value::Bool(false));

        let text = serde_json::to_string(&v).unwrap();
        assert_eq!(text, r#"{"a":[1,2.5,"x",null,false]}"#);
    }
}
