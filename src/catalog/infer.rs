//! Field type inference and flattening of `data` into catalogued paths.
//!
//! Object keys join with `.`, with dots inside a key escaped as `\.`. Arrays
//! are catalogued once, typed by their first non-null element, so
//! variable-length arrays never grow the catalog.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::models::value::escape_segment;

/// Semantic type tag recorded for a flattened field path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Null,
    Undefined,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Null => "null",
            FieldType::Undefined => "undefined",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(FieldType::String),
            "number" => Ok(FieldType::Number),
            "boolean" => Ok(FieldType::Boolean),
            "null" => Ok(FieldType::Null),
            "undefined" => Ok(FieldType::Undefined),
            other => Err(format!("Unknown field type: {}", other)),
        }
    }
}

/// Infer the type of a single leaf value
pub fn infer_type(value: &Value) -> FieldType {
    match value {
        Value::String(_) => FieldType::String,
        Value::Number(_) => FieldType::Number,
        Value::Bool(_) => FieldType::Boolean,
        Value::Null => FieldType::Null,
        Value::Array(items) => items
            .iter()
            .find(|item| !item.is_null())
            .map(|item| match item {
                Value::Array(_) | Value::Object(_) => FieldType::Undefined,
                scalar => infer_type(scalar),
            })
            .unwrap_or(FieldType::Undefined),
        Value::Object(_) => FieldType::Undefined,
    }
}

/// A flattened `(path, type)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlatField {
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

/// Flatten a data document into its distinct `(path, type)` pairs.
/// Empty objects are catalogued as `undefined` so they stay discoverable.
pub fn flatten(data: &Value) -> BTreeSet<FlatField> {
    let mut out = BTreeSet::new();
    if let Value::Object(map) = data {
        for (key, value) in map {
            walk(escape_segment(key), value, &mut out);
        }
    }
    out
}

fn walk(path: String, value: &Value, out: &mut BTreeSet<FlatField>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                walk(format!("{}.{}", path, escape_segment(key)), child, out);
            }
        }
        other => {
            out.insert(FlatField { path, field_type: infer_type(other) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(data: Value) -> Vec<(String, FieldType)> {
        flatten(&data).into_iter().map(|f| (f.path, f.field_type)).collect()
    }

    #[test]
    fn infers_scalar_types() {
        assert_eq!(infer_type(&json!("x")), FieldType::String);
        assert_eq!(infer_type(&json!(3.5)), FieldType::Number);
        assert_eq!(infer_type(&json!(false)), FieldType::Boolean);
        assert_eq!(infer_type(&json!(null)), FieldType::Null);
    }

    #[test]
    fn arrays_use_first_non_null_element() {
        assert_eq!(infer_type(&json!([null, 2, "x"])), FieldType::Number);
        assert_eq!(infer_type(&json!([])), FieldType::Undefined);
        assert_eq!(infer_type(&json!([null])), FieldType::Undefined);
        assert_eq!(infer_type(&json!([{"a": 1}])), FieldType::Undefined);
    }

    #[test]
    fn flattens_nested_objects_with_dots() {
        let got = pairs(json!({
            "level": "info",
            "ctx": {"user": {"id": 7}, "ok": true},
            "tags": ["a", "b"],
            "empty": {}
        }));
        assert_eq!(
            got,
            vec![
                ("ctx.ok".to_string(), FieldType::Boolean),
                ("ctx.user.id".to_string(), FieldType::Number),
                ("empty".to_string(), FieldType::Undefined),
                ("level".to_string(), FieldType::String),
                ("tags".to_string(), FieldType::String),
            ]
        );
    }

    #[test]
    fn dotted_keys_are_escaped() {
        assert_eq!(
            pairs(json!({"a.b": "v", "n": {"x.y": 1}})),
            vec![
                (r"a\.b".to_string(), FieldType::String),
                (r"n.x\.y".to_string(), FieldType::Number),
            ]
        );
    }

    #[test]
    fn non_object_data_has_no_fields() {
        assert!(flatten(&json!("scalar")).is_empty());
        assert!(flatten(&json!({})).is_empty());
    }
}
