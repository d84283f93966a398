//! JSON helpers shared by both storage backends.
//!
//! Ordering follows PostgreSQL's jsonb ordering so the document backend sorts
//! exactly like the relational one: null < string < number < boolean < array < object.

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Split a dotted field path into its segments. `\.` is a literal dot inside
/// a key and `\\` a literal backslash.
pub fn split_path(path: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => current.push('\\'),
            },
            '.' => segments.push(std::mem::take(&mut current)),
            other => current.push(other),
        }
    }
    segments.push(current);
    segments
}

/// Escape one object key so it survives [`split_path`] as a single segment.
/// A leading `$` is escaped too so the key never reads as a system field.
pub fn escape_segment(key: &str) -> String {
    if !key.starts_with('$') && !key.contains(|c| c == '.' || c == '\\') {
        return key.to_string();
    }
    let mut escaped = String::with_capacity(key.len() + 2);
    for (i, c) in key.chars().enumerate() {
        if c == '.' || c == '\\' || (i == 0 && c == '$') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Inverse of [`split_path`]
pub fn join_path(segments: &[String]) -> String {
    segments.iter().map(|s| escape_segment(s)).collect::<Vec<_>>().join(".")
}

/// Resolve a path inside a JSON document. Arrays are not indexed into.
pub fn get_path<'a>(value: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = value;
    for segment in path {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Deep-merge `patch` into `target`. Objects merge key by key, everything else
/// (arrays included) is overwritten.
pub fn deep_merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) if existing.is_object() && patch_value.is_object() => {
                        deep_merge(existing, patch_value);
                    }
                    _ => {
                        target_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::String(_) => 1,
        Value::Number(_) => 2,
        Value::Bool(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values matching jsonb comparison semantics
pub fn json_cmp(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .len()
            .cmp(&y.len())
            .then_with(|| {
                x.iter()
                    .zip(y.iter())
                    .map(|(l, r)| json_cmp(l, r))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            }),
        (Value::Object(x), Value::Object(y)) => object_cmp(x, y),
        _ => Ordering::Equal,
    }
}

fn object_cmp(x: &Map<String, Value>, y: &Map<String, Value>) -> Ordering {
    x.len().cmp(&y.len()).then_with(|| {
        let mut xs: Vec<_> = x.iter().collect();
        let mut ys: Vec<_> = y.iter().collect();
        xs.sort_by(|l, r| l.0.cmp(r.0));
        ys.sort_by(|l, r| l.0.cmp(r.0));
        xs.into_iter()
            .zip(ys)
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| json_cmp(lv, rv)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    })
}

/// Equality used by `eq`/`in`: numbers compare numerically, everything else structurally
pub fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => json_cmp(a, b) == Ordering::Equal,
        _ => a == b,
    }
}

/// Human-readable rendering for filter pickers
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escaped_keys_round_trip_through_paths() {
        assert_eq!(split_path("a.b"), vec!["a", "b"]);
        assert_eq!(split_path(r"a\.b.c"), vec!["a.b", "c"]);
        assert_eq!(split_path(r"x\\y"), vec![r"x\y"]);

        let segments = vec!["a.b".to_string(), r"c\d".to_string(), "$e".to_string()];
        let path = join_path(&segments);
        assert_eq!(path, r"a\.b.c\\d.$e");
        assert_eq!(split_path(&path), segments);
        assert_eq!(escape_segment("$id"), r"\$id");
        assert_eq!(escape_segment("plain"), "plain");
    }

    #[test]
    fn get_path_walks_objects_only() {
        let doc = json!({"a": {"b": {"c": 1}}, "list": [{"x": 1}]});
        assert_eq!(get_path(&doc, &split_path("a.b.c")), Some(&json!(1)));
        assert_eq!(get_path(&doc, &split_path("a.b")), Some(&json!({"c": 1})));
        assert_eq!(get_path(&doc, &split_path("list.x")), None);
        assert_eq!(get_path(&doc, &split_path("missing")), None);
    }

    #[test]
    fn deep_merge_merges_nested_objects_and_overwrites_arrays() {
        let mut target = json!({"a": {"b": 1, "c": 2}, "tags": [1, 2], "keep": true});
        deep_merge(&mut target, &json!({"a": {"c": 3, "d": 4}, "tags": [9]}));
        assert_eq!(target, json!({"a": {"b": 1, "c": 3, "d": 4}, "tags": [9], "keep": true}));
    }

    #[test]
    fn json_ordering_follows_type_rank() {
        let mut values = vec![json!({"a": 1}), json!(true), json!(2), json!("b"), json!(null), json!([1]), json!(1.5), json!("a")];
        values.sort_by(json_cmp);
        assert_eq!(values, vec![json!(null), json!("a"), json!("b"), json!(1.5), json!(2), json!(true), json!([1]), json!({"a": 1})]);
    }

    #[test]
    fn numbers_compare_numerically() {
        assert!(json_eq(&json!(3), &json!(3.0)));
        assert!(!json_eq(&json!(3), &json!("3")));
    }
}
