//! Predicate evaluation over in-process documents.
//!
//! Mirrors the SQL translation in `database::sql_where` operator for
//! operator: `neq`/`not_in` require the field to be present, array fields
//! match `eq`/`in` by membership, ordering and `like` look at scalars only,
//! and missing values sort last in both directions.

use serde_json::Value;
use std::cmp::Ordering;

use crate::filter::{CompiledQuery, Condition, FieldRef, FilterOp, Operand, Predicate, SortDirection, SortKey, SystemField};
use crate::models::value::{get_path, json_cmp, json_eq};
use crate::models::Obj;

/// Scope, tag, tombstone and predicate check for one object
pub fn matches(query: &CompiledQuery, obj: &Obj) -> bool {
    obj.tag == query.tag
        && query.scope.contains(obj)
        && (query.include_deleted || !obj.is_deleted())
        && eval(&query.predicate, obj, query.like_case_insensitive)
}

pub fn eval(predicate: &Predicate, obj: &Obj, like_ci: bool) -> bool {
    match predicate {
        Predicate::All => true,
        Predicate::And(parts) => parts.iter().all(|p| eval(p, obj, like_ci)),
        Predicate::Or(parts) => parts.iter().any(|p| eval(p, obj, like_ci)),
        Predicate::Condition(condition) => eval_condition(condition, obj, like_ci),
    }
}

/// Resolve a field reference; timestamps surface as epoch milliseconds
pub fn resolve(field: &FieldRef, obj: &Obj) -> Option<Value> {
    match field {
        FieldRef::Data(path) => get_path(&obj.data, path).cloned(),
        FieldRef::System(system) => Some(match system {
            SystemField::Id => Value::String(obj.id.clone()),
            SystemField::CreatedAt => Value::from(obj.created_at.timestamp_millis()),
            SystemField::UpdatedAt => Value::from(obj.updated_at.timestamp_millis()),
            SystemField::CreatedBy => Value::String(obj.created_by.clone()),
            SystemField::CreatedByType => Value::String(obj.created_by_type.as_str().to_string()),
            SystemField::UpdatedBy => Value::String(obj.updated_by.clone()),
            SystemField::UpdatedByType => Value::String(obj.updated_by_type.as_str().to_string()),
        }),
    }
}

fn eval_condition(condition: &Condition, obj: &Obj, like_ci: bool) -> bool {
    let actual = match resolve(&condition.field, obj) {
        Some(actual) => actual,
        None => return false,
    };

    match (&condition.op, &condition.operand) {
        (FilterOp::Exists, _) => true,
        (FilterOp::Eq, Operand::One(expected)) => eq_match(&actual, expected),
        (FilterOp::Neq, Operand::One(expected)) => !eq_match(&actual, expected),
        (FilterOp::In, Operand::Many(values)) => values.iter().any(|v| eq_match(&actual, v)),
        (FilterOp::NotIn, Operand::Many(values)) => !values.iter().any(|v| eq_match(&actual, v)),
        (FilterOp::Gt, Operand::One(v)) => number_cmp(&actual, v).map_or(false, |o| o == Ordering::Greater),
        (FilterOp::Gte, Operand::One(v)) => number_cmp(&actual, v).map_or(false, |o| o != Ordering::Less),
        (FilterOp::Lt, Operand::One(v)) => number_cmp(&actual, v).map_or(false, |o| o == Ordering::Less),
        (FilterOp::Lte, Operand::One(v)) => number_cmp(&actual, v).map_or(false, |o| o != Ordering::Greater),
        (FilterOp::Between, Operand::Range(low, high)) => {
            number_cmp(&actual, low).map_or(false, |o| o != Ordering::Less)
                && number_cmp(&actual, high).map_or(false, |o| o != Ordering::Greater)
        }
        (FilterOp::Like, Operand::One(Value::String(pattern))) => match &actual {
            Value::String(s) => like_match(s, pattern, like_ci),
            _ => false,
        },
        _ => false,
    }
}

/// Scalars match arrays by membership; arrays and objects compare whole
fn eq_match(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Array(items), e) if !e.is_array() && !e.is_object() => {
            items.iter().any(|item| json_eq(item, e))
        }
        (Value::Object(_), e) if !e.is_array() && !e.is_object() => false,
        (a, e) => json_eq(a, e),
    }
}

fn number_cmp(actual: &Value, expected: &Value) -> Option<Ordering> {
    let a = actual.as_f64()?;
    let e = expected.as_f64()?;
    if !actual.is_number() {
        return None;
    }
    a.partial_cmp(&e)
}

/// Split a `like` pattern into literal segments. A pattern containing `%`
/// uses it as the wildcard; anything else is a substring match.
pub fn like_segments(pattern: &str) -> Vec<&str> {
    if pattern.contains('%') {
        pattern.split('%').collect()
    } else {
        vec!["", pattern, ""]
    }
}

pub fn like_match(value: &str, pattern: &str, case_insensitive: bool) -> bool {
    let (value, pattern) = if case_insensitive {
        (value.to_lowercase(), pattern.to_lowercase())
    } else {
        (value.to_string(), pattern.to_string())
    };
    let segments = like_segments(&pattern);
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return value.is_empty(),
    };
    if !value.starts_with(first) {
        return false;
    }
    let mut remaining = &value[first.len()..];
    let last_index = rest.len();
    for (i, segment) in rest.iter().enumerate() {
        if i + 1 == last_index {
            return remaining.ends_with(segment);
        }
        match remaining.find(segment) {
            Some(pos) => remaining = &remaining[pos + segment.len()..],
            None => return false,
        }
    }
    // No wildcard at all: the whole value must equal the pattern
    remaining.is_empty()
}

/// Compare two objects under a resolved sort. Missing values sort last.
pub fn compare_objs(a: &Obj, b: &Obj, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ordering = match (resolve(&key.field, a), resolve(&key.field, b)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(x), Some(y)) => match key.direction {
                SortDirection::Asc => json_cmp(&x, &y),
                SortDirection::Desc => json_cmp(&y, &x),
            },
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Filter, FilterExpr, FilterOptions, SortSpec};
    use crate::filter::coerce::FieldTypes;
    use crate::models::{now, Actor, ObjInput, TenantScope};
    use crate::types::Tag;
    use serde_json::json;

    fn obj(data: Value) -> Obj {
        Obj::create(&TenantScope::app("a"), Tag::Log, ObjInput::new(data), vec![], &Actor::user("u"), now())
    }

    fn query(expr: Value) -> CompiledQuery {
        let expr: FilterExpr = serde_json::from_value(expr).unwrap();
        let mut filter = Filter::new(TenantScope::app("a"), Tag::Log, FilterOptions::default()).unwrap();
        filter.where_clause(Some(expr));
        filter.prepare().unwrap().compile(&FieldTypes::new()).unwrap()
    }

    #[test]
    fn eq_neq_and_missing_fields() {
        let doc = obj(json!({"level": "info", "tags": ["a", "b"]}));
        assert!(matches(&query(json!({"field": "level", "op": "eq", "value": "info"})), &doc));
        assert!(matches(&query(json!({"field": "tags", "op": "eq", "value": "b"})), &doc));
        assert!(!matches(&query(json!({"field": "level", "op": "neq", "value": "info"})), &doc));
        // Missing fields never match anything but a failed exists
        assert!(!matches(&query(json!({"field": "nope", "op": "neq", "value": "x"})), &doc));
        assert!(!matches(&query(json!({"field": "nope", "op": "not_in", "value": ["x"]})), &doc));
        assert!(!matches(&query(json!({"field": "nope", "op": "exists"})), &doc));
    }

    #[test]
    fn ordering_only_on_numbers() {
        let doc = obj(json!({"count": 3, "name": "5"}));
        assert!(matches(&query(json!({"field": "count", "op": "between", "value": [3, 4]})), &doc));
        assert!(matches(&query(json!({"field": "count", "op": "gt", "value": 2.5})), &doc));
        assert!(!matches(&query(json!({"field": "name", "op": "gt", "value": 1})), &doc));
    }

    #[test]
    fn and_or_composition() {
        let doc = obj(json!({"level": "warn", "count": 1}));
        let q = query(json!({"or": [
            {"field": "level", "op": "eq", "value": "info"},
            {"and": [
                {"field": "level", "op": "in", "value": ["warn", "error"]},
                {"field": "count", "op": "lte", "value": 1}
            ]}
        ]}));
        assert!(matches(&q, &doc));
        assert!(!matches(&query(json!({"or": []})), &doc));
    }

    #[test]
    fn like_patterns() {
        assert!(like_match("Hello World", "lo wo", true));
        assert!(!like_match("Hello World", "lo wo", false));
        assert!(like_match("error: disk full", "error:%full", true));
        assert!(!like_match("warning: disk full", "error:%", true));
        assert!(like_match("a_b", "a_b", false));
        assert!(like_match("abc", "%", false));
    }

    #[test]
    fn sort_missing_last() {
        let a = obj(json!({"n": 2}));
        let b = obj(json!({}));
        let c = obj(json!({"n": 1}));
        let sort = crate::filter::filter_order::FilterOrder::resolve(&[SortSpec::new("n", SortDirection::Desc)]).unwrap();
        let mut objs = vec![b.clone(), c.clone(), a.clone()];
        objs.sort_by(|x, y| compare_objs(x, y, &sort));
        assert_eq!(objs.iter().map(|o| o.id.clone()).collect::<Vec<_>>(), vec![a.id, c.id, b.id]);
    }
}
