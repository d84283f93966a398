//! Catalog-aware checks: reject operators the catalogued type excludes and
//! coerce comparison values to the field's inferred type.
//!
//! The catalog is advisory. Unknown paths pass through untouched.

use serde_json::{Number, Value};
use std::collections::{BTreeSet, HashMap};

use super::error::FilterError;
use super::types::{Condition, FieldRef, FilterOp, Operand, Predicate};
use crate::catalog::infer::FieldType;
use crate::models::value::join_path;

/// Observed types per data path, as reported by the field catalog
pub type FieldTypes = HashMap<String, BTreeSet<FieldType>>;

pub fn check_predicate(predicate: &mut Predicate, types: &FieldTypes) -> Result<(), FilterError> {
    match predicate {
        Predicate::All => Ok(()),
        Predicate::And(parts) | Predicate::Or(parts) => {
            parts.iter_mut().try_for_each(|p| check_predicate(p, types))
        }
        Predicate::Condition(condition) => check_condition(condition, types),
    }
}

fn check_condition(condition: &mut Condition, types: &FieldTypes) -> Result<(), FilterError> {
    let path = match &condition.field {
        FieldRef::Data(segments) => join_path(segments),
        FieldRef::System(_) => return Ok(()),
    };
    let observed = match types.get(&path) {
        Some(observed) if !observed.is_empty() => observed,
        _ => return Ok(()),
    };

    if !observed.iter().any(|t| condition.op.applies_to(*t)) {
        return Err(FilterError::OperatorTypeMismatch {
            field: condition.name.clone(),
            op: condition.op.as_str().to_string(),
            types: observed.iter().map(|t| t.as_str()).collect::<Vec<_>>().join("|"),
        });
    }

    if !matches!(condition.op, FilterOp::Eq | FilterOp::Neq | FilterOp::In | FilterOp::NotIn) {
        return Ok(());
    }
    let target = match single_concrete_type(observed) {
        Some(target) => target,
        None => return Ok(()),
    };
    condition.operand = match &condition.operand {
        Operand::One(v) => Operand::One(coerce_value(v, target)),
        Operand::Many(vs) => Operand::Many(vs.iter().map(|v| coerce_value(v, target)).collect()),
        other => other.clone(),
    };
    Ok(())
}

/// The one concrete scalar type observed for a path, ignoring null/undefined
fn single_concrete_type(observed: &BTreeSet<FieldType>) -> Option<FieldType> {
    let mut concrete = observed
        .iter()
        .copied()
        .filter(|t| matches!(t, FieldType::String | FieldType::Number | FieldType::Boolean));
    let first = concrete.next()?;
    match concrete.next() {
        Some(_) => None,
        None => Some(first),
    }
}

/// Coerce a comparison value; values that cannot be coerced are left as-is
/// and simply fail to match.
pub fn coerce_value(value: &Value, target: FieldType) -> Value {
    match (target, value) {
        (FieldType::Number, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(Number::from_f64).map(Value::Number))
            .unwrap_or_else(|| value.clone()),
        (FieldType::Number, Value::Bool(b)) => Value::from(if *b { 1 } else { 0 }),
        (FieldType::String, Value::Number(n)) => Value::String(n.to_string()),
        (FieldType::String, Value::Bool(b)) => Value::String(b.to_string()),
        (FieldType::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => value.clone(),
        },
        _ => value.clone(),
    }
}
