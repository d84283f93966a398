use chrono::DateTime;
use serde_json::{Number, Value};
use std::collections::BTreeSet;

use super::error::FilterError;
use super::types::{Condition, FieldRef, FilterExpr, FilterLeaf, FilterOp, Operand, Predicate, SystemField};
use crate::models::value::{display_value, join_path, split_path};

/// Structural compilation of the filter DSL: operator names, arity, value
/// shapes and system-field types. Runs before any I/O.
pub struct FilterWhere {
    max_depth: usize,
    data_paths: BTreeSet<String>,
}

impl FilterWhere {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth, data_paths: BTreeSet::new() }
    }

    /// Compile an optional expression. Returns the predicate and every data path it references.
    pub fn generate(
        expr: Option<&FilterExpr>,
        max_depth: usize,
    ) -> Result<(Predicate, BTreeSet<String>), FilterError> {
        let mut filter_where = Self::new(max_depth);
        let predicate = match expr {
            Some(expr) => filter_where.build(expr, 1)?,
            None => Predicate::All,
        };
        Ok((predicate, filter_where.data_paths))
    }

    fn build(&mut self, expr: &FilterExpr, depth: usize) -> Result<Predicate, FilterError> {
        if depth > self.max_depth {
            return Err(FilterError::NestingTooDeep { depth, max_depth: self.max_depth });
        }
        match expr {
            FilterExpr::And { and } => {
                if and.is_empty() {
                    return Ok(Predicate::All);
                }
                let parts = and
                    .iter()
                    .map(|child| self.build(child, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::And(parts))
            }
            FilterExpr::Or { or } => {
                let parts = or
                    .iter()
                    .map(|child| self.build(child, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Predicate::Or(parts))
            }
            FilterExpr::Leaf(leaf) => self.build_leaf(leaf).map(Predicate::Condition),
        }
    }

    fn build_leaf(&mut self, leaf: &FilterLeaf) -> Result<Condition, FilterError> {
        let field = Self::parse_field(&leaf.field)?;
        let op = FilterOp::parse(&leaf.field, &leaf.op)?;
        let operand = Self::parse_operand(&leaf.field, op, &leaf.value)?;

        let mut condition = Condition { name: leaf.field.clone(), field, op, operand };
        match &condition.field {
            FieldRef::System(system) => {
                let system = *system;
                if !op.applies_to(system.field_type()) {
                    return Err(FilterError::OperatorTypeMismatch {
                        field: leaf.field.clone(),
                        op: op.as_str().to_string(),
                        types: system.field_type().to_string(),
                    });
                }
                if system.is_timestamp() {
                    Self::timestamps_to_millis(&mut condition)?;
                } else {
                    Self::operands_to_text(&mut condition);
                }
            }
            FieldRef::Data(segments) => {
                self.data_paths.insert(join_path(segments));
            }
        }
        Ok(condition)
    }

    /// Resolve `$system` names and validate dotted data paths
    pub fn parse_field(name: &str) -> Result<FieldRef, FilterError> {
        if name.is_empty() {
            return Err(FilterError::InvalidField("Field name cannot be empty".to_string()));
        }
        if name.starts_with('$') {
            return SystemField::parse(name)
                .map(FieldRef::System)
                .ok_or_else(|| FilterError::InvalidField(name.to_string()));
        }
        let segments = split_path(name);
        if segments.iter().any(|s| s.is_empty()) {
            return Err(FilterError::InvalidField(name.to_string()));
        }
        Ok(FieldRef::Data(segments))
    }

    fn parse_operand(field: &str, op: FilterOp, value: &Value) -> Result<Operand, FilterError> {
        let invalid = |message: &str| FilterError::InvalidOperatorData {
            field: field.to_string(),
            message: message.to_string(),
        };

        match op {
            FilterOp::Exists => {
                if !value.is_null() {
                    return Err(invalid("exists takes no value"));
                }
                Ok(Operand::None)
            }
            FilterOp::In | FilterOp::NotIn => {
                let values = match value {
                    Value::Array(values) => values.clone(),
                    Value::Null => vec![],
                    scalar => vec![scalar.clone()],
                };
                if values.is_empty() {
                    return Err(invalid(&format!("{} requires at least one value", op.as_str())));
                }
                Ok(Operand::Many(values))
            }
            FilterOp::Between => match value {
                Value::Array(values) if values.len() == 2 => {
                    let low = Self::ordering_value(field, &values[0])?;
                    let high = Self::ordering_value(field, &values[1])?;
                    Ok(Operand::Range(low, high))
                }
                Value::Array(values) => Err(invalid(&format!(
                    "between requires exactly 2 values, got {}",
                    values.len()
                ))),
                _ => Err(invalid("between requires an array with 2 values")),
            },
            FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte => {
                Ok(Operand::One(Self::ordering_value(field, value)?))
            }
            FilterOp::Like => match value {
                Value::String(_) => Ok(Operand::One(value.clone())),
                _ => Err(invalid("like requires a string pattern")),
            },
            FilterOp::Eq | FilterOp::Neq => Ok(Operand::One(value.clone())),
        }
    }

    /// Ordering operands are numbers. Numeric strings and RFC 3339 dates are
    /// converted (dates to epoch milliseconds).
    fn ordering_value(field: &str, value: &Value) -> Result<Value, FilterError> {
        let invalid = || FilterError::InvalidOperatorData {
            field: field.to_string(),
            message: format!("expected a number or date, got {}", value),
        };
        match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => {
                if let Ok(n) = s.trim().parse::<f64>() {
                    return Number::from_f64(n).map(Value::Number).ok_or_else(invalid);
                }
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| Value::from(dt.timestamp_millis()))
                    .map_err(|_| invalid())
            }
            _ => Err(invalid()),
        }
    }

    /// System timestamps accept epoch milliseconds or RFC 3339 for every operator
    fn timestamps_to_millis(condition: &mut Condition) -> Result<(), FilterError> {
        let name = condition.name.clone();
        let convert = |v: &Value| Self::ordering_value(&name, v);
        condition.operand = match &condition.operand {
            Operand::None => Operand::None,
            Operand::One(v) => Operand::One(convert(v)?),
            Operand::Many(vs) => Operand::Many(vs.iter().map(convert).collect::<Result<_, _>>()?),
            Operand::Range(low, high) => Operand::Range(convert(low)?, convert(high)?),
        };
        Ok(())
    }

    /// Text columns compare against the display form of the operand
    fn operands_to_text(condition: &mut Condition) {
        let text = |v: &Value| match v {
            Value::String(_) => v.clone(),
            other => Value::String(display_value(other)),
        };
        condition.operand = match &condition.operand {
            Operand::None => Operand::None,
            Operand::One(v) => Operand::One(text(v)),
            Operand::Many(vs) => Operand::Many(vs.iter().map(text).collect()),
            Operand::Range(low, high) => Operand::Range(text(low), text(high)),
        };
    }
}
