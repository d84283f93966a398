use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::infer::FieldType;
use crate::filter::error::FilterError;
use crate::models::TenantScope;
use crate::types::Tag;

/// Leaf operators of the filter DSL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    In,
    NotIn,
    Between,
    Exists,
}

impl FilterOp {
    pub fn parse(field: &str, op: &str) -> Result<Self, FilterError> {
        Ok(match op {
            "eq" => FilterOp::Eq,
            "neq" => FilterOp::Neq,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "like" => FilterOp::Like,
            "in" => FilterOp::In,
            "not_in" => FilterOp::NotIn,
            "between" => FilterOp::Between,
            "exists" => FilterOp::Exists,
            other => {
                return Err(FilterError::UnsupportedOperator {
                    field: field.to_string(),
                    op: other.to_string(),
                })
            }
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Like => "like",
            FilterOp::In => "in",
            FilterOp::NotIn => "not_in",
            FilterOp::Between => "between",
            FilterOp::Exists => "exists",
        }
    }

    /// Ordering operators only make sense on numbers (dates are stored as numbers)
    pub fn is_ordering(&self) -> bool {
        matches!(self, FilterOp::Gt | FilterOp::Gte | FilterOp::Lt | FilterOp::Lte | FilterOp::Between)
    }

    /// Whether the operator may be applied to a field of the given type.
    /// `null` and `undefined` carry no information and admit everything.
    pub fn applies_to(&self, field_type: FieldType) -> bool {
        match field_type {
            FieldType::Null | FieldType::Undefined => true,
            FieldType::Number => !matches!(self, FilterOp::Like),
            FieldType::String => !self.is_ordering(),
            FieldType::Boolean => !self.is_ordering() && !matches!(self, FilterOp::Like),
        }
    }
}

/// A single `{ field, op, value }` leaf as received on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterLeaf {
    pub field: String,
    pub op: String,
    #[serde(default)]
    pub value: Value,
}

impl FilterLeaf {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self { field: field.into(), op: op.as_str().to_string(), value }
    }
}

/// Filter DSL: `{ and: [...] } | { or: [...] } | leaf`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterExpr {
    And { and: Vec<FilterExpr> },
    Or { or: Vec<FilterExpr> },
    Leaf(FilterLeaf),
}

impl FilterExpr {
    pub fn leaf(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        FilterExpr::Leaf(FilterLeaf::new(field, op, value))
    }

    pub fn and(items: Vec<FilterExpr>) -> Self {
        FilterExpr::And { and: items }
    }

    pub fn or(items: Vec<FilterExpr>) -> Self {
        FilterExpr::Or { or: items }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub fn to_sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Caller-requested sort on a data path or `$`-prefixed system field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self { field: field.into(), direction }
    }
}

/// Top-level columns addressable with a `$` prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemField {
    Id,
    CreatedAt,
    UpdatedAt,
    CreatedBy,
    CreatedByType,
    UpdatedBy,
    UpdatedByType,
}

impl SystemField {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "$id" => SystemField::Id,
            "$createdAt" => SystemField::CreatedAt,
            "$updatedAt" => SystemField::UpdatedAt,
            "$createdBy" => SystemField::CreatedBy,
            "$createdByType" => SystemField::CreatedByType,
            "$updatedBy" => SystemField::UpdatedBy,
            "$updatedByType" => SystemField::UpdatedByType,
            _ => return None,
        })
    }

    pub fn column(&self) -> &'static str {
        match self {
            SystemField::Id => "id",
            SystemField::CreatedAt => "created_at",
            SystemField::UpdatedAt => "updated_at",
            SystemField::CreatedBy => "created_by",
            SystemField::CreatedByType => "created_by_type",
            SystemField::UpdatedBy => "updated_by",
            SystemField::UpdatedByType => "updated_by_type",
        }
    }

    /// Timestamps are exposed as date-as-number (epoch milliseconds)
    pub fn field_type(&self) -> FieldType {
        match self {
            SystemField::CreatedAt | SystemField::UpdatedAt => FieldType::Number,
            _ => FieldType::String,
        }
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, SystemField::CreatedAt | SystemField::UpdatedAt)
    }
}

/// A resolved field reference
#[derive(Debug, Clone, PartialEq)]
pub enum FieldRef {
    /// Path segments inside `data`
    Data(Vec<String>),
    System(SystemField),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    None,
    One(Value),
    Many(Vec<Value>),
    Range(Value, Value),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Field name exactly as written by the caller (for error reporting)
    pub name: String,
    pub field: FieldRef,
    pub op: FilterOp,
    pub operand: Operand,
}

/// Backend-neutral predicate every storage adapter translates
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    All,
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Condition(Condition),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: FieldRef,
    pub direction: SortDirection,
}

/// A query bound to a `(tenantScope, tag)` pair, ready for a backend
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub scope: TenantScope,
    pub tag: Tag,
    pub predicate: Predicate,
    pub include_deleted: bool,
    /// Always ends with the `createdAt ASC, id ASC` tie-break
    pub sort: Vec<SortKey>,
    pub like_case_insensitive: bool,
}

impl CompiledQuery {
    /// Match every live object in the scope
    pub fn all(scope: TenantScope, tag: Tag) -> Self {
        Self {
            scope,
            tag,
            predicate: Predicate::All,
            include_deleted: false,
            sort: crate::filter::filter_order::FilterOrder::tie_break(),
            like_case_insensitive: true,
        }
    }
}
