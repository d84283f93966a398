use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid tenant scope: {0}")]
    InvalidScope(String),

    #[error("Invalid field name: {0}")]
    InvalidField(String),

    #[error("Unsupported operator '{op}' on field '{field}'")]
    UnsupportedOperator { field: String, op: String },

    #[error("Invalid operator data for field '{field}': {message}")]
    InvalidOperatorData { field: String, message: String },

    #[error("Operator '{op}' cannot be applied to field '{field}' of type {types}")]
    OperatorTypeMismatch { field: String, op: String, types: String },

    #[error("Filter nesting depth {depth} exceeds maximum {max_depth}")]
    NestingTooDeep { depth: usize, max_depth: usize },

    #[error("Invalid sort: {0}")]
    InvalidSort(String),
}

impl FilterError {
    /// Field the error is attributed to, when it is a field-level error
    pub fn field(&self) -> Option<&str> {
        match self {
            FilterError::InvalidField(field) => Some(field),
            FilterError::UnsupportedOperator { field, .. }
            | FilterError::InvalidOperatorData { field, .. }
            | FilterError::OperatorTypeMismatch { field, .. } => Some(field),
            _ => None,
        }
    }
}
