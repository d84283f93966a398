use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

use crate::database::DatabaseError;
use crate::filter::FilterError;
use crate::types::Tag;

/// Engine-wide error taxonomy
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// Malformed query, operator arity, unknown enum. Always a client error.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field_errors: HashMap<String, String>,
    },

    /// Unique-field collision among live objects
    #[error("Conflict: {message}")]
    Conflict {
        tag: Tag,
        fields: Vec<String>,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend I/O failure; safe for the caller to retry. Every backend call
    /// is all-or-nothing, so nothing was applied.
    #[error("Storage error: {message}")]
    Storage { message: String },
}

impl StoreError {
    pub fn validation(message: impl Into<String>) -> Self {
        StoreError::Validation { message: message.into(), field_errors: HashMap::new() }
    }

    pub fn field_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut field_errors = HashMap::new();
        field_errors.insert(field.into(), message.clone());
        StoreError::Validation { message, field_errors }
    }

    /// `key` is a canonical uniqueness key as built by `models::obj::unique_key`
    pub fn conflict(tag: Tag, fields: &[String], key: &str) -> Self {
        StoreError::Conflict {
            tag,
            fields: fields.to_vec(),
            message: format!("{} with {} already exists", tag, describe_key(key)),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        StoreError::NotFound(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        StoreError::Storage { message: message.into() }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Storage { .. })
    }
}

impl From<FilterError> for StoreError {
    fn from(err: FilterError) -> Self {
        match err.field() {
            Some(field) => StoreError::field_validation(field.to_string(), err.to_string()),
            None => StoreError::validation(err.to_string()),
        }
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        tracing::error!("Database error: {}", err);
        StoreError::storage(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::from(err).into()
    }
}

/// Render `[[field, value], ...]` as `field = value, ...`
fn describe_key(key: &str) -> String {
    let pairs = match serde_json::from_str::<Value>(key) {
        Ok(Value::Array(pairs)) => pairs,
        _ => return key.to_string(),
    };
    let parts: Option<Vec<String>> = pairs
        .iter()
        .map(|pair| match pair.as_array().map(Vec::as_slice) {
            Some([Value::String(field), value]) => Some(format!("{} = {}", field, value)),
            _ => None,
        })
        .collect();
    parts.map(|parts| parts.join(", ")).unwrap_or_else(|| key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_errors_become_field_level_validation() {
        let err: StoreError = FilterError::InvalidOperatorData {
            field: "n".to_string(),
            message: "between requires exactly 2 values, got 3".to_string(),
        }
        .into();
        match err {
            StoreError::Validation { field_errors, .. } => assert!(field_errors.contains_key("n")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn conflict_names_the_fields() {
        let err = StoreError::conflict(Tag::Group, &["name".to_string()], r#"[["name","Dup"]]"#);
        assert_eq!(err.to_string(), r#"Conflict: group with name = "Dup" already exists"#);
        let pair = StoreError::conflict(Tag::Member, &[], r#"[["a",1],["b",null]]"#);
        assert_eq!(pair.to_string(), "Conflict: member with a = 1, b = null already exists");
        assert!(!err.is_retryable());
        assert!(StoreError::storage("boom").is_retryable());
    }
}
