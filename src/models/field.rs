use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::infer::{infer_type, FieldType};
use crate::models::value::display_value;
use crate::types::Tag;

/// One discovered `(scope, tag, path, type)` entry in the field catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldCatalogEntry {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub tag: Tag,
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A distinct observed value for a field path: typed for programs, stringified for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value: Value,
    pub display: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        Self {
            display: display_value(&value),
            field_type: infer_type(&value),
            value,
        }
    }
}
