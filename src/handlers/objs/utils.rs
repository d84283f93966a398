use serde::Deserialize;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::models::TenantScope;
use crate::types::Tag;

/// Request body carrying its tenant scope next to the operation's own fields
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scoped<T> {
    pub app_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Scoped<T> {
    pub fn into_parts(self) -> (TenantScope, T) {
        (TenantScope { app_id: self.app_id, group_id: self.group_id }, self.body)
    }
}

/// Tags form a closed set; anything else is a client error
pub fn parse_tag(tag: &str) -> Result<Tag, ApiError> {
    tag.parse::<Tag>().map_err(|message| {
        let mut field_errors = HashMap::new();
        field_errors.insert("tag".to_string(), message.clone());
        ApiError::validation_error(message, Some(field_errors))
    })
}
