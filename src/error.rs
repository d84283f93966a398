// HTTP API error types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::storage::StoreError;

/// HTTP API error with a status code and a client-facing message
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict {
        message: String,
        fields: Vec<String>,
    },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable (storage, safe to retry)
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ValidationError { .. } | ApiError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict { message, .. } => message,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "success": false,
            "error": self.message(),
            "code": self.error_code()
        });
        match self {
            ApiError::ValidationError { field_errors: Some(field_errors), .. } if !field_errors.is_empty() => {
                response["field_errors"] = json!(field_errors);
            }
            ApiError::Conflict { fields, .. } => {
                response["fields"] = json!(fields);
            }
            _ => {}
        }
        response
    }

    pub fn validation_error(message: impl Into<String>, field_errors: Option<HashMap<String, String>>) -> Self {
        ApiError::ValidationError { message: message.into(), field_errors }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation { message, field_errors } => ApiError::ValidationError {
                message,
                field_errors: Some(field_errors),
            },
            StoreError::Conflict { message, fields, .. } => ApiError::Conflict { message, fields },
            StoreError::NotFound(message) => ApiError::NotFound(message),
            StoreError::Storage { message } => {
                // Don't expose backend details to clients
                tracing::error!("Storage error: {}", message);
                ApiError::service_unavailable("Storage temporarily unavailable, please retry")
            }
        }
    }
}

impl From<axum::extract::rejection::JsonRejection> for ApiError {
    fn from(rejection: axum::extract::rejection::JsonRejection) -> Self {
        ApiError::invalid_json(rejection.body_text())
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status_code(), Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tag;

    #[test]
    fn store_errors_map_to_status_codes() {
        let cases = vec![
            (StoreError::validation("bad"), StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            (StoreError::conflict(Tag::Group, &["name".to_string()], "[\"Dup\"]"), StatusCode::CONFLICT, "CONFLICT"),
            (StoreError::not_found("gone"), StatusCode::NOT_FOUND, "NOT_FOUND"),
            (StoreError::storage("down"), StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        ];
        for (err, status, code) in cases {
            let api: ApiError = err.into();
            assert_eq!(api.status_code(), status);
            assert_eq!(api.error_code(), code);
        }
    }

    #[test]
    fn conflict_body_names_the_fields() {
        let api: ApiError = StoreError::conflict(Tag::Group, &["name".to_string()], "[\"Dup\"]").into();
        let body = api.to_json();
        assert_eq!(body["fields"], json!(["name"]));
        assert_eq!(body["success"], json!(false));
    }

    #[test]
    fn storage_errors_hide_backend_detail() {
        let api: ApiError = StoreError::storage("connection refused to db-7:5432").into();
        let body = api.to_json();
        assert_eq!(body["code"], json!("SERVICE_UNAVAILABLE"));
        assert!(!body.to_string().contains("db-7"));
    }

    #[test]
    fn field_errors_are_included() {
        let api: ApiError = StoreError::field_validation("n", "between requires exactly 2 values").into();
        assert_eq!(api.to_json()["field_errors"]["n"], json!("between requires exactly 2 values"));
    }
}
