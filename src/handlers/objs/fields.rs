use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

use crate::catalog::{FieldPage, FieldValuePage};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::ObjService;

use super::utils::{parse_tag, Scoped};

#[derive(Debug, Default, Deserialize)]
pub struct FieldsRequest {
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FieldValuesRequest {
    pub field: String,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

/// POST /objs/:tag/fields - catalogued field paths and types
pub async fn list(
    Path(tag): Path<String>,
    Extension(service): Extension<Arc<ObjService>>,
    payload: Result<Json<Scoped<FieldsRequest>>, JsonRejection>,
) -> ApiResult<FieldPage> {
    let tag = parse_tag(&tag)?;
    let (scope, request) = payload?.0.into_parts();
    let page = service.get_obj_fields(&scope, tag, request.page, request.limit).await?;
    Ok(ApiResponse::success(page))
}

/// POST /objs/:tag/fields/values - distinct observed values of one field
pub async fn values(
    Path(tag): Path<String>,
    Extension(service): Extension<Arc<ObjService>>,
    payload: Result<Json<Scoped<FieldValuesRequest>>, JsonRejection>,
) -> ApiResult<FieldValuePage> {
    let tag = parse_tag(&tag)?;
    let (scope, request) = payload?.0.into_parts();
    let page = service
        .get_obj_field_values(&scope, tag, &request.field, request.page, request.limit)
        .await?;
    Ok(ApiResponse::success(page))
}
