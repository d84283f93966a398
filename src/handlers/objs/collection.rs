use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    Json,
};
use std::sync::Arc;

use crate::middleware::{ApiResponse, ApiResult};
use crate::models::Obj;
use crate::pagination::Page;
use crate::services::{
    DeleteManyRequest, DeleteResult, GetManyRequest, ObjService, SetManyRequest, UpdateManyRequest, UpdateResult,
};

use super::utils::{parse_tag, Scoped};

/// POST /objs/:tag/set - insert objects, resolving unique-field conflicts per `onConflict`
pub async fn set(
    Path(tag): Path<String>,
    Extension(service): Extension<Arc<ObjService>>,
    payload: Result<Json<Scoped<SetManyRequest>>, JsonRejection>,
) -> ApiResult<Vec<Obj>> {
    let tag = parse_tag(&tag)?;
    let (scope, request) = payload?.0.into_parts();
    let objs = service.set_many_objs(&scope, tag, request).await?;
    Ok(ApiResponse::success(objs))
}

/// POST /objs/:tag/update - update every object the query matches, capped by `count`
pub async fn update(
    Path(tag): Path<String>,
    Extension(service): Extension<Arc<ObjService>>,
    payload: Result<Json<Scoped<UpdateManyRequest>>, JsonRejection>,
) -> ApiResult<UpdateResult> {
    let tag = parse_tag(&tag)?;
    let (scope, request) = payload?.0.into_parts();
    let result = service.update_many_objs(&scope, tag, request).await?;
    Ok(ApiResponse::success(result))
}

/// POST /objs/:tag/delete - soft or hard delete; one object unless `deleteMany`
pub async fn delete(
    Path(tag): Path<String>,
    Extension(service): Extension<Arc<ObjService>>,
    payload: Result<Json<Scoped<DeleteManyRequest>>, JsonRejection>,
) -> ApiResult<DeleteResult> {
    let tag = parse_tag(&tag)?;
    let (scope, request) = payload?.0.into_parts();
    let result = service.delete_many_objs(&scope, tag, request).await?;
    Ok(ApiResponse::success(result))
}

/// POST /objs/:tag/get - filtered, sorted, paginated read
pub async fn get(
    Path(tag): Path<String>,
    Extension(service): Extension<Arc<ObjService>>,
    payload: Result<Json<Scoped<GetManyRequest>>, JsonRejection>,
) -> ApiResult<Page<Obj>> {
    let tag = parse_tag(&tag)?;
    let (scope, request) = payload?.0.into_parts();
    let page = service.get_many_objs(&scope, tag, request).await?;
    Ok(ApiResponse::success(page))
}
