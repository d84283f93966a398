use axum::{extract::Extension, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::middleware::{ApiResponse, ApiResult};
use crate::services::{HealthStatus, ObjService};

/// GET / - service description
pub async fn root(Extension(service): Extension<Arc<ObjService>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "fimidx-store",
            "version": env!("CARGO_PKG_VERSION"),
            "storage": service.storage_kind(),
            "endpoints": {
                "objs": "POST /objs/:tag/{set,update,delete,get}",
                "fields": "POST /objs/:tag/fields, POST /objs/:tag/fields/values",
                "health": "GET /health",
            }
        }
    }))
}

/// GET /health - pings the storage backend
pub async fn health(Extension(service): Extension<Arc<ObjService>>) -> ApiResult<HealthStatus> {
    let status = service.health().await?;
    Ok(ApiResponse::success(status))
}
