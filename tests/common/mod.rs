#![allow(dead_code)]

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use fimidx_store::config::AppConfig;
use fimidx_store::handlers;
use fimidx_store::models::{Actor, ObjInput, TenantScope};
use fimidx_store::services::{ObjService, SetManyRequest};
use fimidx_store::storage::{MemoryStore, StorageKind};
use fimidx_store::types::OnConflict;

pub fn memory_service() -> ObjService {
    memory_service_with(AppConfig::development())
}

pub fn memory_service_with(config: AppConfig) -> ObjService {
    ObjService::new(Arc::new(MemoryStore::new()), Arc::new(config))
}

/// A service over an existing store, as a second instance would see it
pub fn memory_service_over(store: Arc<MemoryStore>) -> ObjService {
    ObjService::new(store, Arc::new(AppConfig::development()))
}

/// PostgreSQL-backed service, or `None` when `DATABASE_URL` is not set
pub async fn postgres_service() -> Result<Option<ObjService>> {
    let _ = dotenvy::dotenv();
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("DATABASE_URL not set, skipping PostgreSQL tests");
            return Ok(None);
        }
    };
    let mut config = AppConfig::development();
    config.storage.kind = StorageKind::Postgres;
    config.storage.database_url = Some(url);
    let service = ObjService::open(Arc::new(config))
        .await
        .context("failed to open PostgreSQL backend")?;
    Ok(Some(service))
}

/// Fresh app scope so tests never see each other's data
pub fn scope() -> TenantScope {
    TenantScope::app(format!("test_{}", Uuid::new_v4().simple()))
}

pub fn actor() -> Actor {
    Actor::user("test-user")
}

pub fn items(items: Vec<Value>) -> SetManyRequest {
    SetManyRequest {
        items: items.into_iter().map(ObjInput::new).collect(),
        unique_fields: vec![],
        on_conflict: OnConflict::Fail,
        actor: actor(),
        idempotency_key: None,
    }
}

pub fn unique_items(items: Vec<Value>, fields: &[&str]) -> SetManyRequest {
    SetManyRequest {
        unique_fields: fields.iter().map(|f| f.to_string()).collect(),
        ..self::items(items)
    }
}

pub fn router() -> Router {
    handlers::app(Arc::new(memory_service()))
}

/// Send one request through the router in-process
pub async fn send(router: &Router, method: &str, uri: &str, body: Option<String>) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body.map(Body::from).unwrap_or_else(Body::empty))?;
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let payload = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, payload))
}

pub async fn post_json(router: &Router, uri: &str, body: &Value) -> Result<(StatusCode, Value)> {
    send(router, "POST", uri, Some(body.to_string())).await
}
