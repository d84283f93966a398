use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::models::{Actor, ObjInput, TenantScope};
use crate::services::{ObjService, SetManyRequest};
use crate::storage::MemoryStore;
use crate::types::OnConflict;

/// Memory-backed service with a fresh app scope per test
pub struct TestContext {
    pub service: ObjService,
    pub scope: TenantScope,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(AppConfig::development())
    }

    pub fn with_config(config: AppConfig) -> Self {
        Self {
            service: ObjService::new(Arc::new(MemoryStore::new()), Arc::new(config)),
            scope: Self::generate_scope(),
        }
    }

    /// A scope in a different app, never seen before
    pub fn other_app(&self) -> TenantScope {
        Self::generate_scope()
    }

    pub fn actor() -> Actor {
        Actor::user("test-user")
    }

    /// `setMany` request for plain items with no unique fields
    pub fn items(items: Vec<Value>) -> SetManyRequest {
        SetManyRequest {
            items: items.into_iter().map(ObjInput::new).collect(),
            unique_fields: vec![],
            on_conflict: OnConflict::Fail,
            actor: Self::actor(),
            idempotency_key: None,
        }
    }

    fn generate_scope() -> TenantScope {
        TenantScope::app(format!("test_{}", Uuid::new_v4().simple()))
    }
}
