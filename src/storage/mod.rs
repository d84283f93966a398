//! Backend binding. Every concrete store implements [`ObjBackend`] over the
//! same compiled predicate, so swapping backends never changes the contract.

pub mod document;
pub mod error;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::catalog::infer::FlatField;
use crate::config::AppConfig;
use crate::database::PostgresStore;
use crate::filter::coerce::FieldTypes;
use crate::filter::CompiledQuery;
use crate::models::value::deep_merge;
use crate::models::{Actor, Obj, TenantScope};
use crate::types::{OnConflict, Tag, UpdateMode};

pub use error::StoreError;
pub use memory::MemoryStore;

/// Which concrete backend serves the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Document-oriented, in-process collections
    Memory,
    /// Relational, PostgreSQL with a JSONB data column
    Postgres,
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Memory => f.write_str("memory"),
            StorageKind::Postgres => f.write_str("postgres"),
        }
    }
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" | "mem" => Ok(StorageKind::Memory),
            "postgres" | "postgresql" | "pg" => Ok(StorageKind::Postgres),
            other => Err(format!("Unknown storage kind: {}", other)),
        }
    }
}

/// Offset/limit window handed to a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub limit: u64,
}

impl Window {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// Partial update applied by `update_objs`
#[derive(Debug, Clone)]
pub struct UpdateSpec {
    pub data: Value,
    pub meta: Option<Value>,
    pub mode: UpdateMode,
    /// Update only the first N matches in query order
    pub count: Option<u64>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeleteSpec {
    pub hard: bool,
    /// Fail unless the query matches at most one live object
    pub single: bool,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Identity of a stored idempotent result
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    pub scope: TenantScope,
    pub tag: Tag,
    pub key: String,
}

/// A completed mutation result kept for replay by any instance sharing the store
#[derive(Debug, Clone, PartialEq)]
pub struct IdempotencyRecord {
    pub key: IdempotencyKey,
    /// SHA-256 of the operation and request the key was first used with
    pub fingerprint: String,
    pub result: Value,
    pub created_at: DateTime<Utc>,
}

/// Storage contract. Implementations must make each call all-or-nothing and
/// must enforce live-object uniqueness atomically (never read-then-write).
#[async_trait]
pub trait ObjBackend: Send + Sync {
    fn kind(&self) -> StorageKind;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Insert objects, resolving unique-key matches against live objects per `on_conflict`
    async fn set_objs(&self, objs: Vec<Obj>, on_conflict: OnConflict) -> Result<Vec<Obj>, StoreError>;

    /// Update matches in query order, capped by `spec.count`; returns the updated objects
    async fn update_objs(&self, query: &CompiledQuery, spec: &UpdateSpec) -> Result<Vec<Obj>, StoreError>;

    /// Soft- or hard-delete matches; returns the number of affected objects
    async fn delete_objs(&self, query: &CompiledQuery, spec: &DeleteSpec) -> Result<u64, StoreError>;

    async fn find_objs(&self, query: &CompiledQuery, window: Window) -> Result<Vec<Obj>, StoreError>;

    async fn count_objs(&self, query: &CompiledQuery) -> Result<u64, StoreError>;

    /// Upsert catalog entries; existing `(path, type)` pairs are refreshed
    async fn record_fields(&self, scope: &TenantScope, tag: Tag, fields: &[FlatField]) -> Result<(), StoreError>;

    /// Distinct `(path, type)` pairs ordered by path then type
    async fn list_fields(&self, scope: &TenantScope, tag: Tag, window: Window) -> Result<Vec<FlatField>, StoreError>;

    async fn field_types(&self, scope: &TenantScope, tag: Tag, paths: &[String]) -> Result<FieldTypes, StoreError>;

    /// Distinct values for one path across live objects, arrays unwound, in jsonb order
    async fn list_field_values(
        &self,
        scope: &TenantScope,
        tag: Tag,
        path: &str,
        window: Window,
    ) -> Result<Vec<Value>, StoreError>;

    async fn find_idempotency(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Insert the record, overwriting any earlier one under the same key
    async fn save_idempotency(&self, record: &IdempotencyRecord) -> Result<(), StoreError>;

    /// Drop records created before `before`; returns how many went
    async fn purge_idempotency(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Open the backend named by configuration
pub async fn open_backend(config: &AppConfig) -> Result<Arc<dyn ObjBackend>, StoreError> {
    tracing::info!("Opening {} storage backend", config.storage.kind);
    match config.storage.kind {
        StorageKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageKind::Postgres => {
            let store = PostgresStore::connect(&config.storage, &config.database).await?;
            Ok(Arc::new(store))
        }
    }
}

/// Outcome of an incoming object whose unique key matches a live one
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Reject,
    Keep,
    Write(Obj),
}

/// Shared `setMany` conflict policy, applied by every backend inside its
/// atomic section
pub fn resolve_conflict(existing: &Obj, incoming: &Obj, policy: OnConflict) -> Resolution {
    let actor = Actor::new(incoming.created_by.clone(), incoming.created_by_type);
    match policy {
        OnConflict::Fail => Resolution::Reject,
        OnConflict::Ignore => Resolution::Keep,
        OnConflict::Replace => {
            let mut updated = existing.clone();
            updated.data = incoming.data.clone();
            updated.meta = incoming.meta.clone();
            updated.unique_on = incoming.unique_on.clone();
            updated.touch(&actor, incoming.created_at);
            Resolution::Write(updated)
        }
        OnConflict::Merge => {
            let mut updated = existing.clone();
            deep_merge(&mut updated.data, &incoming.data);
            if let Some(meta) = &incoming.meta {
                match updated.meta.as_mut() {
                    Some(existing_meta) => deep_merge(existing_meta, meta),
                    None => updated.meta = Some(meta.clone()),
                }
            }
            updated.unique_on = incoming.unique_on.clone();
            updated.touch(&actor, incoming.created_at);
            Resolution::Write(updated)
        }
    }
}

/// Guard for single-target deletes. Only live matches count toward the
/// limit; tombstones swept up by a hard delete do not.
pub fn check_single_match(matched: usize, live: usize, spec: &DeleteSpec) -> Result<(), StoreError> {
    if !spec.single {
        return Ok(());
    }
    if matched == 0 {
        return Err(StoreError::not_found("No object matched the delete query"));
    }
    if live > 1 {
        return Err(StoreError::validation(format!(
            "Delete query matched {} live objects; set deleteMany to delete more than one",
            live
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now, ObjInput};
    use crate::types::ActorType;
    use serde_json::json;

    fn obj(data: Value, actor: &str) -> Obj {
        Obj::create(
            &TenantScope::app("a"),
            Tag::Group,
            ObjInput::new(data),
            vec!["name".to_string()],
            &Actor::new(actor, ActorType::User),
            now(),
        )
    }

    #[test]
    fn storage_kind_parses_aliases() {
        assert_eq!("PG".parse::<StorageKind>().unwrap(), StorageKind::Postgres);
        assert_eq!("memory".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert!("mongo".parse::<StorageKind>().is_err());
    }

    #[test]
    fn conflict_policies() {
        let existing = obj(json!({"name": "Dup", "a": {"x": 1}}), "u1");
        let incoming = obj(json!({"name": "Dup", "a": {"y": 2}}), "u2");

        assert_eq!(resolve_conflict(&existing, &incoming, OnConflict::Fail), Resolution::Reject);
        assert_eq!(resolve_conflict(&existing, &incoming, OnConflict::Ignore), Resolution::Keep);

        let Resolution::Write(replaced) = resolve_conflict(&existing, &incoming, OnConflict::Replace) else {
            panic!("expected write");
        };
        assert_eq!(replaced.id, existing.id);
        assert_eq!(replaced.data, json!({"name": "Dup", "a": {"y": 2}}));
        assert_eq!(replaced.updated_by, "u2");
        assert_eq!(replaced.created_by, "u1");

        let Resolution::Write(merged) = resolve_conflict(&existing, &incoming, OnConflict::Merge) else {
            panic!("expected write");
        };
        assert_eq!(merged.data, json!({"name": "Dup", "a": {"x": 1, "y": 2}}));
    }

    #[test]
    fn single_match_guard() {
        let spec = DeleteSpec { hard: false, single: true, actor: Actor::user("u"), at: now() };
        assert!(matches!(check_single_match(0, 0, &spec), Err(StoreError::NotFound(_))));
        assert!(check_single_match(1, 1, &spec).is_ok());
        assert!(matches!(check_single_match(2, 2, &spec), Err(StoreError::Validation { .. })));
        // Tombstones do not count
        assert!(check_single_match(3, 1, &spec).is_ok());
        assert!(check_single_match(2, 0, &spec).is_ok());
        let many = DeleteSpec { single: false, ..spec };
        assert!(check_single_match(5, 5, &many).is_ok());
    }
}
