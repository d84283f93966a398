//! Mutation pipeline: validate, write through the backend, then hand the
//! committed change to the observer rings.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::filter::filter_where::FilterWhere;
use crate::filter::{CompiledQuery, FieldRef, FilterExpr};
use crate::models::obj::unique_key;
use crate::models::{now, Actor, Obj, ObjInput, TenantScope};
use crate::observer::{ObserverContext, ObserverPipeline};
use crate::storage::{DeleteSpec, ObjBackend, StoreError, UpdateSpec};
use crate::types::{OnConflict, Operation, Tag, UpdateMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetManyRequest {
    pub items: Vec<ObjInput>,
    /// Data paths the items are kept unique on within their scope and tag
    #[serde(default)]
    pub unique_fields: Vec<String>,
    #[serde(default)]
    pub on_conflict: OnConflict,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManyRequest {
    #[serde(default)]
    pub query: Option<FilterExpr>,
    pub update: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default)]
    pub update_mode: UpdateMode,
    /// Update only the first N matches
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteManyRequest {
    #[serde(default)]
    pub query: Option<FilterExpr>,
    pub actor: Actor,
    /// Allow the query to match more than one object
    #[serde(default)]
    pub delete_many: bool,
    #[serde(default)]
    pub hard_delete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub updated_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}

/// What a completed mutation returned; the unit stored for idempotent replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", content = "result", rename_all = "camelCase")]
pub enum MutationOutcome {
    Set(Vec<Obj>),
    Update(UpdateResult),
    Delete(DeleteResult),
}

pub struct MutationPipeline {
    backend: Arc<dyn ObjBackend>,
    observers: ObserverPipeline,
}

impl MutationPipeline {
    pub fn new(backend: Arc<dyn ObjBackend>, observers: ObserverPipeline) -> Self {
        Self { backend, observers }
    }

    pub async fn set_many(&self, scope: &TenantScope, tag: Tag, request: &SetManyRequest) -> Result<Vec<Obj>, StoreError> {
        validate_scope(scope)?;
        validate_actor(&request.actor)?;
        validate_unique_fields(&request.unique_fields)?;
        if request.items.is_empty() {
            tracing::debug!("setMany {} called with no items", tag);
            return Ok(vec![]);
        }
        check_batch_collisions(tag, &request.items, &request.unique_fields)?;

        let at = now();
        let objs: Vec<Obj> = request
            .items
            .iter()
            .cloned()
            .map(|item| Obj::create(scope, tag, item, request.unique_fields.clone(), &request.actor, at))
            .collect();

        let written = self.backend.set_objs(objs, request.on_conflict).await?;
        tracing::info!("setMany {}: wrote {} objects in app {}", tag, written.len(), scope.app_id);

        self.notify(ObserverContext::new(Operation::Set, scope.clone(), tag, request.actor.clone()).with_objs(written.clone()))
            .await;
        Ok(written)
    }

    pub async fn update_many(&self, query: &CompiledQuery, request: &UpdateManyRequest) -> Result<UpdateResult, StoreError> {
        validate_actor(&request.actor)?;
        if request.update_mode == UpdateMode::Merge && !request.update.is_object() {
            return Err(StoreError::field_validation("update", "update must be an object in merge mode"));
        }
        if request.count == Some(0) {
            return Err(StoreError::field_validation("count", "count must be at least 1"));
        }

        let spec = UpdateSpec {
            data: request.update.clone(),
            meta: request.meta.clone(),
            mode: request.update_mode,
            count: request.count,
            actor: request.actor.clone(),
            at: now(),
        };
        let updated = self.backend.update_objs(query, &spec).await?;
        if request.count.is_some() && updated.is_empty() {
            return Err(StoreError::not_found(format!("No {} object matched the update query", query.tag)));
        }
        let result = UpdateResult { updated_count: updated.len() as u64 };
        tracing::info!("updateMany {}: updated {} objects in app {}", query.tag, result.updated_count, query.scope.app_id);

        self.notify(
            ObserverContext::new(Operation::Update, query.scope.clone(), query.tag, request.actor.clone()).with_objs(updated),
        )
        .await;
        Ok(result)
    }

    pub async fn delete_many(&self, mut query: CompiledQuery, request: &DeleteManyRequest) -> Result<DeleteResult, StoreError> {
        validate_actor(&request.actor)?;
        if request.hard_delete {
            // Hard delete reclaims tombstones too
            query.include_deleted = true;
        }

        let spec = DeleteSpec {
            hard: request.hard_delete,
            single: !request.delete_many,
            actor: request.actor.clone(),
            at: now(),
        };
        let deleted = self.backend.delete_objs(&query, &spec).await?;
        tracing::info!(
            "deleteMany {}: {} {} objects in app {}",
            query.tag,
            if spec.hard { "erased" } else { "soft-deleted" },
            deleted,
            query.scope.app_id
        );

        self.notify(
            ObserverContext::new(Operation::Delete, query.scope.clone(), query.tag, request.actor.clone()).with_affected(deleted),
        )
        .await;
        Ok(DeleteResult { deleted_count: deleted })
    }

    async fn notify(&self, ctx: ObserverContext) {
        let operation = ctx.operation;
        let warnings = self.observers.execute(ctx).await;
        if !warnings.is_empty() {
            tracing::warn!("{} completed with {} observer warnings", operation.as_str(), warnings.len());
        }
    }
}

fn validate_scope(scope: &TenantScope) -> Result<(), StoreError> {
    if scope.app_id.trim().is_empty() {
        return Err(StoreError::field_validation("appId", "appId cannot be empty"));
    }
    if matches!(scope.group_id.as_deref(), Some(g) if g.trim().is_empty()) {
        return Err(StoreError::field_validation("groupId", "groupId cannot be empty"));
    }
    Ok(())
}

fn validate_actor(actor: &Actor) -> Result<(), StoreError> {
    if actor.id.trim().is_empty() {
        return Err(StoreError::field_validation("actor", "actor id cannot be empty"));
    }
    Ok(())
}

fn validate_unique_fields(fields: &[String]) -> Result<(), StoreError> {
    for field in fields {
        match FilterWhere::parse_field(field) {
            Ok(FieldRef::Data(_)) => {}
            _ => {
                return Err(StoreError::field_validation(
                    "uniqueFields",
                    format!("'{}' is not a valid data path", field),
                ))
            }
        }
    }
    Ok(())
}

/// Two items of one batch may not share a unique key
fn check_batch_collisions(tag: Tag, items: &[ObjInput], unique_fields: &[String]) -> Result<(), StoreError> {
    let mut seen = HashSet::new();
    for item in items {
        if let Some(key) = unique_key(&item.data, unique_fields) {
            if !seen.insert(key.clone()) {
                return Err(StoreError::conflict(tag, unique_fields, &key));
            }
        }
    }
    Ok(())
}
