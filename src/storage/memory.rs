//! Document-oriented backend: one in-process collection per `(appId, tag)`.
//!
//! Every write takes the collection lock for its whole duration, so the
//! uniqueness check and the write it guards are a single atomic step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::document::{compare_objs, matches};
use super::{
    check_single_match, resolve_conflict, DeleteSpec, IdempotencyKey, IdempotencyRecord, ObjBackend, Resolution,
    StorageKind, StoreError, UpdateSpec, Window,
};
use crate::catalog::infer::{FieldType, FlatField};
use crate::filter::coerce::FieldTypes;
use crate::filter::CompiledQuery;
use crate::models::value::{get_path, json_cmp, split_path};
use crate::models::{now, FieldCatalogEntry, Obj, TenantScope};
use crate::types::{OnConflict, Tag};

type CollectionKey = (String, Tag);

/// `(appId, groupId or "", tag, path, type)`
type FieldKey = (String, String, Tag, String, FieldType);

/// Uniqueness partition: `(groupId, uniqueKey)` inside one collection
type UniqueSlot = (Option<String>, String);

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<HashMap<CollectionKey, Vec<Obj>>>>,
    fields: Arc<RwLock<BTreeMap<FieldKey, FieldCatalogEntry>>>,
    idempotency: Arc<RwLock<HashMap<IdempotencyKey, IdempotencyRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(app_id: &str, tag: Tag) -> CollectionKey {
        (app_id.to_string(), tag)
    }

    fn slot(obj: &Obj) -> Option<UniqueSlot> {
        if obj.is_deleted() {
            return None;
        }
        obj.unique_key().map(|key| (obj.group_id.clone(), key))
    }

    /// Matching indices in query order
    fn select(collection: &[Obj], query: &CompiledQuery) -> Vec<usize> {
        let mut indices: Vec<usize> = collection
            .iter()
            .enumerate()
            .filter(|(_, obj)| matches(query, obj))
            .map(|(i, _)| i)
            .collect();
        indices.sort_by(|a, b| compare_objs(&collection[*a], &collection[*b], &query.sort));
        indices
    }

    fn window<T>(items: impl IntoIterator<Item = T>, window: Window) -> Vec<T> {
        items
            .into_iter()
            .skip(window.offset as usize)
            .take(window.limit as usize)
            .collect()
    }

    fn in_scope(entry: &FieldCatalogEntry, scope: &TenantScope, tag: Tag) -> bool {
        entry.app_id == scope.app_id
            && entry.tag == tag
            && match &scope.group_id {
                Some(group_id) => entry.group_id.as_deref() == Some(group_id.as_str()),
                None => true,
            }
    }
}

#[async_trait]
impl ObjBackend for MemoryStore {
    fn kind(&self) -> StorageKind {
        StorageKind::Memory
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let _ = self.collections.read().await;
        Ok(())
    }

    async fn set_objs(&self, objs: Vec<Obj>, on_conflict: OnConflict) -> Result<Vec<Obj>, StoreError> {
        let mut collections = self.collections.write().await;

        // Stage every change first so a rejected item leaves nothing behind
        let mut inserts: Vec<Obj> = Vec::new();
        let mut writes: Vec<(CollectionKey, usize, Obj)> = Vec::new();
        let mut results = Vec::with_capacity(objs.len());
        let mut staged_slots: HashSet<(CollectionKey, UniqueSlot)> = HashSet::new();

        for obj in objs {
            let key = Self::key(&obj.app_id, obj.tag);
            let slot = Self::slot(&obj);

            if let Some(slot) = &slot {
                if !staged_slots.insert((key.clone(), slot.clone())) {
                    return Err(StoreError::conflict(obj.tag, &obj.unique_on, &slot.1));
                }
            }

            let existing = slot.as_ref().and_then(|slot| {
                collections.get(&key).and_then(|collection| {
                    collection
                        .iter()
                        .position(|candidate| Self::slot(candidate).as_ref() == Some(slot))
                })
            });

            match existing {
                None => {
                    results.push(obj.clone());
                    inserts.push(obj);
                }
                Some(index) => {
                    let current = &collections[&key][index];
                    match resolve_conflict(current, &obj, on_conflict) {
                        Resolution::Reject => {
                            let unique_key = obj.unique_key().unwrap_or_default();
                            return Err(StoreError::conflict(obj.tag, &obj.unique_on, &unique_key));
                        }
                        Resolution::Keep => results.push(current.clone()),
                        Resolution::Write(updated) => {
                            results.push(updated.clone());
                            writes.push((key, index, updated));
                        }
                    }
                }
            }
        }

        for (key, index, updated) in writes {
            if let Some(collection) = collections.get_mut(&key) {
                collection[index] = updated;
            }
        }
        for obj in inserts {
            collections.entry(Self::key(&obj.app_id, obj.tag)).or_default().push(obj);
        }

        Ok(results)
    }

    async fn update_objs(&self, query: &CompiledQuery, spec: &UpdateSpec) -> Result<Vec<Obj>, StoreError> {
        let mut collections = self.collections.write().await;
        let key = Self::key(&query.scope.app_id, query.tag);
        let collection = match collections.get_mut(&key) {
            Some(collection) => collection,
            None => return Ok(vec![]),
        };

        let mut indices = Self::select(collection, query);
        if let Some(count) = spec.count {
            indices.truncate(count as usize);
        }

        let mut updated: HashMap<usize, Obj> = HashMap::new();
        for index in &indices {
            let mut obj = collection[*index].clone();
            obj.apply_update(&spec.data, spec.meta.as_ref(), spec.mode, &spec.actor, spec.at);
            updated.insert(*index, obj);
        }

        // The post-update collection must still hold unique live keys
        let mut slots: HashSet<UniqueSlot> = HashSet::new();
        for (index, obj) in collection.iter().enumerate() {
            let obj = updated.get(&index).unwrap_or(obj);
            if let Some(slot) = Self::slot(obj) {
                if !slots.insert(slot.clone()) {
                    return Err(StoreError::conflict(obj.tag, &obj.unique_on, &slot.1));
                }
            }
        }

        let mut results = Vec::with_capacity(indices.len());
        for index in indices {
            if let Some(obj) = updated.remove(&index) {
                collection[index] = obj.clone();
                results.push(obj);
            }
        }
        Ok(results)
    }

    async fn delete_objs(&self, query: &CompiledQuery, spec: &DeleteSpec) -> Result<u64, StoreError> {
        let mut collections = self.collections.write().await;
        let key = Self::key(&query.scope.app_id, query.tag);
        let collection = match collections.get_mut(&key) {
            Some(collection) => collection,
            None => {
                check_single_match(0, 0, spec)?;
                return Ok(0);
            }
        };

        let indices = Self::select(collection, query);
        let live = indices.iter().filter(|i| !collection[**i].is_deleted()).count();
        check_single_match(indices.len(), live, spec)?;

        if spec.hard {
            let doomed: HashSet<usize> = indices.iter().copied().collect();
            let mut index = 0;
            collection.retain(|_| {
                let keep = !doomed.contains(&index);
                index += 1;
                keep
            });
        } else {
            for index in &indices {
                collection[*index].mark_deleted(&spec.actor, spec.at);
            }
        }
        Ok(indices.len() as u64)
    }

    async fn find_objs(&self, query: &CompiledQuery, window: Window) -> Result<Vec<Obj>, StoreError> {
        let collections = self.collections.read().await;
        let collection = match collections.get(&Self::key(&query.scope.app_id, query.tag)) {
            Some(collection) => collection,
            None => return Ok(vec![]),
        };
        let indices = Self::select(collection, query);
        Ok(Self::window(indices.into_iter().map(|i| collection[i].clone()), window))
    }

    async fn count_objs(&self, query: &CompiledQuery) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&Self::key(&query.scope.app_id, query.tag))
            .map(|collection| collection.iter().filter(|obj| matches(query, obj)).count() as u64)
            .unwrap_or(0))
    }

    async fn record_fields(&self, scope: &TenantScope, tag: Tag, fields: &[FlatField]) -> Result<(), StoreError> {
        let mut catalog = self.fields.write().await;
        let at = now();
        for field in fields {
            let key = (
                scope.app_id.clone(),
                scope.group_id.clone().unwrap_or_default(),
                tag,
                field.path.clone(),
                field.field_type,
            );
            catalog
                .entry(key)
                .and_modify(|entry| entry.updated_at = at)
                .or_insert_with(|| FieldCatalogEntry {
                    app_id: scope.app_id.clone(),
                    group_id: scope.group_id.clone(),
                    tag,
                    path: field.path.clone(),
                    field_type: field.field_type,
                    created_at: at,
                    updated_at: at,
                });
        }
        Ok(())
    }

    async fn list_fields(&self, scope: &TenantScope, tag: Tag, window: Window) -> Result<Vec<FlatField>, StoreError> {
        let catalog = self.fields.read().await;
        // Ordered by path then type name, byte-wise
        let distinct: BTreeMap<(String, &'static str), FlatField> = catalog
            .values()
            .filter(|entry| Self::in_scope(entry, scope, tag))
            .map(|entry| {
                let key = (entry.path.clone(), entry.field_type.as_str());
                (key, FlatField { path: entry.path.clone(), field_type: entry.field_type })
            })
            .collect();
        Ok(Self::window(distinct.into_values(), window))
    }

    async fn field_types(&self, scope: &TenantScope, tag: Tag, paths: &[String]) -> Result<FieldTypes, StoreError> {
        let catalog = self.fields.read().await;
        let wanted: HashSet<&str> = paths.iter().map(String::as_str).collect();
        let mut types = FieldTypes::new();
        for entry in catalog.values() {
            if Self::in_scope(entry, scope, tag) && wanted.contains(entry.path.as_str()) {
                types.entry(entry.path.clone()).or_default().insert(entry.field_type);
            }
        }
        Ok(types)
    }

    async fn list_field_values(
        &self,
        scope: &TenantScope,
        tag: Tag,
        path: &str,
        window: Window,
    ) -> Result<Vec<Value>, StoreError> {
        let collections = self.collections.read().await;
        let collection = match collections.get(&Self::key(&scope.app_id, tag)) {
            Some(collection) => collection,
            None => return Ok(vec![]),
        };

        let segments = split_path(path);
        let mut values: Vec<Value> = Vec::new();
        for obj in collection.iter().filter(|obj| !obj.is_deleted() && scope.contains(obj)) {
            match get_path(&obj.data, &segments) {
                Some(Value::Array(items)) => values.extend(items.iter().cloned()),
                Some(value) => values.push(value.clone()),
                None => {}
            }
        }
        values.sort_by(json_cmp);
        values.dedup_by(|a, b| json_cmp(a, b) == Ordering::Equal);
        Ok(Self::window(values, window))
    }

    async fn find_idempotency(&self, key: &IdempotencyKey) -> Result<Option<IdempotencyRecord>, StoreError> {
        Ok(self.idempotency.read().await.get(key).cloned())
    }

    async fn save_idempotency(&self, record: &IdempotencyRecord) -> Result<(), StoreError> {
        self.idempotency.write().await.insert(record.key.clone(), record.clone());
        Ok(())
    }

    async fn purge_idempotency(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut records = self.idempotency.write().await;
        let held = records.len();
        records.retain(|_, record| record.created_at >= before);
        Ok((held - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterExpr, FilterOp, Filter, FilterOptions};
    use crate::models::{Actor, ObjInput};
    use crate::types::UpdateMode;
    use serde_json::json;

    fn obj(scope: &TenantScope, data: Value, unique_on: &[&str]) -> Obj {
        Obj::create(
            scope,
            Tag::Group,
            ObjInput::new(data),
            unique_on.iter().map(|s| s.to_string()).collect(),
            &Actor::user("u"),
            now(),
        )
    }

    fn query(scope: &TenantScope, expr: Option<FilterExpr>) -> CompiledQuery {
        let mut filter = Filter::new(scope.clone(), Tag::Group, FilterOptions::default()).unwrap();
        filter.where_clause(expr);
        filter.prepare().unwrap().compile(&FieldTypes::new()).unwrap()
    }

    fn window() -> Window {
        Window::new(0, 100)
    }

    #[tokio::test]
    async fn unique_key_conflicts_and_batch_is_atomic() {
        let store = MemoryStore::new();
        let scope = TenantScope::app("a");
        store.set_objs(vec![obj(&scope, json!({"name": "Dup"}), &["name"])], OnConflict::Fail).await.unwrap();

        let batch = vec![
            obj(&scope, json!({"name": "Fresh"}), &["name"]),
            obj(&scope, json!({"name": "Dup"}), &["name"]),
        ];
        let err = store.set_objs(batch, OnConflict::Fail).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert_eq!(store.count_objs(&query(&scope, None)).await.unwrap(), 1);

        // A different group is a different partition
        let other = TenantScope::group("a", "g2");
        store.set_objs(vec![obj(&other, json!({"name": "Dup"}), &["name"])], OnConflict::Fail).await.unwrap();
    }

    #[tokio::test]
    async fn soft_deleted_objects_free_their_key() {
        let store = MemoryStore::new();
        let scope = TenantScope::app("a");
        store.set_objs(vec![obj(&scope, json!({"name": "X"}), &["name"])], OnConflict::Fail).await.unwrap();

        let spec = DeleteSpec { hard: false, single: true, actor: Actor::user("u"), at: now() };
        let q = query(&scope, Some(FilterExpr::leaf("name", FilterOp::Eq, json!("X"))));
        assert_eq!(store.delete_objs(&q, &spec).await.unwrap(), 1);
        assert_eq!(store.count_objs(&q).await.unwrap(), 0);

        store.set_objs(vec![obj(&scope, json!({"name": "X"}), &["name"])], OnConflict::Fail).await.unwrap();
    }

    #[tokio::test]
    async fn update_respects_count_and_uniqueness() {
        let store = MemoryStore::new();
        let scope = TenantScope::app("a");
        let objs = (0..3).map(|i| obj(&scope, json!({"name": format!("n{}", i), "n": i}), &["name"])).collect();
        store.set_objs(objs, OnConflict::Fail).await.unwrap();

        let spec = UpdateSpec {
            data: json!({"flag": true}),
            meta: None,
            mode: UpdateMode::Merge,
            count: Some(2),
            actor: Actor::user("u2"),
            at: now(),
        };
        let updated = store.update_objs(&query(&scope, None), &spec).await.unwrap();
        assert_eq!(updated.len(), 2);

        let rename = UpdateSpec { data: json!({"name": "n0"}), count: None, ..spec };
        let q = query(&scope, Some(FilterExpr::leaf("n", FilterOp::Eq, json!(1))));
        assert!(matches!(store.update_objs(&q, &rename).await, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn field_values_unwind_arrays() {
        let store = MemoryStore::new();
        let scope = TenantScope::app("a");
        let objs = vec![
            obj(&scope, json!({"tags": ["b", "a"]}), &[]),
            obj(&scope, json!({"tags": "a"}), &[]),
            obj(&scope, json!({"tags": 3}), &[]),
        ];
        store.set_objs(objs, OnConflict::Fail).await.unwrap();
        let values = store.list_field_values(&scope, Tag::Group, "tags", window()).await.unwrap();
        assert_eq!(values, vec![json!("a"), json!("b"), json!(3)]);
    }

    #[tokio::test]
    async fn catalog_is_scoped() {
        let store = MemoryStore::new();
        let g1 = TenantScope::group("a", "g1");
        let g2 = TenantScope::group("a", "g2");
        let field = FlatField { path: "x".to_string(), field_type: FieldType::Number };
        store.record_fields(&g1, Tag::Log, &[field.clone()]).await.unwrap();
        store.record_fields(&g1, Tag::Log, &[field.clone()]).await.unwrap();

        assert_eq!(store.list_fields(&g1, Tag::Log, window()).await.unwrap(), vec![field.clone()]);
        assert!(store.list_fields(&g2, Tag::Log, window()).await.unwrap().is_empty());
        assert_eq!(store.list_fields(&TenantScope::app("a"), Tag::Log, window()).await.unwrap().len(), 1);
        let types = store.field_types(&g1, Tag::Log, &["x".to_string()]).await.unwrap();
        assert!(types["x"].contains(&FieldType::Number));
    }
}
