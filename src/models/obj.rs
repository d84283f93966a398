use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::value::{deep_merge, get_path, split_path};
use crate::types::{ActorType, Tag, UpdateMode};

/// Current time truncated to milliseconds so both backends store identical timestamps
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Partition key for every query: `appId` plus an optional `groupId`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantScope {
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
}

impl TenantScope {
    pub fn app(app_id: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), group_id: None }
    }

    pub fn group(app_id: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self { app_id: app_id.into(), group_id: Some(group_id.into()) }
    }

    /// An app-level scope sees every group inside the app; a group scope only its own
    pub fn contains(&self, obj: &Obj) -> bool {
        if obj.app_id != self.app_id {
            return false;
        }
        match &self.group_id {
            Some(group_id) => obj.group_id.as_deref() == Some(group_id.as_str()),
            None => true,
        }
    }
}

/// Identity performing a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActorType,
}

impl Actor {
    pub fn new(id: impl Into<String>, kind: ActorType) -> Self {
        Self { id: id.into(), kind }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self::new(id, ActorType::User)
    }
}

/// One item passed to `setMany`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjInput {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ObjInput {
    pub fn new(data: Value) -> Self {
        Self { data, meta: None }
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// The universal tagged record underlying every domain entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Obj {
    pub id: String,
    pub app_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    pub tag: Tag,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub created_by_type: ActorType,
    pub updated_by: String,
    pub updated_by_type: ActorType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by_type: Option<ActorType>,
    /// Data paths this object is kept unique on within its scope and tag
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unique_on: Vec<String>,
}

impl Obj {
    /// Build a fresh object with a new id and `createdAt == updatedAt`
    pub fn create(
        scope: &TenantScope,
        tag: Tag,
        input: ObjInput,
        unique_on: Vec<String>,
        actor: &Actor,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            app_id: scope.app_id.clone(),
            group_id: scope.group_id.clone(),
            tag,
            data: input.data,
            meta: input.meta,
            created_at: at,
            updated_at: at,
            created_by: actor.id.clone(),
            created_by_type: actor.kind,
            updated_by: actor.id.clone(),
            updated_by_type: actor.kind,
            deleted_at: None,
            deleted_by: None,
            deleted_by_type: None,
            unique_on,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Canonical key over the unique fields; `None` when the object carries none of them
    pub fn unique_key(&self) -> Option<String> {
        unique_key(&self.data, &self.unique_on)
    }

    /// Apply an update in the given mode and stamp the updater
    pub fn apply_update(
        &mut self,
        data: &Value,
        meta: Option<&Value>,
        mode: UpdateMode,
        actor: &Actor,
        at: DateTime<Utc>,
    ) {
        match mode {
            UpdateMode::Merge => deep_merge(&mut self.data, data),
            UpdateMode::Replace => self.data = data.clone(),
        }
        if let Some(meta) = meta {
            match (mode, self.meta.as_mut()) {
                (UpdateMode::Merge, Some(existing)) => deep_merge(existing, meta),
                _ => self.meta = Some(meta.clone()),
            }
        }
        self.touch(actor, at);
    }

    pub fn touch(&mut self, actor: &Actor, at: DateTime<Utc>) {
        self.updated_at = at;
        self.updated_by = actor.id.clone();
        self.updated_by_type = actor.kind;
    }

    pub fn mark_deleted(&mut self, actor: &Actor, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.deleted_by = Some(actor.id.clone());
        self.deleted_by_type = Some(actor.kind);
        self.touch(actor, at);
    }
}

/// Canonical uniqueness key: `[[field, value], ...]` sorted by field path, so
/// objects made unique on different fields never share a key. Missing fields
/// become `null`; if every field is missing the object is not constrained.
pub fn unique_key(data: &Value, fields: &[String]) -> Option<String> {
    let fields: BTreeSet<&String> = fields.iter().collect();
    let pairs: Vec<(&String, Option<&Value>)> = fields
        .into_iter()
        .map(|field| (field, get_path(data, &split_path(field))))
        .collect();
    if pairs.iter().all(|(_, value)| value.is_none()) {
        return None;
    }
    let pairs: Vec<Value> = pairs
        .into_iter()
        .map(|(field, value)| json!([field, value.cloned().unwrap_or(Value::Null)]))
        .collect();
    Some(Value::Array(pairs).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Obj {
        Obj::create(
            &TenantScope::app("app-1"),
            Tag::Group,
            ObjInput::new(json!({"name": "Dup", "settings": {"a": 1}})),
            vec!["name".to_string()],
            &Actor::user("u1"),
            now(),
        )
    }

    #[test]
    fn create_stamps_actor_and_times() {
        let obj = sample();
        assert_eq!(obj.created_at, obj.updated_at);
        assert_eq!(obj.created_by, "u1");
        assert_eq!(obj.updated_by_type, ActorType::User);
        assert!(!obj.is_deleted());
    }

    #[test]
    fn unique_key_uses_declared_fields() {
        let obj = sample();
        assert_eq!(obj.unique_key().as_deref(), Some(r#"[["name","Dup"]]"#));
        assert_eq!(unique_key(&json!({"other": 1}), &["name".to_string()]), None);
        assert_eq!(unique_key(&json!({"a": 1}), &[]), None);
        assert_eq!(
            unique_key(&json!({"a": 1}), &["b".to_string(), "a".to_string()]).as_deref(),
            Some(r#"[["a",1],["b",null]]"#)
        );

        // Same value under different fields is a different key
        let by_name = unique_key(&json!({"name": "x", "slug": "x"}), &["name".to_string()]);
        let by_slug = unique_key(&json!({"name": "y", "slug": "x"}), &["slug".to_string()]);
        assert_ne!(by_name, by_slug);
    }

    #[test]
    fn merge_and_replace_updates() {
        let mut obj = sample();
        let actor = Actor::new("token-1", ActorType::ClientToken);
        obj.apply_update(&json!({"settings": {"b": 2}}), None, UpdateMode::Merge, &actor, now());
        assert_eq!(obj.data, json!({"name": "Dup", "settings": {"a": 1, "b": 2}}));
        assert_eq!(obj.updated_by_type, ActorType::ClientToken);

        obj.apply_update(&json!({"name": "Other"}), Some(&json!({})), UpdateMode::Replace, &actor, now());
        assert_eq!(obj.data, json!({"name": "Other"}));
        assert_eq!(obj.meta, Some(json!({})));
    }

    #[test]
    fn scope_contains_respects_group() {
        let obj = sample();
        assert!(TenantScope::app("app-1").contains(&obj));
        assert!(!TenantScope::app("app-2").contains(&obj));
        assert!(!TenantScope::group("app-1", "g1").contains(&obj));
    }
}
