//! Field catalog: the discovered `(path, type)` index behind ad hoc filtering.

pub mod infer;

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::filter::coerce::FieldTypes;
use crate::filter::filter_where::FilterWhere;
use crate::filter::FieldRef;
use crate::models::value::join_path;
use crate::models::{FieldValue, TenantScope};
use crate::pagination::{Page, PageWindow};
use crate::storage::{ObjBackend, StoreError};
use crate::types::Tag;

use infer::FlatField;

/// `getObjFields` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPage {
    pub fields: Vec<FlatField>,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
}

impl From<Page<FlatField>> for FieldPage {
    fn from(page: Page<FlatField>) -> Self {
        Self { fields: page.items, page: page.page, limit: page.limit, has_more: page.has_more }
    }
}

/// `getObjFieldValues` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldValuePage {
    pub values: Vec<FieldValue>,
    pub page: u64,
    pub limit: u64,
    pub has_more: bool,
}

impl From<Page<FieldValue>> for FieldValuePage {
    fn from(page: Page<FieldValue>) -> Self {
        Self { values: page.items, page: page.page, limit: page.limit, has_more: page.has_more }
    }
}

/// Catalog reads and writes over whichever backend stores the objects
#[derive(Clone)]
pub struct FieldCatalog {
    backend: Arc<dyn ObjBackend>,
}

impl FieldCatalog {
    pub fn new(backend: Arc<dyn ObjBackend>) -> Self {
        Self { backend }
    }

    pub async fn record_fields(&self, scope: &TenantScope, tag: Tag, fields: &[FlatField]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        self.backend.record_fields(scope, tag, fields).await
    }

    /// Catalogued paths and types, probe-paginated
    pub async fn list_fields(&self, scope: &TenantScope, tag: Tag, window: PageWindow) -> Result<FieldPage, StoreError> {
        let fields = self.backend.list_fields(scope, tag, window.probe_window()).await?;
        Ok(window.probe(fields).into())
    }

    /// Distinct observed values for one data path, probe-paginated
    pub async fn list_field_values(
        &self,
        scope: &TenantScope,
        tag: Tag,
        path: &str,
        window: PageWindow,
    ) -> Result<FieldValuePage, StoreError> {
        let path = match FilterWhere::parse_field(path)? {
            FieldRef::Data(segments) => join_path(&segments),
            FieldRef::System(_) => {
                return Err(StoreError::field_validation(path, "Field values are only listed for data paths"));
            }
        };
        let values = self.backend.list_field_values(scope, tag, &path, window.probe_window()).await?;
        Ok(window.probe(values).map(FieldValue::from).into())
    }

    /// Known types for the given paths; paths absent from the catalog are omitted
    pub async fn field_types(&self, scope: &TenantScope, tag: Tag, paths: &[String]) -> Result<FieldTypes, StoreError> {
        if paths.is_empty() {
            return Ok(FieldTypes::new());
        }
        self.backend.field_types(scope, tag, paths).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::storage::MemoryStore;
    use infer::{flatten, FieldType};
    use serde_json::json;

    fn window(limit: u64) -> PageWindow {
        PageWindow::new(Some(1), Some(limit), &AppConfig::development().filter).unwrap()
    }

    #[tokio::test]
    async fn lists_recorded_fields_in_order() {
        let catalog = FieldCatalog::new(Arc::new(MemoryStore::new()));
        let scope = TenantScope::app("a");
        let fields: Vec<FlatField> = flatten(&json!({"level": "info", "count": 3, "message": "x"}))
            .into_iter()
            .collect();
        catalog.record_fields(&scope, Tag::Log, &fields).await.unwrap();

        let page = catalog.list_fields(&scope, Tag::Log, window(2)).await.unwrap();
        let paths: Vec<&str> = page.fields.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["count", "level"]);
        assert!(page.has_more);

        let types = catalog.field_types(&scope, Tag::Log, &["count".to_string()]).await.unwrap();
        assert!(types["count"].contains(&FieldType::Number));
    }

    #[tokio::test]
    async fn field_values_reject_system_fields() {
        let catalog = FieldCatalog::new(Arc::new(MemoryStore::new()));
        let err = catalog
            .list_field_values(&TenantScope::app("a"), Tag::Log, "$createdAt", window(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }
}
