use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::catalog::{FieldCatalog, FieldPage, FieldValuePage};
use crate::config::AppConfig;
use crate::filter::coerce::FieldTypes;
use crate::filter::filter_order::FilterOrder;
use crate::filter::{CompiledQuery, Filter, FilterExpr, FilterOptions, PreparedQuery};
use crate::models::{Obj, TenantScope};
use crate::observer::{register_default_observers, ObserverPipeline};
use crate::pagination::{Page, PageMode, PageWindow};
use crate::services::idempotency::IdempotencyCache;
use crate::services::mutation::{
    DeleteManyRequest, DeleteResult, MutationOutcome, MutationPipeline, SetManyRequest, UpdateManyRequest, UpdateResult,
};
use crate::storage::{open_backend, ObjBackend, StorageKind, StoreError};
use crate::types::{Operation, Tag};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetManyRequest {
    #[serde(default)]
    pub query: Option<FilterExpr>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
    /// `[{ field, direction }]`, `"field desc, other"` or `{ field: direction }`
    #[serde(default)]
    pub sort: Option<Value>,
    #[serde(default)]
    pub include_deleted: bool,
    /// Overrides the tag's default page mode
    #[serde(default)]
    pub page_mode: Option<PageMode>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub storage: StorageKind,
}

/// The storage adapter surface: every read and write of tagged objects goes
/// through here, whichever backend is configured.
pub struct ObjService {
    config: Arc<AppConfig>,
    backend: Arc<dyn ObjBackend>,
    catalog: FieldCatalog,
    mutation: MutationPipeline,
    idempotency: IdempotencyCache<MutationOutcome>,
}

impl ObjService {
    pub fn new(backend: Arc<dyn ObjBackend>, config: Arc<AppConfig>) -> Self {
        let catalog = FieldCatalog::new(backend.clone());
        let mut observers = ObserverPipeline::new();
        register_default_observers(&mut observers, catalog.clone(), &config.catalog);

        Self {
            mutation: MutationPipeline::new(backend.clone(), observers),
            idempotency: IdempotencyCache::new(backend.clone(), &config.idempotency),
            catalog,
            backend,
            config,
        }
    }

    /// Open the configured backend and build a service over it
    pub async fn open(config: Arc<AppConfig>) -> Result<Self, StoreError> {
        let backend = open_backend(&config).await?;
        Ok(Self::new(backend, config))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn storage_kind(&self) -> StorageKind {
        self.backend.kind()
    }

    pub async fn set_many_objs(&self, scope: &TenantScope, tag: Tag, request: SetManyRequest) -> Result<Vec<Obj>, StoreError> {
        let req = &request;
        let outcome = self
            .idempotency
            .run(scope, tag, req.idempotency_key.as_deref(), Operation::Set, req, move || async move {
                self.mutation.set_many(scope, tag, req).await.map(MutationOutcome::Set)
            })
            .await?;
        match outcome {
            MutationOutcome::Set(objs) => Ok(objs),
            _ => Err(Self::operation_mismatch()),
        }
    }

    pub async fn update_many_objs(&self, scope: &TenantScope, tag: Tag, request: UpdateManyRequest) -> Result<UpdateResult, StoreError> {
        let req = &request;
        let outcome = self
            .idempotency
            .run(scope, tag, req.idempotency_key.as_deref(), Operation::Update, req, move || async move {
                let query = self.compile(scope, tag, req.query.clone(), None, false).await?;
                self.mutation.update_many(&query, req).await.map(MutationOutcome::Update)
            })
            .await?;
        match outcome {
            MutationOutcome::Update(result) => Ok(result),
            _ => Err(Self::operation_mismatch()),
        }
    }

    pub async fn delete_many_objs(&self, scope: &TenantScope, tag: Tag, request: DeleteManyRequest) -> Result<DeleteResult, StoreError> {
        let req = &request;
        let outcome = self
            .idempotency
            .run(scope, tag, req.idempotency_key.as_deref(), Operation::Delete, req, move || async move {
                let query = self.compile(scope, tag, req.query.clone(), None, false).await?;
                self.mutation.delete_many(query, req).await.map(MutationOutcome::Delete)
            })
            .await?;
        match outcome {
            MutationOutcome::Delete(result) => Ok(result),
            _ => Err(Self::operation_mismatch()),
        }
    }

    pub async fn get_many_objs(&self, scope: &TenantScope, tag: Tag, request: GetManyRequest) -> Result<Page<Obj>, StoreError> {
        let window = PageWindow::new(request.page, request.limit, &self.config.filter)?;
        let mode = request.page_mode.unwrap_or_else(|| PageMode::for_tag(tag));
        let query = self
            .compile(scope, tag, request.query, request.sort.as_ref(), request.include_deleted)
            .await?;

        match mode {
            PageMode::Exact => {
                let total = self.backend.count_objs(&query).await?;
                let items = self.backend.find_objs(&query, window.window()).await?;
                Ok(window.exact(items, total))
            }
            PageMode::Probe => {
                let items = self.backend.find_objs(&query, window.probe_window()).await?;
                Ok(window.probe(items))
            }
        }
    }

    pub async fn get_obj_fields(
        &self,
        scope: &TenantScope,
        tag: Tag,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<FieldPage, StoreError> {
        let window = PageWindow::new(page, limit, &self.config.filter)?;
        self.catalog.list_fields(scope, tag, window).await
    }

    pub async fn get_obj_field_values(
        &self,
        scope: &TenantScope,
        tag: Tag,
        field: &str,
        page: Option<u64>,
        limit: Option<u64>,
    ) -> Result<FieldValuePage, StoreError> {
        let window = PageWindow::new(page, limit, &self.config.filter)?;
        self.catalog.list_field_values(scope, tag, field, window).await
    }

    pub async fn health(&self) -> Result<HealthStatus, StoreError> {
        self.backend.health_check().await?;
        Ok(HealthStatus { status: "ok", storage: self.backend.kind() })
    }

    /// Structural checks first, then catalog type checks and coercion
    async fn compile(
        &self,
        scope: &TenantScope,
        tag: Tag,
        query: Option<FilterExpr>,
        sort: Option<&Value>,
        include_deleted: bool,
    ) -> Result<CompiledQuery, StoreError> {
        let sort = match sort {
            Some(sort) => FilterOrder::validate_and_parse(sort)?,
            None => vec![],
        };
        let mut filter = Filter::new(scope.clone(), tag, FilterOptions::from(&self.config.filter))?;
        filter.where_clause(query).order(sort).include_deleted(include_deleted);
        let prepared = filter.prepare()?;

        let types = self.catalog_types(&prepared).await;
        let compiled = prepared.compile(&types)?;
        if self.config.filter.debug_logging {
            tracing::debug!("Compiled {} query for app {}: {:?}", tag, scope.app_id, compiled.predicate);
        }
        Ok(compiled)
    }

    /// Catalog types for the paths a query touches. A failed lookup
    /// validates as if the catalog were empty.
    async fn catalog_types(&self, prepared: &PreparedQuery) -> FieldTypes {
        if !self.config.catalog.validate_queries || prepared.data_paths.is_empty() {
            return FieldTypes::new();
        }
        let paths: Vec<String> = prepared.data_paths.iter().cloned().collect();
        match self.catalog.field_types(&prepared.scope, prepared.tag, &paths).await {
            Ok(types) => types,
            Err(e) => {
                tracing::warn!("Catalog lookup failed, skipping type checks: {}", e);
                FieldTypes::new()
            }
        }
    }

    fn operation_mismatch() -> StoreError {
        StoreError::field_validation("idempotencyKey", "idempotencyKey was already used for a different operation")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use crate::testing::TestContext;
    use serde_json::json;

    #[tokio::test]
    async fn catalog_types_coerce_query_values() {
        let ctx = TestContext::new();
        ctx.service.set_many_objs(&ctx.scope, Tag::Log, TestContext::items(vec![json!({"count": 3})])).await.unwrap();

        // "3" is coerced to the catalogued number type
        let page = ctx
            .service
            .get_many_objs(
                &ctx.scope,
                Tag::Log,
                GetManyRequest {
                    query: Some(FilterExpr::leaf("count", FilterOp::Eq, json!("3"))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, None);
    }

    #[tokio::test]
    async fn ordering_operator_on_string_field_is_rejected() {
        let ctx = TestContext::new();
        ctx.service.set_many_objs(&ctx.scope, Tag::Log, TestContext::items(vec![json!({"level": "info"})])).await.unwrap();

        let err = ctx
            .service
            .get_many_objs(
                &ctx.scope,
                Tag::Log,
                GetManyRequest {
                    query: Some(FilterExpr::leaf("level", FilterOp::Gt, json!(1))),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
    }

    #[tokio::test]
    async fn catalog_checks_can_be_disabled() {
        let mut config = AppConfig::development();
        config.catalog.validate_queries = false;
        let ctx = TestContext::with_config(config);
        ctx.service.set_many_objs(&ctx.scope, Tag::Log, TestContext::items(vec![json!({"level": "info"})])).await.unwrap();

        let page = ctx
            .service
            .get_many_objs(
                &ctx.scope,
                Tag::Log,
                GetManyRequest {
                    query: Some(FilterExpr::leaf("level", FilterOp::Gt, json!(1))),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn exact_mode_reports_total() {
        let ctx = TestContext::new();
        let items = TestContext::items(vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
        ctx.service.set_many_objs(&ctx.scope, Tag::Member, items).await.unwrap();
        let page = ctx
            .service
            .get_many_objs(&ctx.scope, Tag::Member, GetManyRequest { limit: Some(2), ..Default::default() })
            .await
            .unwrap();
        assert_eq!(page.total, Some(3));
        assert!(page.has_more);
        assert_eq!(page.items.len(), 2);

        let other = ctx
            .service
            .get_many_objs(&ctx.other_app(), Tag::Member, GetManyRequest::default())
            .await
            .unwrap();
        assert_eq!(other.total, Some(0));
    }

    #[tokio::test]
    async fn health_names_the_backend() {
        let status = TestContext::new().service.health().await.unwrap();
        assert_eq!(status.storage, StorageKind::Memory);
    }
}
