// Ring 6: Field Indexer - records every (path, type) a write produced in the field catalog
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::infer::{flatten, FlatField};
use crate::catalog::FieldCatalog;
use crate::models::TenantScope;
use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::traits::{Observer, ObserverRing};
use crate::types::Operation;

/// Keeps the field catalog in step with stored data. Best-effort: a failure
/// here leaves the write in place and the catalog slightly behind.
pub struct FieldIndexer {
    catalog: FieldCatalog,
    deferred: bool,
}

impl FieldIndexer {
    pub fn new(catalog: FieldCatalog, deferred: bool) -> Self {
        Self { catalog, deferred }
    }

    /// Union of flattened fields per owning scope
    fn collect(ctx: &ObserverContext) -> BTreeMap<(String, Option<String>), BTreeSet<FlatField>> {
        let mut by_scope: BTreeMap<(String, Option<String>), BTreeSet<FlatField>> = BTreeMap::new();
        for obj in &ctx.objs {
            by_scope
                .entry((obj.app_id.clone(), obj.group_id.clone()))
                .or_default()
                .extend(flatten(&obj.data));
        }
        by_scope
    }
}

#[async_trait]
impl Observer for FieldIndexer {
    fn name(&self) -> &'static str {
        "FieldIndexer"
    }

    fn ring(&self) -> ObserverRing {
        if self.deferred {
            ObserverRing::Integration
        } else {
            ObserverRing::PostDatabase
        }
    }

    fn applies_to_operation(&self, op: Operation) -> bool {
        matches!(op, Operation::Set | Operation::Update)
    }

    async fn execute(&self, ctx: &ObserverContext) -> Result<(), ObserverError> {
        for ((app_id, group_id), fields) in Self::collect(ctx) {
            let scope = TenantScope { app_id, group_id };
            let fields: Vec<FlatField> = fields.into_iter().collect();
            self.catalog.record_fields(&scope, ctx.tag, &fields).await?;
            tracing::debug!("Indexed {} fields for {} in app {}", fields.len(), ctx.tag, scope.app_id);
        }
        Ok(())
    }
}
