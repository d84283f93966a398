// Observer implementations organized by rings

// Ring 6: Post-Database - catalog indexing (moves to ring 8 when deferred)
#[path = "6/field_indexer.rs"]
pub mod field_indexer;

// Ring 7: Audit - change logging
#[path = "7/audit_logger.rs"]
pub mod audit_logger;

pub use audit_logger::*;
pub use field_indexer::*;

use std::sync::Arc;

use crate::catalog::FieldCatalog;
use crate::config::CatalogConfig;
use crate::observer::pipeline::ObserverPipeline;

/// Register the observers every service runs with
pub fn register_default_observers(
    pipeline: &mut ObserverPipeline,
    catalog: FieldCatalog,
    config: &CatalogConfig,
) {
    if config.enabled {
        pipeline.register_observer(Arc::new(FieldIndexer::new(catalog, config.deferred)));
    }
    pipeline.register_observer(Arc::new(AuditLogger));
}
