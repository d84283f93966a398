// Ring 7: Audit Logger - structured change log for every committed write
use async_trait::async_trait;

use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::observer::traits::{Observer, ObserverRing};
use crate::types::Operation;

#[derive(Default)]
pub struct AuditLogger;

#[async_trait]
impl Observer for AuditLogger {
    fn name(&self) -> &'static str {
        "AuditLogger"
    }

    fn ring(&self) -> ObserverRing {
        ObserverRing::Audit
    }

    fn applies_to_operation(&self, op: Operation) -> bool {
        !matches!(op, Operation::Select)
    }

    async fn execute(&self, ctx: &ObserverContext) -> Result<(), ObserverError> {
        tracing::info!(
            target: "fimidx_store::audit",
            operation = ctx.operation.as_str(),
            tag = ctx.tag.as_str(),
            app_id = %ctx.scope.app_id,
            group_id = ctx.scope.group_id.as_deref().unwrap_or(""),
            actor = %ctx.actor.id,
            actor_type = ctx.actor.kind.as_str(),
            affected = ctx.affected,
            elapsed_ms = ctx.execution_time().as_millis() as u64,
            "write committed"
        );
        Ok(())
    }
}
