// Observer pipeline: runs post-write observers in ring order

use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::timeout;

use crate::observer::context::ObserverContext;
use crate::observer::error::{ObserverError, ObserverWarning};
use crate::observer::traits::{Observer, ObserverRing};

/// Executes registered observers after a write has committed. Synchronous
/// rings finish before the caller returns; asynchronous rings are spawned.
/// No observer failure ever propagates as an error.
#[derive(Default)]
pub struct ObserverPipeline {
    // Observer registry by ring
    observers: HashMap<ObserverRing, Vec<Arc<dyn Observer>>>,
}

impl ObserverPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_observer(&mut self, observer: Arc<dyn Observer>) {
        let ring = observer.ring();
        let name = observer.name();
        self.observers.entry(ring).or_default().push(observer);

        tracing::debug!("Registered observer '{}' for ring {:?}", name, ring);
    }

    pub fn is_empty(&self) -> bool {
        self.observers.values().all(Vec::is_empty)
    }

    /// Run every applicable observer; returns warnings from the synchronous rings
    pub async fn execute(&self, ctx: ObserverContext) -> Vec<ObserverWarning> {
        let ctx = Arc::new(ctx);
        let mut warnings = Vec::new();

        for ring in ObserverRing::ALL.iter().filter(|r| r.is_synchronous()) {
            for observer in self.applicable(*ring, &ctx) {
                if let Some(warning) = run_observer(observer.as_ref(), &ctx).await {
                    warnings.push(warning);
                }
            }
        }

        self.execute_async_rings(ctx);
        warnings
    }

    fn applicable(&self, ring: ObserverRing, ctx: &ObserverContext) -> Vec<Arc<dyn Observer>> {
        self.observers
            .get(&ring)
            .map(|observers| {
                observers
                    .iter()
                    .filter(|o| o.applies_to_operation(ctx.operation) && o.applies_to_tag(ctx.tag))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Execute asynchronous rings in parallel on a background task
    fn execute_async_rings(&self, ctx: Arc<ObserverContext>) {
        let observers: Vec<Arc<dyn Observer>> = ObserverRing::ALL
            .iter()
            .filter(|r| r.is_asynchronous())
            .flat_map(|ring| self.applicable(*ring, &ctx))
            .collect();
        if observers.is_empty() {
            return;
        }

        tokio::spawn(async move {
            let runs = observers.iter().map(|observer| run_observer(observer.as_ref(), &ctx));
            let failures = join_all(runs).await.into_iter().flatten().count();
            if failures > 0 {
                tracing::warn!("{} async observers failed for {:?} {}", failures, ctx.operation, ctx.tag);
            }
        });
    }
}

/// Execute one observer with timeout protection
async fn run_observer(observer: &dyn Observer, ctx: &ObserverContext) -> Option<ObserverWarning> {
    let observer_start = Instant::now();
    let result = timeout(observer.timeout(), observer.execute(ctx)).await;
    let execution_time = observer_start.elapsed();

    let error = match result {
        Ok(Ok(())) => {
            tracing::debug!("Observer: {} completed successfully in {:?}", observer.name(), execution_time);
            return None;
        }
        Ok(Err(error)) => error,
        Err(_timeout) => ObserverError::TimeoutError(format!(
            "Observer {} timed out after {:?}",
            observer.name(),
            observer.timeout()
        )),
    };

    tracing::warn!("Observer: {} failed in {:?}: {}", observer.name(), execution_time, error);
    Some(ObserverWarning::new(observer.name(), observer.ring(), error.to_string()))
}
