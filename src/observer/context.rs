use std::time::Instant;

use crate::models::{Actor, Obj, TenantScope};
use crate::types::{Operation, Tag};

/// What a completed write hands to its observers. Shared read-only, so
/// asynchronous rings can hold it after the caller has returned.
#[derive(Debug, Clone)]
pub struct ObserverContext {
    pub operation: Operation,
    pub scope: TenantScope,
    pub tag: Tag,
    pub actor: Actor,

    /// Objects as persisted by the write (empty for deletes)
    pub objs: Vec<Obj>,

    /// Number of objects the write touched
    pub affected: u64,

    pub start_time: Instant,
}

impl ObserverContext {
    pub fn new(operation: Operation, scope: TenantScope, tag: Tag, actor: Actor) -> Self {
        Self {
            operation,
            scope,
            tag,
            actor,
            objs: Vec::new(),
            affected: 0,
            start_time: Instant::now(),
        }
    }

    pub fn with_objs(mut self, objs: Vec<Obj>) -> Self {
        self.affected = objs.len() as u64;
        self.objs = objs;
        self
    }

    pub fn with_affected(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    /// Get total execution time
    pub fn execution_time(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }
}
