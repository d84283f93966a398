use async_trait::async_trait;
use std::time::Duration;

use crate::observer::context::ObserverContext;
use crate::observer::error::ObserverError;
use crate::types::{Operation, Tag};

/// Observer rings that run after a successful write - synchronous (6) and asynchronous (7-8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ObserverRing {
    PostDatabase = 6, // Immediate processing after the write, before the caller returns
    Audit = 7,        // Change tracking (async)
    Integration = 8,  // Side indexes maintained off the request path (async)
}

impl ObserverRing {
    pub const ALL: [ObserverRing; 3] = [ObserverRing::PostDatabase, ObserverRing::Audit, ObserverRing::Integration];

    /// Check if ring executes synchronously (blocking)
    pub fn is_synchronous(&self) -> bool {
        (*self as u8) <= 6
    }

    /// Check if ring executes asynchronously (non-blocking)
    pub fn is_asynchronous(&self) -> bool {
        (*self as u8) >= 7
    }
}

/// Post-write hook. Failures never roll back the write; the pipeline
/// turns them into warnings.
#[async_trait]
pub trait Observer: Send + Sync {
    /// Observer name for logging and debugging
    fn name(&self) -> &'static str;

    /// Which ring this observer belongs to
    fn ring(&self) -> ObserverRing;

    /// Check if observer applies to this operation
    fn applies_to_operation(&self, op: Operation) -> bool;

    /// Check if observer applies to this tag
    fn applies_to_tag(&self, _tag: Tag) -> bool {
        true
    }

    /// Execution timeout (default 5 seconds)
    fn timeout(&self) -> Duration {
        Duration::from_secs(5)
    }

    async fn execute(&self, ctx: &ObserverContext) -> Result<(), ObserverError>;
}
