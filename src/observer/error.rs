use thiserror::Error;

use crate::observer::traits::ObserverRing;
use crate::storage::StoreError;

/// Observer system errors with structured error types
#[derive(Debug, Error, Clone)]
pub enum ObserverError {
    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Timeout error: {0}")]
    TimeoutError(String),

    #[error("System error: {0}")]
    SystemError(String),
}

/// Observer warnings (non-fatal issues)
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverWarning {
    pub observer: String,
    pub ring: u8,
    pub message: String,
}

impl ObserverWarning {
    pub fn new(observer: &str, ring: ObserverRing, message: String) -> Self {
        Self {
            observer: observer.to_string(),
            ring: ring as u8,
            message,
        }
    }
}

impl From<StoreError> for ObserverError {
    fn from(error: StoreError) -> Self {
        ObserverError::StorageError(error.to_string())
    }
}
