//! Caller-keyed replay of mutations.
//!
//! Completed results are stored through the backend, so every instance that
//! shares a store replays the same answer. Within one process, calls on the
//! same `(tenantScope, tag, key)` also queue behind a per-key lock and run the
//! mutation once. Only successful results are stored; a failed call can be
//! retried with the same key.

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::IdempotencyConfig;
use crate::models::{now, TenantScope};
use crate::storage::{IdempotencyKey, IdempotencyRecord, ObjBackend, StoreError};
use crate::types::{Operation, Tag};

type KeyLock = Arc<Mutex<()>>;

/// Longest retention honored; larger settings are clamped
const MAX_RETENTION_SECS: u64 = 100 * 365 * 24 * 60 * 60;

pub struct IdempotencyCache<T> {
    backend: Arc<dyn ObjBackend>,
    locks: Mutex<HashMap<IdempotencyKey, KeyLock>>,
    retention: Duration,
    max_entries: usize,
    _result: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> IdempotencyCache<T> {
    pub fn new(backend: Arc<dyn ObjBackend>, config: &IdempotencyConfig) -> Self {
        Self {
            backend,
            locks: Mutex::new(HashMap::new()),
            retention: Duration::seconds(config.retention_secs.min(MAX_RETENTION_SECS) as i64),
            max_entries: config.max_entries.max(1),
            _result: PhantomData,
        }
    }

    /// SHA-256 over the operation name and the serialized request
    pub fn fingerprint<R: Serialize + ?Sized>(operation: Operation, request: &R) -> Result<String, StoreError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| StoreError::validation(format!("Request cannot be fingerprinted: {}", e)))?;
        let mut hasher = Sha256::new();
        hasher.update(operation.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(&body);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Run `execute` unless a live result is already stored under `key`.
    /// Without a key the call always executes.
    pub async fn run<R, F, Fut>(
        &self,
        scope: &TenantScope,
        tag: Tag,
        key: Option<&str>,
        operation: Operation,
        request: &R,
        execute: F,
    ) -> Result<T, StoreError>
    where
        R: Serialize + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let key = match key {
            Some(key) => key,
            None => return execute().await,
        };
        if key.trim().is_empty() {
            return Err(StoreError::field_validation("idempotencyKey", "idempotencyKey cannot be empty"));
        }

        let fingerprint = Self::fingerprint(operation, request)?;
        let record_key = IdempotencyKey { scope: scope.clone(), tag, key: key.to_string() };
        let lock = self.lock(&record_key).await;
        let _held = lock.lock().await;

        if let Some(existing) = self.backend.find_idempotency(&record_key).await? {
            if now() - existing.created_at < self.retention {
                if existing.fingerprint != fingerprint {
                    return Err(StoreError::field_validation(
                        "idempotencyKey",
                        "idempotencyKey was already used for a different request",
                    ));
                }
                tracing::debug!("Replaying {} result for idempotency key {}", operation.as_str(), key);
                return serde_json::from_value(existing.result)
                    .map_err(|e| StoreError::storage(format!("Stored idempotent result is unreadable: {}", e)));
            }
        }

        let result = execute().await?;
        self.remember(record_key, fingerprint, &result).await;
        Ok(result)
    }

    /// Keys with a per-key lock currently allocated in this process
    pub async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// The mutation already committed, so a failed write here is logged and
    /// the fresh result is still returned.
    async fn remember(&self, key: IdempotencyKey, fingerprint: String, result: &T) {
        let value = match serde_json::to_value(result) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!("Idempotent result for key {} cannot be serialized: {}", key.key, e);
                return;
            }
        };
        let at = now();
        if let Some(cutoff) = at.checked_sub_signed(self.retention) {
            match self.backend.purge_idempotency(cutoff).await {
                Ok(0) => {}
                Ok(purged) => tracing::debug!("Purged {} expired idempotency records", purged),
                Err(e) => tracing::warn!("Failed to purge expired idempotency records: {}", e),
            }
        }
        let record = IdempotencyRecord { key, fingerprint, result: value, created_at: at };
        if let Err(e) = self.backend.save_idempotency(&record).await {
            tracing::warn!("Failed to store idempotent result for key {}: {}", record.key.key, e);
        }
    }

    async fn lock(&self, key: &IdempotencyKey) -> KeyLock {
        let mut locks = self.locks.lock().await;
        if locks.len() >= self.max_entries && !locks.contains_key(key) {
            // Locks nobody else holds can be rebuilt on demand
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            tracing::debug!("Idempotency lock table holds {} keys after pruning", locks.len());
        }
        locks.entry(key.clone()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache_over(store: Arc<MemoryStore>, retention_secs: u64, max_entries: usize) -> IdempotencyCache<u64> {
        IdempotencyCache::new(store, &IdempotencyConfig { retention_secs, max_entries })
    }

    fn cache(retention_secs: u64, max_entries: usize) -> IdempotencyCache<u64> {
        cache_over(Arc::new(MemoryStore::new()), retention_secs, max_entries)
    }

    async fn counted(cache: &IdempotencyCache<u64>, calls: &AtomicUsize, key: Option<&str>, body: serde_json::Value) -> Result<u64, StoreError> {
        cache
            .run(&TenantScope::app("a"), Tag::Callback, key, Operation::Delete, &body, move || async move {
                Ok(calls.fetch_add(1, Ordering::SeqCst) as u64 + 1)
            })
            .await
    }

    #[tokio::test]
    async fn replays_the_first_result() {
        let cache = cache(60, 10);
        let calls = AtomicUsize::new(0);
        assert_eq!(counted(&cache, &calls, Some("k"), json!({"id": 1})).await.unwrap(), 1);
        assert_eq!(counted(&cache, &calls, Some("k"), json!({"id": 1})).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // No key, no caching
        counted(&cache, &calls, None, json!({"id": 1})).await.unwrap();
        counted(&cache, &calls, None, json!({"id": 1})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejects_key_reuse_with_a_different_request() {
        let cache = cache(60, 10);
        let calls = AtomicUsize::new(0);
        counted(&cache, &calls, Some("k"), json!({"id": 1})).await.unwrap();
        let err = counted(&cache, &calls, Some("k"), json!({"id": 2})).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));
        assert!(counted(&cache, &calls, Some(" "), json!({})).await.is_err());
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache = cache(60, 10);
        let scope = TenantScope::app("a");
        let failed = cache
            .run(&scope, Tag::Log, Some("k"), Operation::Set, &json!({}), || async {
                Err::<u64, _>(StoreError::storage("down"))
            })
            .await;
        assert!(failed.is_err());
        let ok = cache
            .run(&scope, Tag::Log, Some("k"), Operation::Set, &json!({}), || async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn results_are_shared_through_the_store() {
        let store = Arc::new(MemoryStore::new());
        let first = cache_over(store.clone(), 60, 10);
        let second = cache_over(store.clone(), 60, 10);
        let calls = AtomicUsize::new(0);

        assert_eq!(counted(&first, &calls, Some("k"), json!({"id": 1})).await.unwrap(), 1);
        assert_eq!(counted(&second, &calls, Some("k"), json!({"id": 1})).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let err = counted(&second, &calls, Some("k"), json!({"id": 2})).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation { .. }));

        let key = IdempotencyKey { scope: TenantScope::app("a"), tag: Tag::Callback, key: "k".to_string() };
        let record = store.find_idempotency(&key).await.unwrap().unwrap();
        assert_eq!(record.result, json!(1));
    }

    #[tokio::test]
    async fn expired_records_rerun_and_idle_locks_are_pruned() {
        let expired = cache(0, 10);
        let calls = AtomicUsize::new(0);
        counted(&expired, &calls, Some("k"), json!({})).await.unwrap();
        counted(&expired, &calls, Some("k"), json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let small = cache(60, 1);
        let calls = AtomicUsize::new(0);
        counted(&small, &calls, Some("a"), json!({})).await.unwrap();
        counted(&small, &calls, Some("b"), json!({})).await.unwrap();
        assert_eq!(small.len().await, 1);
        // Pruning a lock never drops the stored result
        counted(&small, &calls, Some("a"), json!({})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn fingerprints_depend_on_operation_and_body() {
        let body = json!({"query": {"field": "id", "op": "eq", "value": "x"}});
        let a = IdempotencyCache::<u64>::fingerprint(Operation::Delete, &body).unwrap();
        let b = IdempotencyCache::<u64>::fingerprint(Operation::Update, &body).unwrap();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
    }
}
