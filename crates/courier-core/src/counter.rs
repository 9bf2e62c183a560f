use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::CounterStoreError;

/// Shared key/value counter contract used by cluster-safe id generation.
///
/// Every operation is a single atomic round trip against the backing store;
/// implementations must never lose an update under concurrent callers.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Returns the current value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<u64>, CounterStoreError>;

    /// Stores `value` only when `key` is absent. Returns whether it was stored.
    async fn put_if_absent(&self, key: &str, value: u64) -> Result<bool, CounterStoreError>;

    /// Replaces `expected` with `new`. Returns `false` when the stored value
    /// was absent or differed from `expected`.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: u64,
        new: u64,
    ) -> Result<bool, CounterStoreError>;
}

/// Process-local counter store for single-node deployments and tests.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    values: Mutex<HashMap<String, u64>>,
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, CounterStoreError> {
        let values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        Ok(values.get(key).copied())
    }

    async fn put_if_absent(&self, key: &str, value: u64) -> Result<bool, CounterStoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        if values.contains_key(key) {
            return Ok(false);
        }
        values.insert(key.to_string(), value);
        Ok(true)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: u64,
        new: u64,
    ) -> Result<bool, CounterStoreError> {
        let mut values = self.values.lock().unwrap_or_else(|e| e.into_inner());
        match values.get_mut(key) {
            Some(current) if *current == expected => {
                *current = new;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CounterStore, InMemoryCounterStore};

    #[tokio::test]
    async fn put_if_absent_only_stores_once() {
        let store = InMemoryCounterStore::new();
        assert!(store.put_if_absent("k", 3).await.unwrap());
        assert!(!store.put_if_absent("k", 9).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn compare_and_swap_requires_matching_value() {
        let store = InMemoryCounterStore::new();
        assert!(!store.compare_and_swap("k", 0, 1).await.unwrap());
        store.put_if_absent("k", 5).await.unwrap();
        assert!(!store.compare_and_swap("k", 4, 6).await.unwrap());
        assert!(store.compare_and_swap("k", 5, 6).await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), Some(6));
    }
}
