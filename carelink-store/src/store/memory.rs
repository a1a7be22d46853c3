//! In-memory key-value store

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{KvStore, StoreResult};
use crate::error::CareError;

/// In-memory key-value store, for tests and ephemeral sessions
pub struct InMemoryKvStore {
    entries: RwLock<HashMap<String, String>>,
    fail_writes: AtomicBool,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every subsequent `set`/`remove` fail with a storage error
    /// (for exercising write-failure paths)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_writable(&self, key: &str) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CareError::Storage(format!("write to {} rejected", key)));
        }
        Ok(())
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check_writable(key)?;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        self.check_writable(key)?;
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = InMemoryKvStore::new();

        store.set("careapp_a", "1").await.unwrap();
        assert_eq!(store.get("careapp_a").await.unwrap().as_deref(), Some("1"));

        store.remove("careapp_a").await.unwrap();
        assert!(store.get("careapp_a").await.unwrap().is_none());

        // Removing again is fine
        store.remove("careapp_a").await.unwrap();
    }

    #[tokio::test]
    async fn test_keys_with_prefix_sorted() {
        let store = InMemoryKvStore::new();
        store.set("careapp_b", "").await.unwrap();
        store.set("careapp_a", "").await.unwrap();
        store.set("other", "").await.unwrap();

        let keys = store.keys_with_prefix("careapp_").await.unwrap();
        assert_eq!(keys, vec!["careapp_a", "careapp_b"]);
    }

    #[tokio::test]
    async fn test_failing_writes() {
        let store = InMemoryKvStore::new();
        store.set("k", "v").await.unwrap();
        store.set_fail_writes(true);

        assert!(matches!(store.set("k", "w").await, Err(CareError::Storage(_))));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }
}
