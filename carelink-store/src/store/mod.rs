//! Storage abstractions for the data layer

pub mod keys;
pub mod memory;
pub mod records;
pub mod sqlite;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;

use crate::error::CareError;

pub use memory::InMemoryKvStore;
pub use records::RecordStore;
pub use sqlite::SqliteStore;

/// Result type for store operations
pub type StoreResult<T> = Result<T, CareError>;

/// Durable asynchronous key-value store.
///
/// Each call is atomic with respect to itself only: there is no
/// multi-key transaction and no optimistic locking. Read-modify-write
/// sequences go through [`KeyLocks`].
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete `key`; deleting a missing key is not an error
    async fn remove(&self, key: &str) -> StoreResult<()>;

    /// List keys starting with `prefix`, sorted
    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;
}

#[async_trait]
impl<T: KvStore + ?Sized> KvStore for Arc<T> {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> StoreResult<()> {
        (**self).remove(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        (**self).keys_with_prefix(prefix).await
    }
}

/// In-process per-key mutexes serializing read-modify-write of a
/// logical entity. Clones share the same lock table.
///
/// Lock order when nesting: groups index, then accounts index, then a
/// per-account selection key.
#[derive(Debug, Clone, Default)]
pub struct KeyLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}
