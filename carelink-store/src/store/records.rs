//! Typed access to the persisted indexes
//!
//! Loading runs the schema migration layer. Data that cannot be
//! salvaged is copied to a quarantine key before the remaining records
//! are returned, so one corrupt entry never blocks the rest of the store.

use std::sync::Arc;

use carelink_core::migration::{self, Migrated};
use carelink_core::{AccountId, AccountRecord, CareTargetGroup, GroupId, Prescription};
use serde::Serialize;

use super::{keys, KvStore, StoreResult};

/// Typed view over the accounts, groups and prescriptions indexes
pub struct RecordStore<S> {
    store: Arc<S>,
}

impl<S> Clone for RecordStore<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: KvStore> RecordStore<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn load_accounts(&self) -> StoreResult<Vec<AccountRecord>> {
        self.load(keys::ACCOUNTS, migration::migrate_accounts).await
    }

    pub async fn save_accounts(&self, accounts: &[AccountRecord]) -> StoreResult<()> {
        self.save(keys::ACCOUNTS, accounts).await
    }

    pub async fn account_by_id(&self, id: &AccountId) -> StoreResult<Option<AccountRecord>> {
        Ok(self
            .load_accounts()
            .await?
            .into_iter()
            .find(|r| &r.account.id == id))
    }

    pub async fn load_groups(&self) -> StoreResult<Vec<CareTargetGroup>> {
        self.load(keys::GROUPS, migration::migrate_groups).await
    }

    pub async fn save_groups(&self, groups: &[CareTargetGroup]) -> StoreResult<()> {
        self.save(keys::GROUPS, groups).await
    }

    pub async fn group_by_id(&self, id: &GroupId) -> StoreResult<Option<CareTargetGroup>> {
        Ok(self.load_groups().await?.into_iter().find(|g| &g.id == id))
    }

    pub async fn load_prescriptions(&self) -> StoreResult<Vec<Prescription>> {
        self.load(keys::PRESCRIPTIONS, migration::migrate_prescriptions)
            .await
    }

    pub async fn save_prescriptions(&self, prescriptions: &[Prescription]) -> StoreResult<()> {
        self.save(keys::PRESCRIPTIONS, prescriptions).await
    }

    /// Quarantine keys, oldest first within each source
    pub async fn quarantined(&self) -> StoreResult<Vec<String>> {
        self.store.keys_with_prefix(keys::QUARANTINE_PREFIX).await
    }

    async fn load<T>(&self, key: &str, migrate: fn(&str) -> Migrated<T>) -> StoreResult<Vec<T>> {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(Vec::new());
        };

        let migrated = migrate(&raw);
        if migrated.container_corrupt {
            tracing::warn!(key = %key, "Stored index is unreadable; loading it as empty");
            self.quarantine(key, &raw).await;
        } else if !migrated.rejected.is_empty() {
            tracing::warn!(
                key = %key,
                rejected = migrated.rejected.len(),
                "Dropping records that could not be migrated"
            );
            match serde_json::to_string(&migrated.rejected) {
                Ok(payload) => self.quarantine(key, &payload).await,
                Err(e) => tracing::warn!(key = %key, error = %e, "Could not encode rejected records"),
            }
        }
        Ok(migrated.records)
    }

    async fn save<T: Serialize>(&self, key: &str, records: &[T]) -> StoreResult<()> {
        let raw = serde_json::to_string(records)?;
        self.store.set(key, &raw).await?;
        tracing::debug!(key = %key, count = records.len(), "Saved index");
        Ok(())
    }

    /// Best-effort copy of unsalvageable data
    async fn quarantine(&self, source: &str, payload: &str) {
        if let Err(e) = self.set_aside(source, payload).await {
            tracing::warn!(key = %source, error = %e, "Could not write quarantine entry");
        }
    }

    /// Copy `payload` under a quarantine key for `source`. Identical
    /// payloads from repeated calls are written once.
    pub(crate) async fn set_aside(&self, source: &str, payload: &str) -> StoreResult<()> {
        let prefix = keys::quarantine_prefix(source);
        for qkey in self.store.keys_with_prefix(&prefix).await? {
            if self.store.get(&qkey).await?.as_deref() == Some(payload) {
                return Ok(());
            }
        }

        let qkey = format!(
            "{}{}",
            prefix,
            carelink_core::now_millis().timestamp_millis()
        );
        self.store.set(&qkey, payload).await?;
        tracing::warn!(key = %source, quarantine = %qkey, "Quarantined unreadable data");
        Ok(())
    }
}
