//! Storage-agnostic prescription repository
//!
//! Callers talk to [`PrescriptionRepository`] and never learn whether the
//! records live in the local key-value store, a SQLite table or a hosted
//! document database.
//!
//! The repository is a plain store, not an authorization boundary: it
//! does not check that a care target is linked to whoever is calling.

pub mod kv;

use std::sync::Arc;

use async_trait::async_trait;
use carelink_core::{
    GroupId, NewPrescription, Prescription, PrescriptionId, PrescriptionItem, PrescriptionPatch,
    TimeOfDay,
};

use crate::store::StoreResult;

pub use kv::KvPrescriptionRepository;

/// An item scheduled at a given time of day, with its parent record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledItem {
    pub prescription_id: PrescriptionId,
    pub item: PrescriptionItem,
}

#[async_trait]
pub trait PrescriptionRepository: Send + Sync {
    /// Store a new record, assigning ids and `created_at`; returns the new id
    async fn create(&self, input: NewPrescription) -> StoreResult<PrescriptionId>;

    /// Merge `patch` into an existing record. A supplied item list
    /// replaces the old one and every item gets a fresh id.
    async fn update(&self, id: &PrescriptionId, patch: PrescriptionPatch) -> StoreResult<()>;

    /// Records for one care target, newest first
    async fn list_by_care_target(&self, care_target_id: &GroupId)
        -> StoreResult<Vec<Prescription>>;

    /// Never fails for a missing id
    async fn get_by_id(&self, id: &PrescriptionId) -> StoreResult<Option<Prescription>>;

    /// Remove a record unconditionally (no tombstone)
    async fn delete(&self, id: &PrescriptionId) -> StoreResult<()>;

    /// Remove every record; used by bulk data reset. Returns how many were removed.
    async fn purge(&self) -> StoreResult<usize>;

    /// Every item of a care target taken at `time`, newest record first
    async fn items_taken_at(
        &self,
        care_target_id: &GroupId,
        time: TimeOfDay,
    ) -> StoreResult<Vec<ScheduledItem>> {
        let records = self.list_by_care_target(care_target_id).await?;
        Ok(records
            .into_iter()
            .flat_map(|rx| {
                let prescription_id = rx.id;
                rx.items
                    .into_iter()
                    .filter(move |item| item.times_of_day.contains(time))
                    .map(move |item| ScheduledItem {
                        prescription_id: prescription_id.clone(),
                        item,
                    })
            })
            .collect())
    }
}

#[async_trait]
impl<T: PrescriptionRepository + ?Sized> PrescriptionRepository for Arc<T> {
    async fn create(&self, input: NewPrescription) -> StoreResult<PrescriptionId> {
        (**self).create(input).await
    }

    async fn update(&self, id: &PrescriptionId, patch: PrescriptionPatch) -> StoreResult<()> {
        (**self).update(id, patch).await
    }

    async fn list_by_care_target(
        &self,
        care_target_id: &GroupId,
    ) -> StoreResult<Vec<Prescription>> {
        (**self).list_by_care_target(care_target_id).await
    }

    async fn get_by_id(&self, id: &PrescriptionId) -> StoreResult<Option<Prescription>> {
        (**self).get_by_id(id).await
    }

    async fn delete(&self, id: &PrescriptionId) -> StoreResult<()> {
        (**self).delete(id).await
    }

    async fn purge(&self) -> StoreResult<usize> {
        (**self).purge().await
    }
}
