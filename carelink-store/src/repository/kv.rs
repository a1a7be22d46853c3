//! Prescription repository over the key-value store

use std::sync::Arc;

use async_trait::async_trait;
use carelink_core::{GroupId, NewPrescription, Prescription, PrescriptionId, PrescriptionPatch};

use super::PrescriptionRepository;
use crate::error::CareError;
use crate::store::{keys, KeyLocks, KvStore, RecordStore, StoreResult};

/// Keeps every record in one index under the prescriptions key,
/// newest first
pub struct KvPrescriptionRepository<S> {
    records: RecordStore<S>,
    locks: KeyLocks,
}

impl<S: KvStore> KvPrescriptionRepository<S> {
    pub fn new(store: Arc<S>, locks: KeyLocks) -> Self {
        Self {
            records: RecordStore::new(store),
            locks,
        }
    }
}

/// Newest first; the index is kept newest first, so a stable sort
/// leaves same-millisecond records in insertion order (newer first).
fn sort_newest_first(records: &mut [Prescription]) {
    records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl<S: KvStore> PrescriptionRepository for KvPrescriptionRepository<S> {
    async fn create(&self, input: NewPrescription) -> StoreResult<PrescriptionId> {
        let _guard = self.locks.lock(keys::PRESCRIPTIONS).await;
        let mut all = self.records.load_prescriptions().await?;

        let mut id = PrescriptionId::generate();
        while all.iter().any(|rx| rx.id == id) {
            id = PrescriptionId::generate();
        }
        let record = Prescription::from_new(id.clone(), input);
        let care_target_id = record.care_target_id.clone();
        all.insert(0, record);
        self.records.save_prescriptions(&all).await?;

        tracing::info!(prescription_id = %id, care_target_id = %care_target_id, "Prescription created");
        Ok(id)
    }

    async fn update(&self, id: &PrescriptionId, patch: PrescriptionPatch) -> StoreResult<()> {
        let _guard = self.locks.lock(keys::PRESCRIPTIONS).await;
        let mut all = self.records.load_prescriptions().await?;

        let record = all
            .iter_mut()
            .find(|rx| &rx.id == id)
            .ok_or_else(|| CareError::NotFound(format!("prescription {}", id)))?;
        record.apply_patch(patch);
        self.records.save_prescriptions(&all).await?;

        tracing::info!(prescription_id = %id, "Prescription updated");
        Ok(())
    }

    async fn list_by_care_target(
        &self,
        care_target_id: &GroupId,
    ) -> StoreResult<Vec<Prescription>> {
        let mut matching: Vec<Prescription> = self
            .records
            .load_prescriptions()
            .await?
            .into_iter()
            .filter(|rx| &rx.care_target_id == care_target_id)
            .collect();
        sort_newest_first(&mut matching);
        Ok(matching)
    }

    async fn get_by_id(&self, id: &PrescriptionId) -> StoreResult<Option<Prescription>> {
        Ok(self
            .records
            .load_prescriptions()
            .await?
            .into_iter()
            .find(|rx| &rx.id == id))
    }

    async fn delete(&self, id: &PrescriptionId) -> StoreResult<()> {
        let _guard = self.locks.lock(keys::PRESCRIPTIONS).await;
        let mut all = self.records.load_prescriptions().await?;

        let before = all.len();
        all.retain(|rx| &rx.id != id);
        if all.len() != before {
            self.records.save_prescriptions(&all).await?;
            tracing::info!(prescription_id = %id, "Prescription deleted");
        }
        Ok(())
    }

    async fn purge(&self) -> StoreResult<usize> {
        let _guard = self.locks.lock(keys::PRESCRIPTIONS).await;
        let count = self.records.load_prescriptions().await?.len();
        self.records.save_prescriptions(&[]).await?;
        Ok(count)
    }
}
