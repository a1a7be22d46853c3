//! Application context wiring the data layer together

use std::sync::Arc;

use carelink_core::analysis::to_new_prescription;
use carelink_core::{PasswordPolicy, PrescriptionId};

use crate::active::{ActiveTarget, ActiveTargetResolver};
use crate::analysis::{AnalysisError, PrescriptionAnalyzer};
use crate::config::Config;
use crate::error::CareError;
use crate::identity::{IdentityManager, Session};
use crate::linking::LinkEngine;
use crate::repository::{KvPrescriptionRepository, PrescriptionRepository};
use crate::store::{keys, KeyLocks, KvStore, RecordStore, StoreResult};

/// Shared application state.
///
/// Every component holds the same store handle and the same lock
/// table, so read-modify-write sequences from different components on
/// one key are serialized.
pub struct CareApp<S, R = KvPrescriptionRepository<S>> {
    store: Arc<S>,
    config: Config,
    locks: KeyLocks,
    identity: IdentityManager<S>,
    linking: LinkEngine<S>,
    resolver: ActiveTargetResolver<S>,
    prescriptions: R,
    analyzer: Option<Arc<dyn PrescriptionAnalyzer>>,
}

impl<S: KvStore> CareApp<S> {
    /// Context keeping prescriptions in the key-value store
    pub fn new(store: Arc<S>, config: Config) -> Self {
        let locks = KeyLocks::new();
        let prescriptions = KvPrescriptionRepository::new(store.clone(), locks.clone());
        Self::assemble(store, prescriptions, locks, config)
    }

    /// Build the context, absorb legacy data and restore the persisted session
    pub async fn open(store: Arc<S>, config: Config) -> StoreResult<(Self, Option<Session>)> {
        let app = Self::new(store, config);
        let session = app.start().await?;
        Ok((app, session))
    }
}

impl<S: KvStore, R: PrescriptionRepository> CareApp<S, R> {
    /// Context with a separate prescription backend
    pub fn with_repository(store: Arc<S>, prescriptions: R, config: Config) -> Self {
        Self::assemble(store, prescriptions, KeyLocks::new(), config)
    }

    fn assemble(store: Arc<S>, prescriptions: R, locks: KeyLocks, config: Config) -> Self {
        Self {
            identity: IdentityManager::new(
                store.clone(),
                locks.clone(),
                PasswordPolicy::new(config.min_password_len),
                config.bcrypt_cost,
            ),
            linking: LinkEngine::new(store.clone(), locks.clone(), config.invite_code_attempts),
            resolver: ActiveTargetResolver::new(store.clone(), locks.clone()),
            store,
            config,
            locks,
            prescriptions,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn PrescriptionAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    /// Absorb the legacy link map, then restore the persisted session.
    /// Marks identity ready even when absorption fails.
    pub async fn start(&self) -> StoreResult<Option<Session>> {
        if let Err(e) = self.linking.absorb_legacy_links().await {
            tracing::warn!(error = %e, "Could not absorb legacy link map");
        }
        self.identity.restore().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> &IdentityManager<S> {
        &self.identity
    }

    pub fn linking(&self) -> &LinkEngine<S> {
        &self.linking
    }

    pub fn resolver(&self) -> &ActiveTargetResolver<S> {
        &self.resolver
    }

    pub fn prescriptions(&self) -> &R {
        &self.prescriptions
    }

    /// Quarantine entries awaiting operator attention
    pub async fn quarantined(&self) -> StoreResult<Vec<String>> {
        RecordStore::new(self.store.clone()).quarantined().await
    }

    /// Raw payload of one quarantine entry
    pub async fn quarantine_entry(&self, key: &str) -> StoreResult<Option<String>> {
        if !key.starts_with(keys::QUARANTINE_PREFIX) {
            return Err(CareError::Validation(format!(
                "{} is not a quarantine entry",
                key
            )));
        }
        self.store.get(key).await
    }

    /// Remove every record this data layer owns: accounts, groups,
    /// selections, session, prescriptions and quarantine entries.
    /// Returns the number of keys removed.
    pub async fn reset_all_data(&self) -> StoreResult<usize> {
        let _groups = self.locks.lock(keys::GROUPS).await;
        let _accounts = self.locks.lock(keys::ACCOUNTS).await;

        let purged = self.prescriptions.purge().await?;
        let owned = self.store.keys_with_prefix(keys::NAMESPACE).await?;
        for key in &owned {
            self.store.remove(key).await?;
        }

        tracing::warn!(keys = owned.len(), prescriptions = purged, "All local data reset");
        Ok(owned.len())
    }

    /// Analyze a prescription image and store the result under the
    /// session's active care target
    pub async fn submit_analysis(
        &self,
        session: &Session,
        image_ref: &str,
    ) -> StoreResult<PrescriptionId> {
        let ActiveTarget::Set(care_target_id) = self.resolver.resolve(session).await? else {
            return Err(CareError::Auth(
                "not linked to any care target".to_string(),
            ));
        };
        let analyzer = self
            .analyzer
            .as_ref()
            .ok_or(CareError::Analysis(AnalysisError::NotConfigured))?;

        let payload = analyzer.analyze(image_ref).await?;
        let input = to_new_prescription(payload, care_target_id, Some(image_ref.to_string()));
        self.prescriptions.create(input).await
    }
}
