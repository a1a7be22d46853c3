//! Active-target resolution
//!
//! Each account has at most one care target it is currently operating
//! against. The choice lives under a per-account selection key, mirrored
//! on the account record. The account's linked list is authoritative:
//! a selection naming an unlinked group is ignored, and whenever links
//! exist but no usable selection does, the first linked group is chosen
//! and persisted.

use std::sync::Arc;

use carelink_core::{Account, CareTargetGroup, GroupId};

use crate::error::CareError;
use crate::identity::Session;
use crate::store::{keys, KeyLocks, KvStore, RecordStore, StoreResult};

/// Selection state of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActiveTarget {
    Unset,
    Set(GroupId),
}

impl ActiveTarget {
    pub fn group_id(&self) -> Option<&GroupId> {
        match self {
            ActiveTarget::Unset => None,
            ActiveTarget::Set(id) => Some(id),
        }
    }
}

/// The usable selection of `account`: the stored selection if linked,
/// else the account's own mirror if linked.
pub(crate) fn usable_selection(stored: Option<&str>, account: &Account) -> Option<GroupId> {
    stored
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(GroupId::from)
        .filter(|id| account.is_linked(id))
        .or_else(|| {
            account
                .active_group_id
                .clone()
                .filter(|id| account.is_linked(id))
        })
}

pub struct ActiveTargetResolver<S> {
    store: Arc<S>,
    records: RecordStore<S>,
    locks: KeyLocks,
}

impl<S: KvStore> ActiveTargetResolver<S> {
    pub fn new(store: Arc<S>, locks: KeyLocks) -> Self {
        Self {
            records: RecordStore::new(store.clone()),
            store,
            locks,
        }
    }

    /// Current selection, repairing it when links exist but no usable
    /// selection does
    pub async fn resolve(&self, session: &Session) -> StoreResult<ActiveTarget> {
        let selection_key = keys::active_selection(session.account_id());
        let _accounts = self.locks.lock(keys::ACCOUNTS).await;
        let _selection = self.locks.lock(&selection_key).await;

        let mut accounts = self.records.load_accounts().await?;
        let record = accounts
            .iter_mut()
            .find(|r| &r.account.id == session.account_id())
            .ok_or_else(|| CareError::Auth("session account no longer exists".to_string()))?;
        let account = &mut record.account;

        let stored = self.store.get(&selection_key).await?;
        let usable = usable_selection(stored.as_deref(), account);

        let chosen = match usable {
            Some(id) => id,
            None => match account.linked_group_ids.first() {
                Some(first) => {
                    tracing::info!(
                        account_id = %account.id,
                        group_id = %first,
                        "Active selection repaired"
                    );
                    first.clone()
                }
                None => {
                    if stored.is_some() {
                        self.discard_selection(&selection_key).await;
                    }
                    return Ok(ActiveTarget::Unset);
                }
            },
        };

        if stored.as_deref() != Some(chosen.as_str()) {
            // The caller still gets a usable selection when this write fails
            if let Err(e) = self.store.set(&selection_key, chosen.as_str()).await {
                tracing::warn!(account_id = %account.id, error = %e, "Could not persist active selection");
            }
        }
        if account.active_group_id.as_ref() != Some(&chosen) {
            account.active_group_id = Some(chosen.clone());
            if let Err(e) = self.records.save_accounts(&accounts).await {
                tracing::warn!(error = %e, "Could not mirror active selection on account");
            }
        }

        Ok(ActiveTarget::Set(chosen))
    }

    /// Select a linked group
    pub async fn set_active(&self, session: &Session, group_id: &GroupId) -> StoreResult<()> {
        let selection_key = keys::active_selection(session.account_id());
        let _accounts = self.locks.lock(keys::ACCOUNTS).await;
        let _selection = self.locks.lock(&selection_key).await;

        let mut accounts = self.records.load_accounts().await?;
        let record = accounts
            .iter_mut()
            .find(|r| &r.account.id == session.account_id())
            .ok_or_else(|| CareError::Auth("session account no longer exists".to_string()))?;
        if !record.account.is_linked(group_id) {
            return Err(CareError::Auth(format!("not linked to {}", group_id)));
        }

        record.account.active_group_id = Some(group_id.clone());
        self.records.save_accounts(&accounts).await?;
        self.store.set(&selection_key, group_id.as_str()).await?;

        tracing::info!(account_id = %session.account_id(), group_id = %group_id, "Active selection set");
        Ok(())
    }

    /// Forget the selection without touching links
    pub async fn clear_active(&self, session: &Session) -> StoreResult<()> {
        let selection_key = keys::active_selection(session.account_id());
        let _accounts = self.locks.lock(keys::ACCOUNTS).await;
        let _selection = self.locks.lock(&selection_key).await;

        let mut accounts = self.records.load_accounts().await?;
        if let Some(record) = accounts
            .iter_mut()
            .find(|r| &r.account.id == session.account_id())
        {
            if record.account.active_group_id.take().is_some() {
                self.records.save_accounts(&accounts).await?;
            }
        }
        self.store.remove(&selection_key).await?;

        tracing::info!(account_id = %session.account_id(), "Active selection cleared");
        Ok(())
    }

    /// The resolved group record, if any
    pub async fn active_group(&self, session: &Session) -> StoreResult<Option<CareTargetGroup>> {
        match self.resolve(session).await? {
            ActiveTarget::Set(id) => self.records.group_by_id(&id).await,
            ActiveTarget::Unset => Ok(None),
        }
    }

    async fn discard_selection(&self, selection_key: &str) {
        if let Err(e) = self.store.remove(selection_key).await {
            tracing::warn!(key = %selection_key, error = %e, "Could not remove stale selection");
        }
    }
}
