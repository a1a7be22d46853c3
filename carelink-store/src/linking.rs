//! Care-target groups and invite-code linking
//!
//! An account's `linked_group_ids` is the only stored form of the link
//! relation. The group-side view (who is linked to a group) is derived
//! from the accounts index on read, so there is never a second copy to
//! keep in step.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use carelink_core::invite::generate_unique;
use carelink_core::{
    migration, Account, AccountId, AccountRecord, CareTargetGroup, GroupId, InviteCode,
};

use crate::active::usable_selection;
use crate::error::CareError;
use crate::identity::Session;
use crate::store::{keys, KeyLocks, KvStore, RecordStore, StoreResult};

/// Result of joining a group by invite code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOutcome {
    pub group: CareTargetGroup,
    /// The account was linked before this call
    pub already_linked: bool,
    /// The group became the account's active selection
    pub became_active: bool,
}

pub struct LinkEngine<S> {
    store: Arc<S>,
    records: RecordStore<S>,
    locks: KeyLocks,
    invite_attempts: u32,
}

impl<S: KvStore> LinkEngine<S> {
    pub fn new(store: Arc<S>, locks: KeyLocks, invite_attempts: u32) -> Self {
        Self {
            records: RecordStore::new(store.clone()),
            store,
            locks,
            invite_attempts,
        }
    }

    /// Create a group, link the caller to it and make it their active one
    pub async fn create_group(
        &self,
        session: &Session,
        name: &str,
        notes: Option<&str>,
    ) -> StoreResult<CareTargetGroup> {
        if name.trim().is_empty() {
            return Err(CareError::Validation(
                "care target name is required".to_string(),
            ));
        }

        let _groups_guard = self.locks.lock(keys::GROUPS).await;
        let _accounts_guard = self.locks.lock(keys::ACCOUNTS).await;

        let mut accounts = self.records.load_accounts().await?;
        if !accounts
            .iter()
            .any(|r| &r.account.id == session.account_id())
        {
            return Err(CareError::Auth(
                "session account no longer exists".to_string(),
            ));
        }

        let mut groups = self.records.load_groups().await?;
        let code = {
            let mut rng = rand::thread_rng();
            generate_unique(&mut rng, self.invite_attempts, |candidate| {
                groups
                    .iter()
                    .any(|g| g.invite_code.as_ref() == Some(candidate))
            })
        };
        let Some(code) = code else {
            tracing::error!(
                attempts = self.invite_attempts,
                groups = groups.len(),
                "Invite code space exhausted"
            );
            return Err(CareError::InviteCodeSpaceExhausted {
                attempts: self.invite_attempts,
            });
        };

        let mut id = GroupId::generate();
        while groups.iter().any(|g| g.id == id) {
            id = GroupId::generate();
        }
        let group = CareTargetGroup::new(id, name, notes, code);
        groups.push(group.clone());
        self.records.save_groups(&groups).await?;

        tracing::info!(
            group_id = %group.id,
            account_id = %session.account_id(),
            "Care target created"
        );

        self.attach(&mut accounts, session, &group.id, true).await?;
        Ok(group)
    }

    /// Join the group holding `code`. Joining twice is a no-op; an
    /// existing different active selection is left alone.
    pub async fn link_by_invite_code(
        &self,
        session: &Session,
        code: &str,
    ) -> StoreResult<LinkOutcome> {
        let code = InviteCode::parse(code)?;

        let group = self
            .records
            .load_groups()
            .await?
            .into_iter()
            .find(|g| g.invite_code.as_ref() == Some(&code))
            .ok_or_else(|| CareError::NotFound(format!("no care target with code {}", code)))?;

        let _accounts_guard = self.locks.lock(keys::ACCOUNTS).await;
        let mut accounts = self.records.load_accounts().await?;
        let (already_linked, became_active) =
            self.attach(&mut accounts, session, &group.id, false).await?;

        if already_linked {
            tracing::debug!(group_id = %group.id, account_id = %session.account_id(), "Already linked");
        } else {
            tracing::info!(group_id = %group.id, account_id = %session.account_id(), "Joined care target");
        }

        Ok(LinkOutcome {
            group,
            already_linked,
            became_active,
        })
    }

    /// Link `group_id` on the session's account and update the active
    /// selection. Caller holds the accounts lock.
    /// Returns `(already_linked, became_active)`.
    async fn attach(
        &self,
        accounts: &mut [AccountRecord],
        session: &Session,
        group_id: &GroupId,
        force_active: bool,
    ) -> StoreResult<(bool, bool)> {
        let selection_key = keys::active_selection(session.account_id());
        let _selection_guard = self.locks.lock(&selection_key).await;
        let stored = self.store.get(&selection_key).await?;

        let record = accounts
            .iter_mut()
            .find(|r| &r.account.id == session.account_id())
            .ok_or_else(|| CareError::Auth("session account no longer exists".to_string()))?;
        let account = &mut record.account;

        let already_linked = !account.link(group_id.clone());
        let became_active =
            force_active || usable_selection(stored.as_deref(), account).is_none();
        let mut changed = !already_linked;
        if became_active && account.active_group_id.as_ref() != Some(group_id) {
            account.active_group_id = Some(group_id.clone());
            changed = true;
        }

        if changed {
            self.records.save_accounts(accounts).await?;
        }
        if became_active && stored.as_deref() != Some(group_id.as_str()) {
            self.store.set(&selection_key, group_id.as_str()).await?;
        }
        Ok((already_linked, became_active))
    }

    /// Groups linked to the session's account, in link order. Ids whose
    /// group record is missing are skipped.
    pub async fn linked_groups(&self, session: &Session) -> StoreResult<Vec<CareTargetGroup>> {
        let account = self
            .records
            .account_by_id(session.account_id())
            .await?
            .ok_or_else(|| CareError::Auth("session account no longer exists".to_string()))?
            .account;
        let mut groups: HashMap<GroupId, CareTargetGroup> = self
            .records
            .load_groups()
            .await?
            .into_iter()
            .map(|g| (g.id.clone(), g))
            .collect();

        Ok(account
            .linked_group_ids
            .iter()
            .filter_map(|id| {
                let group = groups.remove(id);
                if group.is_none() {
                    tracing::warn!(account_id = %account.id, group_id = %id, "Linked care target has no record");
                }
                group
            })
            .collect())
    }

    pub async fn find_group(&self, id: &GroupId) -> StoreResult<Option<CareTargetGroup>> {
        self.records.group_by_id(id).await
    }

    /// Accounts linked to a group, derived from the accounts index
    pub async fn members_of(&self, group_id: &GroupId) -> StoreResult<Vec<Account>> {
        Ok(self
            .records
            .load_accounts()
            .await?
            .into_iter()
            .map(|r| r.account)
            .filter(|a| a.is_linked(group_id))
            .collect())
    }

    /// Group id to member account ids, derived from the accounts index
    pub async fn link_index(&self) -> StoreResult<BTreeMap<GroupId, Vec<AccountId>>> {
        let mut index: BTreeMap<GroupId, Vec<AccountId>> = BTreeMap::new();
        for record in self.records.load_accounts().await? {
            for gid in &record.account.linked_group_ids {
                index
                    .entry(gid.clone())
                    .or_default()
                    .push(record.account.id.clone());
            }
        }
        Ok(index)
    }

    /// Fold the group-owned link map older releases kept into the
    /// account-owned lists, then drop it. Entries naming unknown accounts
    /// are quarantined first. Returns the number of links added.
    pub async fn absorb_legacy_links(&self) -> StoreResult<usize> {
        let _accounts_guard = self.locks.lock(keys::ACCOUNTS).await;
        let Some(raw) = self.store.get(keys::LEGACY_LINKS).await? else {
            return Ok(0);
        };

        let links: HashMap<String, Vec<String>> = match serde_json::from_str(&raw) {
            Ok(links) => links,
            Err(e) => {
                tracing::warn!(key = keys::LEGACY_LINKS, error = %e, "Legacy link map is unreadable; leaving it in place");
                return Ok(0);
            }
        };

        let mut accounts = self.records.load_accounts().await?;
        let added = migration::fold_legacy_links(&mut accounts, &links);
        if added > 0 {
            self.records.save_accounts(&accounts).await?;
        }

        // Entries for accounts that no longer exist are kept for an operator
        let unmatched: BTreeMap<&String, &Vec<String>> = links
            .iter()
            .filter(|(uid, _)| {
                !accounts
                    .iter()
                    .any(|r| r.account.id.as_str() == uid.as_str())
            })
            .collect();
        if !unmatched.is_empty() {
            let payload = serde_json::to_string(&unmatched)?;
            self.records.set_aside(keys::LEGACY_LINKS, &payload).await?;
            tracing::warn!(accounts = unmatched.len(), "Legacy links name unknown accounts");
        }
        self.store.remove(keys::LEGACY_LINKS).await?;

        tracing::info!(added, "Absorbed legacy link map");
        Ok(added)
    }
}
