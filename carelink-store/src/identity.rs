//! Identity & session management
//!
//! Owns the accounts index and the persisted session. A [`Session`] is an
//! explicit value handed to callers and passed back into every operation
//! that needs to know who is acting; there is no process-wide "current
//! user". The persisted session key only lets a restarted process pick
//! up where it left off.

use std::sync::Arc;

use carelink_core::{
    migration, normalize_email, now_millis, Account, AccountId, AccountRecord, PasswordPolicy,
    Role,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

use crate::crypto::{self, CredentialCheck};
use crate::error::CareError;
use crate::store::{keys, KeyLocks, KvStore, RecordStore, StoreResult};

/// An authenticated account. Never carries the credential secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub account: Account,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
}

impl Session {
    fn start(account: Account) -> Self {
        Self {
            account,
            started_at: now_millis(),
        }
    }

    pub fn account_id(&self) -> &AccountId {
        &self.account.id
    }
}

/// Identity reported by an external authentication service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub external_id: String,
    pub email: Option<String>,
}

pub struct IdentityManager<S> {
    store: Arc<S>,
    records: RecordStore<S>,
    locks: KeyLocks,
    policy: PasswordPolicy,
    bcrypt_cost: u32,
    ready: watch::Sender<bool>,
}

impl<S: KvStore> IdentityManager<S> {
    pub fn new(store: Arc<S>, locks: KeyLocks, policy: PasswordPolicy, bcrypt_cost: u32) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            records: RecordStore::new(store.clone()),
            store,
            locks,
            policy,
            bcrypt_cost,
            ready,
        }
    }

    /// Create an account and sign it in
    pub async fn register(&self, email: &str, password: &str, role: Role) -> StoreResult<Session> {
        let email = normalize_email(email)?;
        self.policy.check(password)?;
        let secret = hash_blocking(password, self.bcrypt_cost).await?;

        let record = {
            let _guard = self.locks.lock(keys::ACCOUNTS).await;
            let mut accounts = self.records.load_accounts().await?;
            if accounts.iter().any(|r| r.account.email == email) {
                return Err(CareError::Conflict(format!(
                    "an account already exists for {}",
                    email
                )));
            }

            let record = AccountRecord::new(
                Account::new(AccountId::generate(), email, role),
                Some(secret),
            );
            accounts.insert(0, record.clone());
            self.records.save_accounts(&accounts).await?;
            record
        };

        tracing::info!(account_id = %record.account.id, role = %role, "Account registered");
        self.establish(record.account).await
    }

    /// Sign in with a local credential
    pub async fn login(&self, email: &str, password: &str) -> StoreResult<Session> {
        let email = normalize_email(email)?;
        let record = self
            .records
            .load_accounts()
            .await?
            .into_iter()
            .find(|r| r.account.email == email)
            .ok_or_else(|| CareError::NotFound(format!("no account for {}", email)))?;

        let Some(secret) = record.credential_secret.clone() else {
            return Err(CareError::Auth(
                "account is managed by an external sign-in provider".to_string(),
            ));
        };

        match check_blocking(password, &secret).await? {
            CredentialCheck::Valid => {}
            CredentialCheck::ValidLegacy => self.upgrade_secret(&record.account.id, password).await,
            CredentialCheck::Invalid => {
                tracing::info!(account_id = %record.account.id, "Login rejected");
                return Err(CareError::Auth("incorrect password".to_string()));
            }
        }

        tracing::info!(account_id = %record.account.id, "Logged in");
        self.establish(record.account).await
    }

    /// End a session and forget the persisted copy
    pub async fn logout(&self, session: &Session) -> StoreResult<()> {
        self.store.remove(keys::SESSION).await?;
        tracing::info!(account_id = %session.account.id, "Logged out");
        Ok(())
    }

    /// Pick up the persisted session without re-checking the credential.
    ///
    /// Readiness flips to true once this attempt finishes, whatever its
    /// outcome; that transition happens at most once per manager.
    pub async fn restore(&self) -> StoreResult<Option<Session>> {
        let result = self.read_session().await;
        self.mark_ready();
        result
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Receiver observing the not-ready to ready transition
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.subscribe()
    }

    /// Wait until the first restore (or external reconciliation) completes
    pub async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// The stored account behind a session, re-read from the index
    pub async fn current_account(&self, session: &Session) -> StoreResult<Account> {
        self.records
            .account_by_id(session.account_id())
            .await?
            .map(|r| r.account)
            .ok_or_else(|| CareError::Auth("session account no longer exists".to_string()))
    }

    /// Re-read the session's account (links, active selection) and
    /// persist the refreshed snapshot
    pub async fn refresh(&self, session: &Session) -> StoreResult<Session> {
        let refreshed = Session {
            account: self.current_account(session).await?,
            started_at: session.started_at,
        };
        self.persist(&refreshed).await?;
        Ok(refreshed)
    }

    /// Reconcile a session-change notification from an external
    /// authentication service with the local accounts index.
    ///
    /// `None` signs out. An identity with no local account gets a
    /// minimal `family` account; repeated notifications for the same
    /// identity reuse it. Identities without an email are rejected, and
    /// an email already bound to a different external identity conflicts.
    pub async fn reconcile_external(
        &self,
        identity: Option<ExternalIdentity>,
    ) -> StoreResult<Option<Session>> {
        let Some(identity) = identity else {
            self.store.remove(keys::SESSION).await?;
            tracing::info!("External sign-out");
            return Ok(None);
        };
        let email = identity
            .email
            .as_deref()
            .and_then(|e| normalize_email(e).ok())
            .ok_or_else(|| {
                CareError::Validation(format!(
                    "external identity {} carries no email",
                    identity.external_id
                ))
            })?;

        let account = {
            let _guard = self.locks.lock(keys::ACCOUNTS).await;
            let mut accounts = self.records.load_accounts().await?;

            let by_external = accounts
                .iter()
                .position(|r| r.account.external_id.as_deref() == Some(&identity.external_id));
            let by_email = || {
                accounts
                    .iter()
                    .position(|r| r.account.external_id.is_none() && r.account.email == email)
            };

            match by_external.or_else(by_email) {
                Some(index) => {
                    let record = &mut accounts[index];
                    if record.account.external_id.is_none() {
                        record.account.external_id = Some(identity.external_id.clone());
                        let account = record.account.clone();
                        self.records.save_accounts(&accounts).await?;
                        tracing::info!(account_id = %account.id, "Linked external identity to account");
                        account
                    } else {
                        record.account.clone()
                    }
                }
                None => {
                    if accounts.iter().any(|r| r.account.email == email) {
                        tracing::warn!(
                            external_id = %identity.external_id,
                            "Email already bound to another external identity"
                        );
                        return Err(CareError::Conflict(format!(
                            "{} is already registered",
                            email
                        )));
                    }
                    let mut account = Account::new(AccountId::generate(), email, Role::Family);
                    account.external_id = Some(identity.external_id.clone());
                    accounts.insert(0, AccountRecord::new(account.clone(), None));
                    self.records.save_accounts(&accounts).await?;
                    tracing::info!(account_id = %account.id, "Provisioned account for external identity");
                    account
                }
            }
        };

        self.establish(account).await.map(Some)
    }

    /// Follow an external service's session-change stream until its
    /// sender goes away, publishing the reconciled session.
    pub async fn follow_external(
        &self,
        mut changes: watch::Receiver<Option<ExternalIdentity>>,
        sessions: watch::Sender<Option<Session>>,
    ) {
        loop {
            let identity = changes.borrow_and_update().clone();
            match self.reconcile_external(identity).await {
                Ok(session) => {
                    sessions.send_replace(session);
                }
                Err(e) => tracing::warn!(error = %e, "Could not reconcile external identity"),
            }
            self.mark_ready();

            if changes.changed().await.is_err() {
                break;
            }
        }
    }

    async fn establish(&self, account: Account) -> StoreResult<Session> {
        let session = Session::start(account);
        self.persist(&session).await?;
        Ok(session)
    }

    async fn persist(&self, session: &Session) -> StoreResult<()> {
        let raw = serde_json::to_string(session)?;
        self.store.set(keys::SESSION, &raw).await
    }

    async fn read_session(&self) -> StoreResult<Option<Session>> {
        let Some(raw) = self.store.get(keys::SESSION).await? else {
            return Ok(None);
        };
        let session = parse_session(&raw);
        if session.is_none() {
            tracing::warn!("Persisted session is malformed; starting signed out");
        }
        Ok(session)
    }

    fn mark_ready(&self) {
        let flipped = self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if flipped {
            tracing::debug!("Identity ready");
        }
    }

    /// Replace a legacy plaintext secret with a hash. The login already
    /// succeeded, so failures here are logged rather than surfaced.
    async fn upgrade_secret(&self, account_id: &AccountId, password: &str) {
        let result: StoreResult<()> = async {
            let hash = hash_blocking(password, self.bcrypt_cost).await?;
            let _guard = self.locks.lock(keys::ACCOUNTS).await;
            let mut accounts = self.records.load_accounts().await?;
            if let Some(record) = accounts.iter_mut().find(|r| &r.account.id == account_id) {
                record.credential_secret = Some(hash);
                self.records.save_accounts(&accounts).await?;
            }
            Ok(())
        }
        .await;

        match result {
            Ok(()) => tracing::info!(account_id = %account_id, "Upgraded legacy credential"),
            Err(e) => tracing::warn!(account_id = %account_id, error = %e, "Could not upgrade legacy credential"),
        }
    }
}

/// Accept both the current `{account, startedAt}` shape and the flat
/// account object older releases persisted.
fn parse_session(raw: &str) -> Option<Session> {
    if let Ok(session) = serde_json::from_str::<Session>(raw) {
        return Some(session);
    }
    let value: Value = serde_json::from_str(raw).ok()?;
    let account_value = value.get("account").unwrap_or(&value);
    let record = migration::migrate_account(account_value)?;
    Some(Session::start(record.account))
}

/// bcrypt is CPU bound; keep it off the async workers
async fn hash_blocking(password: &str, cost: u32) -> StoreResult<String> {
    let password = password.to_string();
    tokio::task::spawn_blocking(move || crypto::hash_password(&password, cost))
        .await
        .map_err(|e| CareError::Storage(format!("hashing task failed: {}", e)))?
        .map_err(CareError::from)
}

async fn check_blocking(password: &str, stored: &str) -> StoreResult<CredentialCheck> {
    let password = password.to_string();
    let stored = stored.to_string();
    tokio::task::spawn_blocking(move || crypto::check_password(&password, &stored))
        .await
        .map_err(|e| CareError::Storage(format!("credential check failed: {}", e)))?
        .map_err(CareError::from)
}
