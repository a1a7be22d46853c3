//! Tests for registration, login, logout and session restore

mod common;

use carelink_core::{AccountRecord, Role};
use carelink_store::store::keys;
use carelink_store::{ErrorKind, KvStore};
use common::{create_test_app, register, reopen_app, PASSWORD};
use serde_json::json;

async fn stored_accounts(store: &impl KvStore) -> Vec<AccountRecord> {
    let raw = store.get(keys::ACCOUNTS).await.unwrap().unwrap();
    serde_json::from_str(&raw).unwrap()
}

/// Test: register normalizes the email and starts with no links
#[tokio::test]
async fn test_register_normalizes_email() {
    let (app, _store) = create_test_app();

    let session = app
        .identity()
        .register("  Nurse@Example.COM ", PASSWORD, Role::Caregiver)
        .await
        .unwrap();

    assert_eq!(session.account.email, "nurse@example.com");
    assert_eq!(session.account.role, Role::Caregiver);
    assert!(session.account.linked_group_ids.is_empty());
    assert!(session.account.active_group_id.is_none());
}

/// Test: the stored secret is a bcrypt hash and never reaches the session
#[tokio::test]
async fn test_register_hashes_secret() {
    let (app, store) = create_test_app();
    register(&app, "a@x.com", Role::Family).await;

    let accounts = stored_accounts(store.as_ref()).await;
    let secret = accounts[0].credential_secret.as_deref().unwrap();
    assert!(secret.starts_with("$2"));
    assert_ne!(secret, PASSWORD);

    let raw_session = store.get(keys::SESSION).await.unwrap().unwrap();
    assert!(!raw_session.contains(secret));
    assert!(!raw_session.contains("credentialSecret"));
}

/// Test: newest registration is first in the accounts index
#[tokio::test]
async fn test_register_prepends_account() {
    let (app, store) = create_test_app();
    register(&app, "first@x.com", Role::Family).await;
    register(&app, "second@x.com", Role::Family).await;

    let accounts = stored_accounts(store.as_ref()).await;
    assert_eq!(accounts[0].account.email, "second@x.com");
    assert_eq!(accounts[1].account.email, "first@x.com");
}

/// Test: register rejects empty email, empty password and short password
#[tokio::test]
async fn test_register_validation() {
    let (app, _store) = create_test_app();
    let identity = app.identity();

    let err = identity.register("   ", PASSWORD, Role::Family).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = identity.register("a@x.com", "", Role::Family).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    let err = identity.register("a@x.com", "12345", Role::Family).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    identity.register("a@x.com", "123456", Role::Family).await.unwrap();
}

/// Test: duplicate email differing only in case is a conflict
#[tokio::test]
async fn test_register_duplicate_is_conflict() {
    let (app, _store) = create_test_app();
    register(&app, "a@x.com", Role::Caregiver).await;

    let err = app
        .identity()
        .register("A@X.com", "another1", Role::Family)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

/// Test: login outcomes for unknown email, wrong password and success
#[tokio::test]
async fn test_login() {
    let (app, _store) = create_test_app();
    let registered = register(&app, "a@x.com", Role::Family).await;

    let err = app.identity().login("b@x.com", PASSWORD).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = app.identity().login("a@x.com", "wrong-pass").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);

    let session = app.identity().login(" A@x.com", PASSWORD).await.unwrap();
    assert_eq!(session.account.id, registered.account.id);
}

/// Test: logout removes the persisted session
#[tokio::test]
async fn test_logout_clears_persisted_session() {
    let (app, store) = create_test_app();
    let session = register(&app, "a@x.com", Role::Family).await;
    assert!(store.get(keys::SESSION).await.unwrap().is_some());

    app.identity().logout(&session).await.unwrap();
    assert!(store.get(keys::SESSION).await.unwrap().is_none());

    let restarted = reopen_app(&store);
    assert!(restarted.start().await.unwrap().is_none());
}

/// Test: a restarted process restores the session without the password
#[tokio::test]
async fn test_restore_after_restart() {
    let (app, store) = create_test_app();
    let session = register(&app, "a@x.com", Role::Caregiver).await;

    let restarted = reopen_app(&store);
    assert!(!restarted.identity().is_ready());
    let restored = restarted.start().await.unwrap().unwrap();

    assert_eq!(restored, session);
    assert!(restarted.identity().is_ready());
}

/// Test: a malformed session key restores as signed out
#[tokio::test]
async fn test_restore_malformed_session() {
    let (app, store) = create_test_app();
    store.set(keys::SESSION, "{broken").await.unwrap();

    assert!(app.start().await.unwrap().is_none());
    assert!(app.identity().is_ready());
}

/// Test: readiness transitions exactly once, whatever restore returns
#[tokio::test]
async fn test_readiness_transitions_once() {
    let (app, _store) = create_test_app();
    let mut ready = app.identity().subscribe_ready();
    assert!(!*ready.borrow_and_update());

    app.identity().restore().await.unwrap();
    assert!(ready.has_changed().unwrap());
    assert!(*ready.borrow_and_update());

    app.identity().restore().await.unwrap();
    assert!(!ready.has_changed().unwrap());

    // Already ready: returns immediately
    app.identity().wait_ready().await;
}

/// Test: waiters are released by a restore running elsewhere
#[tokio::test]
async fn test_wait_ready_released_by_restore() {
    let (app, _store) = create_test_app();
    let app = std::sync::Arc::new(app);

    let waiter = {
        let app = app.clone();
        tokio::spawn(async move { app.identity().wait_ready().await })
    };
    app.start().await.unwrap();
    waiter.await.unwrap();
}

/// Test: a legacy plaintext secret logs in and is upgraded to a hash
#[tokio::test]
async fn test_legacy_plaintext_secret_upgraded() {
    let (app, store) = create_test_app();
    let legacy = json!([{
        "uid": "uid_1700000000000",
        "email": "old@x.com",
        "password": "secret1",
        "role": "family",
        "careTargetId": "ct_001"
    }]);
    store
        .set(keys::ACCOUNTS, &legacy.to_string())
        .await
        .unwrap();

    let session = app.identity().login("old@x.com", "secret1").await.unwrap();
    assert_eq!(session.account.id.as_str(), "uid_1700000000000");

    let accounts = stored_accounts(store.as_ref()).await;
    assert!(accounts[0]
        .credential_secret
        .as_deref()
        .unwrap()
        .starts_with("$2"));

    // Still accepted after the upgrade
    app.identity().login("old@x.com", "secret1").await.unwrap();
    let err = app.identity().login("old@x.com", "secret2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Auth);
}

/// Test: a storage failure on the write path surfaces as a storage error
#[tokio::test]
async fn test_register_storage_failure_surfaces() {
    let (app, store) = create_test_app();
    store.set_fail_writes(true);

    let err = app
        .identity()
        .register("a@x.com", PASSWORD, Role::Family)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(err.user_message().contains("try again"));

    store.set_fail_writes(false);
    register(&app, "a@x.com", Role::Family).await;
}

/// Test: refresh picks up links made through another component
#[tokio::test]
async fn test_refresh_rereads_account() {
    let (app, _store) = create_test_app();
    let session = register(&app, "a@x.com", Role::Caregiver).await;
    let group = app
        .linking()
        .create_group(&session, "Grandpa Wang", None)
        .await
        .unwrap();

    assert!(session.account.linked_group_ids.is_empty());
    let refreshed = app.identity().refresh(&session).await.unwrap();
    assert_eq!(refreshed.account.linked_group_ids, vec![group.id.clone()]);
    assert_eq!(refreshed.account.active_group_id, Some(group.id));
    assert_eq!(refreshed.started_at, session.started_at);
}
