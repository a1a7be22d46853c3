//! Record migration tests
//!
//! Covers the layouts older releases wrote, partial corruption, and
//! idempotence on the migrated output.

use std::collections::HashMap;

use carelink_core::migration::{
    fold_legacy_links, migrate_accounts, migrate_groups, migrate_prescriptions,
};
use carelink_core::{GroupId, PrescriptionStatus, Role, TimeOfDay};
use serde_json::json;

/// Test: accounts migrate to a fixed point
#[test]
fn test_accounts_migration_is_idempotent() {
    let legacy = json!([
        {"uid": "uid_1", "email": "A@X.com", "password": "pw", "role": "caregiver", "careTargetId": "ct_1"},
        {"id": "uid_2", "email": "b@x.com", "externalId": "ext-9", "role": "family", "createdAt": 1700000000000i64},
        {"id": "uid_3", "email": "c@x.com", "linkedGroupIds": ["g1", "", "g1"], "activeGroupId": "g2"}
    ]);

    let first = migrate_accounts(&legacy.to_string());
    assert!(first.is_clean());
    assert_eq!(first.records.len(), 3);

    let reserialized = serde_json::to_string(&first.records).unwrap();
    let second = migrate_accounts(&reserialized);
    assert!(second.is_clean());
    assert_eq!(second.records, first.records);
}

/// Test: an account without an email is rejected even with an external id
#[test]
fn test_external_account_without_email_is_rejected() {
    let migrated = migrate_accounts(
        r#"[{"id":"a1","externalId":"ext-1"},{"id":"a2","email":"b@x.com","externalId":"ext-2"}]"#,
    );
    assert_eq!(migrated.records.len(), 1);
    assert_eq!(migrated.rejected.len(), 1);
    let account = &migrated.records[0].account;
    assert_eq!(account.external_id.as_deref(), Some("ext-2"));
    assert_eq!(account.role, Role::Family);
    assert!(migrated.records[0].credential_secret.is_none());
}

/// Test: groups and prescriptions migrate to a fixed point
#[test]
fn test_groups_and_prescriptions_are_idempotent() {
    let groups = json!([
        {"id": "ct_1", "name": "Grandpa", "note": "room 3", "inviteCode": "abc234", "createdAt": 1}
    ]);
    let first = migrate_groups(&groups.to_string());
    let second = migrate_groups(&serde_json::to_string(&first.records).unwrap());
    assert_eq!(first.records, second.records);

    let prescriptions = json!({"prescriptions": [{
        "prescriptionId": "rx_1",
        "careTargetId": "ct_1",
        "status": "need_manual_fix",
        "items": [
            {"drug_name_zh": "Panadol", "time_of_day": ["night", "morning"]},
            {"itemId": "dup", "drug_name_zh": "Antacid"},
            {"itemId": "dup", "drug_name_zh": "Vitamin D"}
        ]
    }]});
    let first = migrate_prescriptions(&prescriptions.to_string());
    assert!(first.is_clean());
    let rx = &first.records[0];
    assert_eq!(rx.status, PrescriptionStatus::NeedsManualFix);
    assert_eq!(rx.items[0].id.as_str(), "rx_1_it0");
    assert_eq!(rx.items[1].id.as_str(), "dup");
    assert_eq!(rx.items[2].id.as_str(), "rx_1_it2");
    assert_eq!(
        rx.items[0].times_of_day.as_slice(),
        &[TimeOfDay::Night, TimeOfDay::Morning]
    );

    // The current layout is a bare array
    let second = migrate_prescriptions(&serde_json::to_string(&first.records).unwrap());
    assert_eq!(second.records, first.records);
}

/// Test: a derived item id never collides with an id written elsewhere in the list
#[test]
fn test_derived_item_ids_avoid_explicit_ids() {
    let raw = json!([{
        "id": "p1",
        "careTargetId": "ct_1",
        "items": [
            {"itemId": "p1_it1", "drug_name_zh": "A"},
            {"itemId": "", "drug_name_zh": "B"},
            {"itemId": "", "drug_name_zh": "C"},
            {"itemId": "p1_it2", "drug_name_zh": "D"},
            {"itemId": "p1_it1", "drug_name_zh": "E"}
        ]
    }]);
    let migrated = migrate_prescriptions(&raw.to_string());
    let ids: Vec<&str> = migrated.records[0]
        .items
        .iter()
        .map(|item| item.id.as_str())
        .collect();
    assert_eq!(ids, vec!["p1_it1", "p1_it1_1", "p1_it2_1", "p1_it2", "p1_it4"]);

    let again = migrate_prescriptions(&serde_json::to_string(&migrated.records).unwrap());
    assert_eq!(again.records, migrated.records);
}

/// Test: unsalvageable records are set aside without dropping the rest
#[test]
fn test_partial_corruption() {
    let raw = json!([
        {"id": "rx_ok", "careTargetId": "ct_1"},
        {"id": "rx_orphan"},
        {"careTargetId": "ct_1"},
        "text"
    ]);
    let migrated = migrate_prescriptions(&raw.to_string());
    assert!(!migrated.container_corrupt);
    assert_eq!(migrated.records.len(), 1);
    assert_eq!(migrated.rejected.len(), 3);
    assert!(!migrated.is_clean());
}

/// Test: a container of the wrong shape yields nothing
#[test]
fn test_corrupt_container() {
    for raw in ["", "null", "42", r#"{"items":[]}"#, "[1, 2"] {
        let migrated = migrate_prescriptions(raw);
        assert!(migrated.container_corrupt, "expected corrupt for {:?}", raw);
        assert!(migrated.records.is_empty());
    }
}

/// Test: folding the legacy link map preserves existing order
#[test]
fn test_fold_legacy_links_appends() {
    let mut accounts = migrate_accounts(
        r#"[{"id":"a1","email":"a@x.com","linkedGroupIds":["g2"]},{"id":"a2","email":"b@x.com"}]"#,
    )
    .records;
    let links = HashMap::from([
        ("a1".to_string(), vec!["g1".to_string(), "g2".to_string()]),
        ("ghost".to_string(), vec!["g3".to_string()]),
    ]);

    assert_eq!(fold_legacy_links(&mut accounts, &links), 1);
    assert_eq!(
        accounts[0].account.linked_group_ids,
        vec![GroupId::from("g2"), GroupId::from("g1")]
    );
    assert!(accounts[1].account.linked_group_ids.is_empty());
}
