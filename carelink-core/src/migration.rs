//! Schema migration for records written by older releases
//!
//! Each `migrate_*` function takes the raw text stored under an index key
//! and returns the records in their current shape. The functions are pure
//! and idempotent: feeding back their own serialized output yields the
//! same records.
//!
//! Failures are contained. A container that does not parse yields no
//! records and sets `container_corrupt`; a single record that cannot be
//! salvaged lands in `rejected` while the rest still load.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::invite::InviteCode;
use crate::models::{
    Account, AccountId, AccountRecord, CareTargetGroup, GroupId, ItemId, Prescription,
    PrescriptionId, Role,
};

/// Result of migrating one index
#[derive(Debug, Clone, PartialEq)]
pub struct Migrated<T> {
    pub records: Vec<T>,
    /// Raw records that could not be salvaged
    pub rejected: Vec<Value>,
    /// The stored text was not a recognizable container at all
    pub container_corrupt: bool,
}

impl<T> Migrated<T> {
    fn corrupt() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
            container_corrupt: true,
        }
    }

    /// True when nothing was dropped
    pub fn is_clean(&self) -> bool {
        !self.container_corrupt && self.rejected.is_empty()
    }
}

/// Parse an index container: a JSON array, or an object wrapping the
/// array under `wrapper` (the legacy prescriptions layout).
fn parse_container(raw: &str, wrapper: Option<&str>) -> Option<Vec<Value>> {
    match serde_json::from_str::<Value>(raw).ok()? {
        Value::Array(values) => Some(values),
        Value::Object(mut map) => match wrapper.and_then(|field| map.remove(field)) {
            Some(Value::Array(values)) => Some(values),
            _ => None,
        },
        _ => None,
    }
}

fn migrate_all<T>(raw: &str, wrapper: Option<&str>, migrate: fn(&Value) -> Option<T>) -> Migrated<T> {
    let Some(values) = parse_container(raw, wrapper) else {
        return Migrated::corrupt();
    };
    let mut records = Vec::with_capacity(values.len());
    let mut rejected = Vec::new();
    for value in values {
        match migrate(&value) {
            Some(record) => records.push(record),
            None => rejected.push(value),
        }
    }
    Migrated {
        records,
        rejected,
        container_corrupt: false,
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn millis_or_epoch(ms: Option<i64>) -> DateTime<Utc> {
    ms.and_then(DateTime::from_timestamp_millis).unwrap_or_default()
}

/// Every account shape ever persisted, all fields optional
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAccount {
    #[serde(alias = "uid")]
    id: Option<String>,
    email: Option<String>,
    #[serde(alias = "password")]
    credential_secret: Option<String>,
    role: Option<String>,
    linked_group_ids: Option<Vec<String>>,
    active_group_id: Option<String>,
    /// Single-group field from before multi-group linking
    care_target_id: Option<String>,
    external_id: Option<String>,
    created_at: Option<i64>,
}

/// Migrate the accounts index
pub fn migrate_accounts(raw: &str) -> Migrated<AccountRecord> {
    migrate_all(raw, None, migrate_account)
}

/// Migrate one account record. `None` when it lacks an id or an email.
pub fn migrate_account(value: &Value) -> Option<AccountRecord> {
    let raw = RawAccount::deserialize(value).ok()?;

    let id = non_blank(raw.id)?;
    let email = non_blank(raw.email)?.to_lowercase();
    let external_id = non_blank(raw.external_id);
    let role = raw
        .role
        .and_then(|r| r.parse::<Role>().ok())
        .unwrap_or_default();
    let legacy_group = non_blank(raw.care_target_id);

    let mut linked: Vec<GroupId> = Vec::new();
    let seed = match raw.linked_group_ids {
        Some(ids) => ids,
        None => legacy_group.clone().into_iter().collect(),
    };
    for gid in seed.into_iter().filter_map(|g| non_blank(Some(g))) {
        let gid = GroupId(gid);
        if !linked.contains(&gid) {
            linked.push(gid);
        }
    }

    let active = non_blank(raw.active_group_id)
        .or(legacy_group)
        .map(GroupId)
        .filter(|gid| linked.contains(gid));

    Some(AccountRecord {
        account: Account {
            id: AccountId(id),
            email,
            role,
            linked_group_ids: linked,
            active_group_id: active,
            external_id,
            created_at: millis_or_epoch(raw.created_at),
        },
        credential_secret: raw.credential_secret.filter(|s| !s.is_empty()),
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGroup {
    id: Option<String>,
    name: Option<String>,
    #[serde(alias = "note")]
    notes: Option<String>,
    invite_code: Option<String>,
    created_at: Option<i64>,
}

/// Migrate the groups index
pub fn migrate_groups(raw: &str) -> Migrated<CareTargetGroup> {
    migrate_all(raw, None, migrate_group)
}

/// Migrate one group record. `None` when it lacks an id.
pub fn migrate_group(value: &Value) -> Option<CareTargetGroup> {
    let raw = RawGroup::deserialize(value).ok()?;
    Some(CareTargetGroup {
        id: GroupId(non_blank(raw.id)?),
        name: raw.name.unwrap_or_default().trim().to_string(),
        notes: non_blank(raw.notes),
        invite_code: non_blank(raw.invite_code).and_then(|c| InviteCode::parse(&c).ok()),
        created_at: millis_or_epoch(raw.created_at),
    })
}

/// Migrate the prescriptions index. The legacy layout wrapped the array
/// as `{ "prescriptions": [...] }`.
pub fn migrate_prescriptions(raw: &str) -> Migrated<Prescription> {
    migrate_all(raw, Some("prescriptions"), migrate_prescription)
}

/// Migrate one prescription. Field renames are handled by serde aliases
/// on [`Prescription`]; this fills item ids the legacy writer left empty.
pub fn migrate_prescription(value: &Value) -> Option<Prescription> {
    let mut rx = Prescription::deserialize(value).ok()?;
    if rx.id.is_empty() || rx.care_target_id.is_empty() {
        return None;
    }

    // Explicit ids are reserved for their first holder
    let explicit: HashSet<ItemId> = rx
        .items
        .iter()
        .filter(|item| !item.id.is_empty())
        .map(|item| item.id.clone())
        .collect();
    let mut assigned: HashSet<ItemId> = HashSet::with_capacity(rx.items.len());
    for (position, item) in rx.items.iter_mut().enumerate() {
        if item.id.is_empty() || assigned.contains(&item.id) {
            item.id = free_item_id(&rx.id, position, |id| {
                explicit.contains(id) || assigned.contains(id)
            });
        }
        assigned.insert(item.id.clone());
    }
    Some(rx)
}

/// `<rx>_it<position>`, suffixed with `_1`, `_2`, ... until unused
fn free_item_id(
    rx_id: &PrescriptionId,
    position: usize,
    is_taken: impl Fn(&ItemId) -> bool,
) -> ItemId {
    let base = format!("{}_it{}", rx_id, position);
    std::iter::once(base.clone())
        .chain((1..).map(|n| format!("{}_{}", base, n)))
        .map(ItemId)
        .find(|id| !is_taken(id))
        .unwrap_or_default()
}

/// Fold the legacy group-owned link map (`account id -> group ids`) into
/// the account-owned lists with append-if-absent semantics.
/// Returns how many links were added.
pub fn fold_legacy_links(
    accounts: &mut [AccountRecord],
    links: &HashMap<String, Vec<String>>,
) -> usize {
    let mut added = 0;
    for record in accounts.iter_mut() {
        let Some(group_ids) = links.get(record.account.id.as_str()) else {
            continue;
        };
        for gid in group_ids.iter().filter(|g| !g.trim().is_empty()) {
            if record.account.link(GroupId(gid.trim().to_string())) {
                added += 1;
            }
        }
    }
    added
}
