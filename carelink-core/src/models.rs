//! Domain entities for accounts, care targets and prescriptions
//!
//! Field names are camelCase on disk. Timestamps are stored as epoch
//! milliseconds, so every timestamp produced here is truncated to
//! millisecond precision to read back equal after a round trip.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::invite::InviteCode;
use crate::Error;

macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Generate a fresh random identifier
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.trim().is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

entity_id!(
    /// Unique account identifier
    AccountId,
    "acct"
);
entity_id!(
    /// Unique care-target group identifier
    GroupId,
    "ct"
);
entity_id!(
    /// Unique prescription identifier
    PrescriptionId,
    "rx"
);
entity_id!(
    /// Prescription item identifier, unique within its parent
    ItemId,
    "it"
);

/// Current time truncated to millisecond precision
pub fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Role an account plays around a care target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Caregiver,
    #[default]
    Family,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Caregiver => "caregiver",
            Role::Family => "family",
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "caregiver" => Ok(Role::Caregiver),
            "family" => Ok(Role::Family),
            other => Err(Error::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An account as handed to callers (never carries the credential secret)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub email: String,
    pub role: Role,
    /// Groups this account can see, in link order, without duplicates
    #[serde(default)]
    pub linked_group_ids: Vec<GroupId>,
    /// Always `None` or an element of `linked_group_ids`
    #[serde(default)]
    pub active_group_id: Option<GroupId>,
    /// Identity assigned by an external authentication service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Create an account with no links and no active selection
    pub fn new(id: AccountId, email: String, role: Role) -> Self {
        Self {
            id,
            email,
            role,
            linked_group_ids: Vec::new(),
            active_group_id: None,
            external_id: None,
            created_at: now_millis(),
        }
    }

    pub fn is_linked(&self, group_id: &GroupId) -> bool {
        self.linked_group_ids.contains(group_id)
    }

    /// Append a group if absent. Returns true when the list changed.
    pub fn link(&mut self, group_id: GroupId) -> bool {
        if self.is_linked(&group_id) {
            return false;
        }
        self.linked_group_ids.push(group_id);
        true
    }
}

/// An account as persisted in the accounts index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRecord {
    #[serde(flatten)]
    pub account: Account,
    /// bcrypt hash, or a legacy plaintext secret awaiting upgrade.
    /// `None` for accounts provisioned by an external identity service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_secret: Option<String>,
}

impl AccountRecord {
    pub fn new(account: Account, credential_secret: Option<String>) -> Self {
        Self {
            account,
            credential_secret,
        }
    }
}

/// A shared care target (e.g. one elderly patient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareTargetGroup {
    pub id: GroupId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Absent only on legacy records, which cannot be joined by code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_code: Option<InviteCode>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl CareTargetGroup {
    pub fn new(id: GroupId, name: &str, notes: Option<&str>, invite_code: InviteCode) -> Self {
        Self {
            id,
            name: name.trim().to_string(),
            notes: notes
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            invite_code: Some(invite_code),
            created_at: now_millis(),
        }
    }
}

/// When during the day a medication is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Noon,
    Afternoon,
    Night,
}

impl TimeOfDay {
    pub const ALL: [TimeOfDay; 4] = [
        TimeOfDay::Morning,
        TimeOfDay::Noon,
        TimeOfDay::Afternoon,
        TimeOfDay::Night,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Noon => "noon",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Night => "night",
        }
    }

    /// Case-insensitive parse; unknown labels yield `None`
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "morning" => Some(TimeOfDay::Morning),
            "noon" => Some(TimeOfDay::Noon),
            "afternoon" => Some(TimeOfDay::Afternoon),
            "night" => Some(TimeOfDay::Night),
            _ => None,
        }
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of times of day that keeps insertion order for display.
///
/// Equality ignores order. Unknown labels are dropped on decode and
/// duplicates collapse to their first occurrence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<TimeOfDay>")]
pub struct TimesOfDay(Vec<TimeOfDay>);

impl TimesOfDay {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert if absent. Returns true when the set changed.
    pub fn insert(&mut self, time: TimeOfDay) -> bool {
        if self.0.contains(&time) {
            return false;
        }
        self.0.push(time);
        true
    }

    pub fn contains(&self, time: TimeOfDay) -> bool {
        self.0.contains(&time)
    }

    pub fn iter(&self) -> impl Iterator<Item = TimeOfDay> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[TimeOfDay] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PartialEq for TimesOfDay {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len() && self.0.iter().all(|t| other.0.contains(t))
    }
}

impl Eq for TimesOfDay {}

impl FromIterator<TimeOfDay> for TimesOfDay {
    fn from_iter<I: IntoIterator<Item = TimeOfDay>>(iter: I) -> Self {
        let mut set = TimesOfDay::new();
        for time in iter {
            set.insert(time);
        }
        set
    }
}

impl From<Vec<String>> for TimesOfDay {
    fn from(labels: Vec<String>) -> Self {
        labels.iter().filter_map(|l| TimeOfDay::parse(l)).collect()
    }
}

impl From<TimesOfDay> for Vec<TimeOfDay> {
    fn from(set: TimesOfDay) -> Self {
        set.0
    }
}

/// Outcome of recognizing a prescription image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrescriptionStatus {
    Parsed,
    #[default]
    #[serde(alias = "need_manual_fix")]
    NeedsManualFix,
}

impl PrescriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrescriptionStatus::Parsed => "parsed",
            PrescriptionStatus::NeedsManualFix => "needs_manual_fix",
        }
    }
}

impl FromStr for PrescriptionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsed" => Ok(PrescriptionStatus::Parsed),
            "needs_manual_fix" | "need_manual_fix" => Ok(PrescriptionStatus::NeedsManualFix),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// One medication line on a prescription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionItem {
    #[serde(default, alias = "itemId")]
    pub id: ItemId,
    #[serde(default, alias = "drug_name_zh")]
    pub drug_name_local: String,
    #[serde(
        default,
        alias = "drug_name_translated",
        skip_serializing_if = "Option::is_none"
    )]
    pub drug_name_translated: Option<String>,
    #[serde(default)]
    pub dose: String,
    #[serde(default, alias = "time_of_day")]
    pub times_of_day: TimesOfDay,
    #[serde(default, alias = "note_zh", skip_serializing_if = "Option::is_none")]
    pub note_local: Option<String>,
    #[serde(
        default,
        alias = "note_translated",
        skip_serializing_if = "Option::is_none"
    )]
    pub note_translated: Option<String>,
}

/// A medication record scoped to one care target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    #[serde(alias = "prescriptionId")]
    pub id: PrescriptionId,
    pub care_target_id: GroupId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Opaque image reference, meaningless to the data layer
    #[serde(
        default,
        alias = "sourceImageUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_image_ref: Option<String>,
    #[serde(default)]
    pub status: PrescriptionStatus,
    #[serde(default, alias = "ocrRawText", skip_serializing_if = "Option::is_none")]
    pub raw_recognized_text: Option<String>,
    #[serde(default)]
    pub items: Vec<PrescriptionItem>,
}

impl Prescription {
    /// Build a stored record from a submission, assigning ids to items lacking one
    pub fn from_new(id: PrescriptionId, input: NewPrescription) -> Self {
        Self {
            id,
            care_target_id: input.care_target_id,
            title: input.title,
            created_at: now_millis(),
            source_image_ref: input.source_image_ref,
            status: input.status,
            raw_recognized_text: input.raw_recognized_text,
            items: assign_item_ids(input.items),
        }
    }

    /// Merge the provided fields. A supplied item list replaces the
    /// existing one wholesale and every item receives a fresh id.
    pub fn apply_patch(&mut self, patch: PrescriptionPatch) {
        if let Some(title) = patch.title {
            self.title = Some(title);
        }
        if let Some(source_image_ref) = patch.source_image_ref {
            self.source_image_ref = Some(source_image_ref);
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(text) = patch.raw_recognized_text {
            self.raw_recognized_text = Some(text);
        }
        if let Some(items) = patch.items {
            self.items = items
                .into_iter()
                .map(|item| item.into_item(ItemId::generate()))
                .collect();
        }
    }
}

fn assign_item_ids(items: Vec<NewPrescriptionItem>) -> Vec<PrescriptionItem> {
    let mut seen: Vec<ItemId> = Vec::with_capacity(items.len());
    items
        .into_iter()
        .map(|mut item| {
            let id = match item.id.take() {
                Some(id) if !id.is_empty() && !seen.contains(&id) => id,
                _ => ItemId::generate(),
            };
            seen.push(id.clone());
            item.into_item(id)
        })
        .collect()
}

/// Item payload for create/update; `id` is optional on create and ignored on update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrescriptionItem {
    #[serde(default)]
    pub id: Option<ItemId>,
    pub drug_name_local: String,
    #[serde(default)]
    pub drug_name_translated: Option<String>,
    #[serde(default)]
    pub dose: String,
    #[serde(default)]
    pub times_of_day: TimesOfDay,
    #[serde(default)]
    pub note_local: Option<String>,
    #[serde(default)]
    pub note_translated: Option<String>,
}

impl NewPrescriptionItem {
    pub fn into_item(self, id: ItemId) -> PrescriptionItem {
        PrescriptionItem {
            id,
            drug_name_local: self.drug_name_local,
            drug_name_translated: self.drug_name_translated,
            dose: self.dose,
            times_of_day: self.times_of_day,
            note_local: self.note_local,
            note_translated: self.note_translated,
        }
    }
}

impl From<PrescriptionItem> for NewPrescriptionItem {
    fn from(item: PrescriptionItem) -> Self {
        Self {
            id: Some(item.id),
            drug_name_local: item.drug_name_local,
            drug_name_translated: item.drug_name_translated,
            dose: item.dose,
            times_of_day: item.times_of_day,
            note_local: item.note_local,
            note_translated: item.note_translated,
        }
    }
}

/// Submission of a parse result for storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPrescription {
    pub care_target_id: GroupId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub source_image_ref: Option<String>,
    pub status: PrescriptionStatus,
    #[serde(default)]
    pub raw_recognized_text: Option<String>,
    #[serde(default)]
    pub items: Vec<NewPrescriptionItem>,
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrescriptionPatch {
    pub title: Option<String>,
    pub source_image_ref: Option<String>,
    pub status: Option<PrescriptionStatus>,
    pub raw_recognized_text: Option<String>,
    pub items: Option<Vec<NewPrescriptionItem>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str) -> NewPrescriptionItem {
        NewPrescriptionItem {
            drug_name_local: name.to_string(),
            dose: "1 tablet".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_ids_carry_prefix() {
        assert!(AccountId::generate().as_str().starts_with("acct_"));
        assert!(GroupId::generate().as_str().starts_with("ct_"));
        assert_ne!(PrescriptionId::generate(), PrescriptionId::generate());
    }

    #[test]
    fn test_account_link_is_append_if_absent() {
        let mut account = Account::new(AccountId::from("a1"), "a@x.com".into(), Role::Family);
        assert!(account.link(GroupId::from("g1")));
        assert!(!account.link(GroupId::from("g1")));
        assert!(account.link(GroupId::from("g2")));
        assert_eq!(
            account.linked_group_ids,
            vec![GroupId::from("g1"), GroupId::from("g2")]
        );
    }

    #[test]
    fn test_times_of_day_order_insensitive_equality() {
        let a: TimesOfDay = [TimeOfDay::Night, TimeOfDay::Morning].into_iter().collect();
        let b: TimesOfDay = [TimeOfDay::Morning, TimeOfDay::Night].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(a.as_slice(), &[TimeOfDay::Night, TimeOfDay::Morning]);
    }

    #[test]
    fn test_times_of_day_decode_drops_unknown_and_duplicates() {
        let set: TimesOfDay =
            serde_json::from_str(r#"["night","Morning","whenever","night"]"#).unwrap();
        assert_eq!(set.as_slice(), &[TimeOfDay::Night, TimeOfDay::Morning]);
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["night","morning"]"#);
    }

    #[test]
    fn test_from_new_keeps_supplied_item_ids_and_fills_missing() {
        let mut first = item("Panadol");
        first.id = Some(ItemId::from("it_keep"));
        let mut dup = item("Antacid");
        dup.id = Some(ItemId::from("it_keep"));

        let rx = Prescription::from_new(
            PrescriptionId::from("rx1"),
            NewPrescription {
                care_target_id: GroupId::from("g1"),
                title: None,
                source_image_ref: None,
                status: PrescriptionStatus::Parsed,
                raw_recognized_text: None,
                items: vec![first, dup, item("Vitamin")],
            },
        );

        assert_eq!(rx.items[0].id, ItemId::from("it_keep"));
        assert_ne!(rx.items[1].id, ItemId::from("it_keep"));
        assert!(!rx.items[2].id.is_empty());
    }

    #[test]
    fn test_apply_patch_replaces_items_with_fresh_ids() {
        let mut rx = Prescription::from_new(
            PrescriptionId::from("rx1"),
            NewPrescription {
                care_target_id: GroupId::from("g1"),
                title: Some("Clinic".into()),
                source_image_ref: None,
                status: PrescriptionStatus::NeedsManualFix,
                raw_recognized_text: None,
                items: vec![item("A"), item("B")],
            },
        );
        let original: Vec<ItemId> = rx.items.iter().map(|i| i.id.clone()).collect();

        let mut carried = NewPrescriptionItem::from(rx.items[0].clone());
        carried.dose = "2 tablets".into();
        rx.apply_patch(PrescriptionPatch {
            status: Some(PrescriptionStatus::Parsed),
            items: Some(vec![carried, item("C"), item("D")]),
            ..Default::default()
        });

        assert_eq!(rx.title.as_deref(), Some("Clinic"));
        assert_eq!(rx.status, PrescriptionStatus::Parsed);
        assert_eq!(rx.items.len(), 3);
        assert!(rx.items.iter().all(|i| !original.contains(&i.id)));
        assert_eq!(rx.items[0].dose, "2 tablets");
    }

    #[test]
    fn test_status_accepts_legacy_spelling() {
        let status: PrescriptionStatus = serde_json::from_str(r#""need_manual_fix""#).unwrap();
        assert_eq!(status, PrescriptionStatus::NeedsManualFix);
        assert_eq!(
            serde_json::to_string(&status).unwrap(),
            r#""needs_manual_fix""#
        );
    }
}
