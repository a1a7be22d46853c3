//! Persisted key names
//!
//! Suffixes carry the shape version. A breaking change bumps the suffix
//! and abandons the old key; migration only repairs in-shape drift.

use carelink_core::AccountId;

/// Common prefix of every key this crate writes
pub const NAMESPACE: &str = "careapp_";

pub const ACCOUNTS: &str = "careapp_users_v1";
pub const GROUPS: &str = "careapp_careTargets_v1";
pub const PRESCRIPTIONS: &str = "careapp_store_v1";
pub const SESSION: &str = "careapp_session_v1";

/// Group-owned link map written by older releases; absorbed on start
pub const LEGACY_LINKS: &str = "careapp_careTarget_links_v1";

const ACTIVE_SELECTION_PREFIX: &str = "careapp_activeCareTarget_v1:";
pub const QUARANTINE_PREFIX: &str = "careapp_quarantine_v1:";

/// Per-account active selection key
pub fn active_selection(account_id: &AccountId) -> String {
    format!("{}{}", ACTIVE_SELECTION_PREFIX, account_id)
}

/// Prefix of quarantine entries holding data salvaged from `source`
pub fn quarantine_prefix(source: &str) -> String {
    format!("{}{}:", QUARANTINE_PREFIX, source)
}
