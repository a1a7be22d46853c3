//! Runtime configuration

use std::env;
use std::str::FromStr;

use carelink_core::credentials::DEFAULT_MIN_PASSWORD_LEN;
use carelink_core::invite::DEFAULT_INVITE_ATTEMPTS;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file backing the key-value store
    pub data_path: String,

    /// Minimum accepted password length
    pub min_password_len: usize,

    /// Bound on invite-code generation attempts per new group
    pub invite_code_attempts: u32,

    /// bcrypt cost factor for credential secrets
    pub bcrypt_cost: u32,

    /// Image-analysis endpoint (`POST {"image_url": ...}`)
    pub analysis_endpoint: Option<String>,

    /// Request timeout for the analysis endpoint
    pub analysis_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_path: "carelink.db".to_string(),
            min_password_len: DEFAULT_MIN_PASSWORD_LEN,
            invite_code_attempts: DEFAULT_INVITE_ATTEMPTS,
            bcrypt_cost: bcrypt::DEFAULT_COST,
            analysis_endpoint: None,
            analysis_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Defaults overridden by `CARELINK_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_path: env::var("CARELINK_DATA").unwrap_or(defaults.data_path),
            min_password_len: parse_var("CARELINK_MIN_PASSWORD_LEN", defaults.min_password_len),
            invite_code_attempts: parse_var(
                "CARELINK_INVITE_CODE_ATTEMPTS",
                defaults.invite_code_attempts,
            ),
            bcrypt_cost: parse_var("CARELINK_BCRYPT_COST", defaults.bcrypt_cost),
            analysis_endpoint: env::var("CARELINK_ANALYSIS_ENDPOINT")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            analysis_timeout_secs: parse_var(
                "CARELINK_ANALYSIS_TIMEOUT_SECS",
                defaults.analysis_timeout_secs,
            ),
        }
    }
}

fn parse_var<T: FromStr + Copy>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(var = name, value = %raw, "Ignoring unparseable setting");
            default
        }),
        Err(_) => default,
    }
}
