//! Error types for CareLink core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Email must not be empty")]
    EmptyEmail,

    #[error("Password must not be empty")]
    EmptyPassword,

    #[error("Password too short (minimum {min} characters)")]
    PasswordTooShort { min: usize },

    #[error("Invite code must not be empty")]
    EmptyInviteCode,

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Unknown prescription status: {0}")]
    UnknownStatus(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
