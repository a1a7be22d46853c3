//! Error taxonomy for the CareLink data layer

use thiserror::Error;

use crate::analysis::AnalysisError;

/// Coarse classification callers can branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Auth,
    Storage,
    Analysis,
}

#[derive(Debug, Error)]
pub enum CareError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Auth(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invite code space exhausted after {attempts} attempts")]
    InviteCodeSpaceExhausted { attempts: u32 },

    #[error(transparent)]
    Analysis(#[from] AnalysisError),
}

impl CareError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CareError::Validation(_) => ErrorKind::Validation,
            CareError::Conflict(_) | CareError::InviteCodeSpaceExhausted { .. } => {
                ErrorKind::Conflict
            }
            CareError::NotFound(_) => ErrorKind::NotFound,
            CareError::Auth(_) => ErrorKind::Auth,
            CareError::Storage(_) => ErrorKind::Storage,
            CareError::Analysis(_) => ErrorKind::Analysis,
        }
    }

    /// Message suitable for showing to the person at the keyboard
    pub fn user_message(&self) -> String {
        match self {
            CareError::Validation(msg) | CareError::Conflict(msg) | CareError::NotFound(msg) => {
                msg.clone()
            }
            CareError::Auth(msg) => format!("Please sign in again ({})", msg),
            CareError::Storage(_) => "Could not save your changes. Please try again.".to_string(),
            CareError::InviteCodeSpaceExhausted { .. } => {
                "Could not create a new care target right now.".to_string()
            }
            CareError::Analysis(e) if e.is_rate_limited() => {
                "The prescription reader is busy. Please wait a moment and try again.".to_string()
            }
            CareError::Analysis(_) => "The prescription could not be read.".to_string(),
        }
    }
}

impl From<carelink_core::Error> for CareError {
    fn from(e: carelink_core::Error) -> Self {
        CareError::Validation(e.to_string())
    }
}

impl From<rusqlite::Error> for CareError {
    fn from(e: rusqlite::Error) -> Self {
        CareError::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for CareError {
    fn from(e: serde_json::Error) -> Self {
        CareError::Storage(format!("encoding: {}", e))
    }
}

impl From<bcrypt::BcryptError> for CareError {
    fn from(e: bcrypt::BcryptError) -> Self {
        CareError::Storage(format!("credential hashing: {}", e))
    }
}
