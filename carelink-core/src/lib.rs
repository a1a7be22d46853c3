//! CareLink Core Library
//!
//! Pure domain layer for sharing medication records around a care target:
//! - Accounts link to care-target groups through short invite codes
//! - Prescriptions and their line items are recorded per care target
//! - Records written by older releases are normalized on load

pub mod analysis;
pub mod credentials;
pub mod error;
pub mod invite;
pub mod migration;
pub mod models;

pub use credentials::{normalize_email, PasswordPolicy};
pub use error::Error;
pub use invite::InviteCode;
pub use models::*;

/// Result type for carelink-core operations
pub type Result<T> = std::result::Result<T, Error>;
