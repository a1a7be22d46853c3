//! Invite codes for joining a care target
//!
//! Codes are six characters drawn from an alphabet without visually
//! confusable symbols (no 0/O, no 1/I), so they survive being read
//! aloud or copied by hand.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Symbols an invite code may contain
pub const INVITE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Number of symbols in a generated code
pub const INVITE_CODE_LEN: usize = 6;

/// Default bound on generation attempts before giving up
pub const DEFAULT_INVITE_ATTEMPTS: u32 = 20;

/// A normalized (trimmed, uppercase) invite code
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InviteCode(String);

impl InviteCode {
    /// Draw a random code from the invite alphabet
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let code = (0..INVITE_CODE_LEN)
            .map(|_| INVITE_ALPHABET[rng.gen_range(0..INVITE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalize user input. Only blank input is rejected; a code that
    /// matches no group is a lookup miss, not a validation failure.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_uppercase();
        if normalized.is_empty() {
            return Err(Error::EmptyInviteCode);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the code has the shape of a generated one
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == INVITE_CODE_LEN && self.0.bytes().all(|b| INVITE_ALPHABET.contains(&b))
    }
}

impl fmt::Display for InviteCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generate a code for which `is_taken` returns false, trying at most
/// `attempts` times. `None` means the bound was exhausted.
pub fn generate_unique<R, F>(rng: &mut R, attempts: u32, is_taken: F) -> Option<InviteCode>
where
    R: Rng + ?Sized,
    F: Fn(&InviteCode) -> bool,
{
    (0..attempts)
        .map(|_| InviteCode::generate(rng))
        .find(|code| !is_taken(code))
}
