//! Credential hashing

/// Outcome of checking a password against a stored secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialCheck {
    Valid,
    /// Matched a plaintext secret carried over from an older release;
    /// the caller should replace it with a hash
    ValidLegacy,
    Invalid,
}

/// Hash a password with bcrypt
pub fn hash_password(password: &str, cost: u32) -> Result<String, bcrypt::BcryptError> {
    bcrypt::hash(password, cost)
}

fn is_bcrypt_hash(secret: &str) -> bool {
    secret.starts_with("$2")
}

/// Check a password against a stored secret (bcrypt hash or legacy plaintext)
pub fn check_password(password: &str, stored: &str) -> Result<CredentialCheck, bcrypt::BcryptError> {
    if is_bcrypt_hash(stored) {
        return Ok(if bcrypt::verify(password, stored)? {
            CredentialCheck::Valid
        } else {
            CredentialCheck::Invalid
        });
    }
    Ok(if password == stored {
        CredentialCheck::ValidLegacy
    } else {
        CredentialCheck::Invalid
    })
}
