//! Email and password rules applied before any account lookup

use crate::{Error, Result};

/// Default minimum password length
pub const DEFAULT_MIN_PASSWORD_LEN: usize = 6;

/// Normalize an email for storage and comparison (trim + lowercase)
pub fn normalize_email(email: &str) -> Result<String> {
    let normalized = email.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(Error::EmptyEmail);
    }
    Ok(normalized)
}

/// Password acceptance rules for local registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_len: usize,
}

impl PasswordPolicy {
    pub fn new(min_len: usize) -> Self {
        Self { min_len }
    }

    /// Check a candidate password, counting characters rather than bytes
    pub fn check(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(Error::EmptyPassword);
        }
        if password.chars().count() < self.min_len {
            return Err(Error::PasswordTooShort { min: self.min_len });
        }
        Ok(())
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_PASSWORD_LEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  A@X.com ").unwrap(), "a@x.com");
        assert!(matches!(normalize_email("   "), Err(Error::EmptyEmail)));
    }

    #[test]
    fn test_password_policy() {
        let policy = PasswordPolicy::default();
        assert!(matches!(policy.check(""), Err(Error::EmptyPassword)));
        assert!(matches!(
            policy.check("12345"),
            Err(Error::PasswordTooShort { min: 6 })
        ));
        assert!(policy.check("123456").is_ok());
        // Multi-byte characters count once each
        assert!(policy.check("藥單密碼好長").is_ok());
    }
}
