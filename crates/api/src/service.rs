//! Shared business rules — framework-agnostic pure functions.
//!
//! The server's account flows call these before touching the database, so a
//! validation failure never leaves a partial write behind.

use crate::{AuthError, ServiceError};

// ─── Signup rules ───────────────────────────────────────────────────────────

/// Settings that shape signup validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignupPolicy {
    /// Reject signups where the provider did not report an email.
    pub require_email: bool,
}

/// Validate and normalize an email address. Returns the lowercased, trimmed email.
pub fn validate_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let well_formed = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !well_formed || email.len() > 254 {
        return Err(AuthError::InvalidEmail("invalid email address".into()));
    }
    Ok(email)
}

/// Apply the signup email rule. `None` passes only when email is optional.
pub fn signup_email(
    email: Option<&str>,
    policy: &SignupPolicy,
) -> Result<Option<String>, AuthError> {
    match email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(e) => validate_email(e).map(Some),
        None if policy.require_email => Err(AuthError::InvalidEmail(
            "provider did not report an email address".into(),
        )),
        None => Ok(None),
    }
}

/// Validate a provider-side uid. Returns the trimmed uid.
pub fn validate_uid(uid: &str) -> Result<&str, AuthError> {
    let uid = uid.trim();
    if uid.is_empty() {
        return Err(AuthError::MissingUid);
    }
    Ok(uid)
}

// ─── API Key Generation ─────────────────────────────────────────────────────

/// Generate a new API key with the `alk_` prefix.
pub fn generate_api_key() -> Result<String, ServiceError> {
    Ok(format!("alk_{}", crate::crypto::generate_token()?))
}

/// Hash an API key for persistent storage and lookup.
pub fn hash_api_key(api_key: &str) -> String {
    crate::crypto::hash_token(api_key)
}

/// Prefix used for operator-facing key previews.
pub fn key_prefix(api_key: &str) -> String {
    api_key.chars().take(12).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert_eq!(validate_email("  A@Example.com ").unwrap(), "a@example.com");
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("a@").is_err());
        assert!(validate_email("a@b@c").is_err());
        assert!(validate_email("a b@example.com").is_err());
        assert!(validate_email(&format!("{}@example.com", "x".repeat(250))).is_err());
    }

    #[test]
    fn test_signup_email_policy() {
        let required = SignupPolicy {
            require_email: true,
        };
        let optional = SignupPolicy::default();

        assert!(matches!(
            signup_email(None, &required),
            Err(AuthError::InvalidEmail(_))
        ));
        assert!(matches!(
            signup_email(Some("  "), &required),
            Err(AuthError::InvalidEmail(_))
        ));
        assert_eq!(signup_email(None, &optional).unwrap(), None);
        assert!(signup_email(Some("broken"), &optional).is_err());
        assert_eq!(
            signup_email(Some("a@example.com"), &required).unwrap().as_deref(),
            Some("a@example.com")
        );
    }

    #[test]
    fn test_validate_uid() {
        assert_eq!(validate_uid(" abc123 ").unwrap(), "abc123");
        assert_eq!(validate_uid("   ").unwrap_err(), AuthError::MissingUid);
    }

    #[test]
    fn test_api_key_shape() {
        let key = generate_api_key().unwrap();
        assert!(key.starts_with("alk_"));
        assert_eq!(key_prefix(&key).len(), 12);
        assert_eq!(hash_api_key(&key).len(), 64);
    }
}
