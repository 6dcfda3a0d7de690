//! Cryptographic helpers for the OAuth round-trip.
//!
//! - HMAC-SHA256 signed `state` tokens (JWT-shaped, stateless)
//! - random API keys and their SHA-256 lookup hashes
//!
//! Uses pure Rust crates, no system crypto.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{AuthIntent, ServiceError};

/// State header (always HS256).
const STATE_HEADER: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

/// How long a redirect to the provider stays valid: 10 minutes.
pub const STATE_EXPIRY_SECS: u64 = 600;

/// Claims carried through the provider in the `state` parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateClaims {
    pub intent: AuthIntent,
    pub provider: String,
    /// Set only for [`AuthIntent::Link`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub nonce: String,
    pub exp: u64,
}

impl StateClaims {
    pub fn new(
        intent: AuthIntent,
        provider: &str,
        user_id: Option<i64>,
        now_unix: u64,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            intent,
            provider: provider.to_string(),
            user_id,
            nonce: generate_token()?,
            exp: now_unix + STATE_EXPIRY_SECS,
        })
    }
}

// ── State tokens ────────────────────────────────────────────────────────────

/// Sign state claims. Returns the encoded token.
pub fn sign_state(claims: &StateClaims, secret: &str) -> Result<String, ServiceError> {
    let header_b64 = URL_SAFE_NO_PAD.encode(STATE_HEADER.as_bytes());
    let payload = serde_json::to_vec(claims)
        .map_err(|e| ServiceError::Internal(format!("state encode failed: {e}")))?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

    let signing_input = format!("{header_b64}.{payload_b64}");
    let sig_b64 = URL_SAFE_NO_PAD.encode(hmac_sha256(secret.as_bytes(), signing_input.as_bytes()));

    Ok(format!("{signing_input}.{sig_b64}"))
}

/// Verify a state token and return its claims if the signature holds and it
/// has not expired.
pub fn verify_state(token: &str, secret: &str, now_unix: u64) -> Result<StateClaims, ServiceError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(ServiceError::BadRequest("invalid OAuth state format".into()));
    }

    let signing_input = format!("{}.{}", parts[0], parts[1]);
    let actual_sig = URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|_| ServiceError::BadRequest("invalid OAuth state signature encoding".into()))?;
    let mut mac = new_mac(secret.as_bytes());
    mac.update(signing_input.as_bytes());
    mac.verify_slice(&actual_sig)
        .map_err(|_| ServiceError::BadRequest("invalid OAuth state signature".into()))?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| ServiceError::BadRequest("invalid OAuth state payload encoding".into()))?;
    let claims: StateClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|_| ServiceError::BadRequest("invalid OAuth state payload".into()))?;

    if now_unix > claims.exp {
        return Err(ServiceError::BadRequest("OAuth state expired".into()));
    }

    Ok(claims)
}

// ── Random tokens ───────────────────────────────────────────────────────────

/// Generate a secure random token. Returns hex-encoded.
pub fn generate_token() -> Result<String, ServiceError> {
    let mut bytes = [0u8; 32];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| ServiceError::Internal(format!("RNG failure: {e}")))?;
    Ok(hex::encode(bytes))
}

/// Hash a token with SHA-256 for storage. Returns hex-encoded.
pub fn hash_token(token: &str) -> String {
    use sha2::Digest;
    let hash = sha2::Sha256::digest(token.as_bytes());
    hex::encode(hash)
}

// ── Internal ────────────────────────────────────────────────────────────────

fn new_mac(key: &[u8]) -> Hmac<Sha256> {
    Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = new_mac(key);
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";
    const NOW: u64 = 1_700_000_000;

    fn claims(intent: AuthIntent, user_id: Option<i64>) -> StateClaims {
        StateClaims::new(intent, "google", user_id, NOW).unwrap()
    }

    #[test]
    fn state_roundtrip_keeps_claims() {
        let original = claims(AuthIntent::Link, Some(9));
        let token = sign_state(&original, SECRET).unwrap();
        let verified = verify_state(&token, SECRET, NOW + 1).unwrap();
        assert_eq!(verified, original);
    }

    #[test]
    fn state_with_wrong_secret_is_rejected() {
        let token = sign_state(&claims(AuthIntent::Login, None), SECRET).unwrap();
        let err = verify_state(&token, "other-secret", NOW).unwrap_err();
        assert!(err.message().contains("signature"));
    }

    #[test]
    fn expired_state_is_rejected() {
        let token = sign_state(&claims(AuthIntent::Login, None), SECRET).unwrap();
        let err = verify_state(&token, SECRET, NOW + STATE_EXPIRY_SECS + 1).unwrap_err();
        assert!(err.message().contains("expired"));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = sign_state(&claims(AuthIntent::Login, None), SECRET).unwrap();
        let forged = sign_state(&claims(AuthIntent::Link, Some(1)), "attacker").unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_parts: Vec<&str> = forged.split('.').collect();
        parts[1] = forged_parts[1];
        assert!(verify_state(&parts.join("."), SECRET, NOW).is_err());
        assert!(verify_state("garbage", SECRET, NOW).is_err());
    }

    #[test]
    fn tokens_are_unique_and_hash_is_stable() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), hash_token(&b));
    }
}
