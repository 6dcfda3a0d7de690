//! Shared API types, OAuth provider helpers, and SQL builders for accountlink.
//!
//! This crate is the single source of truth for the request/response types
//! and the error taxonomy. It performs no HTTP calls and owns no database
//! connection; the server crate drives both.

use serde::{Deserialize, Serialize};

#[cfg(feature = "backend")]
pub mod crypto;
#[cfg(feature = "backend")]
pub mod db;
pub mod oauth;
#[cfg(feature = "backend")]
pub mod service;

// ─── Shared Enums ────────────────────────────────────────────────────────────

/// What an OAuth round-trip was started for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthIntent {
    Login,
    Signup,
    Link,
}

impl AuthIntent {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Login => "login",
            Self::Signup => "signup",
            Self::Link => "link",
        }
    }
}

// ─── Accounts ────────────────────────────────────────────────────────────────

/// A local user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub email: Option<String>,
    /// `"<provider>:<uid>"` of the identity the user authenticated with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
}

impl User {
    /// Tag this user with the identity used to authenticate.
    pub fn with_identity(mut self, provider: &str, uid: &str) -> Self {
        self.identity = Some(identity_tag(provider, uid));
        self
    }
}

/// A `(provider, uid)` pair linked to a local user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i64,
    pub provider: String,
    pub uid: String,
    pub created_at: String,
}

/// Normalized identity returned by a provider after a successful exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Provider key (e.g. `"google"`).
    pub provider: String,
    /// Provider-side stable user id.
    pub uid: String,
    pub email: Option<String>,
    /// `openid_id` claim of the provider's `id_token`, if one was attached.
    pub openid_id: Option<String>,
}

/// Format the `"<provider>:<uid>"` tag.
pub fn identity_tag(provider: &str, uid: &str) -> String {
    format!("{provider}:{uid}")
}

// ─── Responses ───────────────────────────────────────────────────────────────

/// Returned on successful login or signup.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub user_id: i64,
    pub email: Option<String>,
    pub identity: String,
    /// Bearer credential for the linking endpoints. Shown once.
    pub api_key: String,
}

/// Returned after linking a new identity.
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityResponse {
    pub user_id: i64,
    pub identity: String,
}

/// Returned by `GET /api/auth/identities`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListIdentitiesResponse {
    pub identities: Vec<oauth::LinkedProvider>,
}

/// Returned by `DELETE /api/auth/identities/{provider}/{uid}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RemoveIdentityResponse {
    pub removed: bool,
}

/// Response for OAuth link initiation (redirect URL).
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthLinkResponse {
    pub url: String,
}

/// Returned by `GET /api/health` — server liveness check.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ─── Auth Error ──────────────────────────────────────────────────────────────

/// Every way an OAuth login, signup, or link can fail.
///
/// Callers present these as user-facing messages; `Storage` is the only
/// variant whose detail must not reach the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum AuthError {
    /// No identity could be resolved from the provider.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The login policy or the user cancelled the attempt.
    #[error("authentication cancelled: {0}")]
    AuthenticationCancelled(String),

    /// The identity resolved, but no local account is linked to it.
    #[error("no account found for {identity}")]
    AccountNotFound { identity: String },

    #[error("{0}")]
    InvalidEmail(String),

    #[error("provider did not return a user id")]
    MissingUid,

    #[error("an account with this email already exists")]
    AccountExists,

    #[error("identity {provider}:{uid} is already linked to an account")]
    IdentityExists { provider: String, uid: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// HTTP status code as a `u16`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::AuthenticationFailed(_) => 401,
            Self::AuthenticationCancelled(_) => 403,
            Self::AccountNotFound { .. } => 404,
            Self::InvalidEmail(_) | Self::MissingUid | Self::InvalidArgument(_) => 400,
            Self::AccountExists | Self::IdentityExists { .. } => 409,
            Self::Storage(_) => 500,
        }
    }

    /// Stable machine-readable code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::AuthenticationCancelled(_) => "authentication_cancelled",
            Self::AccountNotFound { .. } => "account_not_found",
            Self::InvalidEmail(_) => "invalid_email",
            Self::MissingUid => "missing_uid",
            Self::AccountExists => "account_exists",
            Self::IdentityExists { .. } => "identity_exists",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Storage(_) => "internal",
        }
    }

    /// Build a closure that wraps a DB error as `Storage`.
    pub fn from_db<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> Self + '_ {
        move |e| Self::Storage(format!("{context}: {e}"))
    }
}

// ─── Service Error ───────────────────────────────────────────────────────────

/// Framework-agnostic service error for everything outside the account flows
/// (bad parameters, bad state tokens, provider I/O).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ServiceError {
    BadRequest(String),
    Internal(String),
}

impl ServiceError {
    /// HTTP status code as a `u16`.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest(m) | Self::Internal(m) => m,
        }
    }
}

impl std::fmt::Display for ServiceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ServiceError {}

/// JSON error shape `{ "error": "...", "code": "..." }` returned by all error responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl From<&ServiceError> for ApiError {
    fn from(e: &ServiceError) -> Self {
        Self {
            error: e.message().to_string(),
            code: None,
        }
    }
}

impl From<&AuthError> for ApiError {
    fn from(e: &AuthError) -> Self {
        let error = match e {
            AuthError::Storage(_) => "internal server error".to_string(),
            other => other.to_string(),
        };
        Self {
            error,
            code: Some(e.code().to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_tag_joins_provider_and_uid() {
        let user = User {
            id: 7,
            email: None,
            identity: None,
        }
        .with_identity("google", "abc123");
        assert_eq!(user.identity.as_deref(), Some("google:abc123"));
    }

    #[test]
    fn storage_errors_are_hidden_from_clients() {
        let err = AuthError::Storage("disk I/O error".into());
        let body = ApiError::from(&err);
        assert_eq!(body.error, "internal server error");
        assert_eq!(body.code.as_deref(), Some("internal"));
        assert_eq!(err.status_code(), 500);
    }

    #[test]
    fn account_not_found_is_distinct_from_failed_auth() {
        let missing = AuthError::AccountNotFound {
            identity: "google:xyz".into(),
        };
        let failed = AuthError::AuthenticationFailed("no code".into());
        assert_ne!(missing.status_code(), failed.status_code());
        assert_eq!(missing.code(), "account_not_found");
    }
}
