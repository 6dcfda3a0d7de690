//! Generic OAuth2 provider support.
//!
//! Config-driven: no provider-specific code branches. Google, GitHub, GitLab,
//! or any OIDC-compatible service is added through configuration.
//!
//! This module contains only types, URL builders, and response parsing.
//! No HTTP calls or DB access — those live in the server.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::{AuthError, ExternalIdentity};

// ── Provider Configuration ──────────────────────────────────────────────────

/// OAuth2 provider configuration. Loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProviderConfig {
    /// Unique provider key: "google", "github", "gitlab-corp"
    pub id: String,
    /// UI display name: "Google", "GitLab (Corp)"
    pub display_name: String,

    // OAuth2 endpoints
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,

    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub scopes: String,

    /// JSON field mapping from userinfo response to internal fields
    pub field_map: OAuthFieldMap,

    /// OpenID 2.0 realm. When set, the provider is asked to attach the
    /// user's legacy `openid_id` to the `id_token`.
    #[serde(default)]
    pub openid_realm: Option<String>,

    /// External URL for browser redirects (may differ from token_url for Docker setups)
    pub external_authorize_url: Option<String>,
}

/// Maps provider-specific JSON field names to our internal fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthFieldMap {
    /// Field containing the user's unique ID: "id" (GitHub/GitLab) or "sub" (OIDC)
    pub id: String,
    /// Field containing the email: "email"
    pub email: String,
}

/// Tokens returned by the authorization-code exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub id_token: Option<String>,
}

// ── URL Builders (pure functions, no HTTP) ──────────────────────────────────

/// Build the OAuth authorize URL that the user's browser should be redirected to.
pub fn build_authorize_url(
    config: &OAuthProviderConfig,
    redirect_uri: &str,
    state: &str,
) -> String {
    let base = config
        .external_authorize_url
        .as_deref()
        .unwrap_or(&config.authorize_url);

    let mut url = format!(
        "{}?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code",
        base,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(&config.scopes),
    );
    if let Some(realm) = config.openid_realm.as_deref() {
        url.push_str("&openid.realm=");
        url.push_str(&urlencoding::encode(realm));
    }
    url
}

/// Build OAuth2 token request as application/x-www-form-urlencoded pairs.
///
/// OAuth2 token exchange endpoints are required to support urlencoded form input.
pub fn build_token_request_form(
    config: &OAuthProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Vec<(String, String)> {
    vec![
        ("client_id".into(), config.client_id.clone()),
        ("client_secret".into(), config.client_secret.clone()),
        ("code".into(), code.to_string()),
        ("grant_type".into(), "authorization_code".into()),
        ("redirect_uri".into(), redirect_uri.to_string()),
    ]
}

// ── Response Parsing ────────────────────────────────────────────────────────

/// Parse the token exchange response.
///
/// Supports both JSON (`{"access_token":"...","id_token":"..."}`) and
/// query-string style (`access_token=...&scope=...`) payloads.
pub fn parse_token_response(raw: &str) -> Result<TokenSet, AuthError> {
    let body = raw.trim();
    if body.is_empty() {
        return Err(AuthError::AuthenticationFailed(
            "token exchange returned an empty body".into(),
        ));
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        let field = |name: &str| {
            json.get(name)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        if let Some(access_token) = field("access_token") {
            return Ok(TokenSet {
                access_token,
                id_token: field("id_token"),
            });
        }

        let detail = error_detail(
            field("error"),
            field("error_description").or_else(|| field("error_message")),
        );
        return Err(AuthError::AuthenticationFailed(format!(
            "token exchange failed: {detail}"
        )));
    }

    let mut access_token = None;
    let mut id_token = None;
    let mut error = None;
    let mut error_description = None;

    for pair in body.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let value = decode_form_component(v);
        if value.trim().is_empty() {
            continue;
        }
        match decode_form_component(k).as_str() {
            "access_token" => access_token = Some(value),
            "id_token" => id_token = Some(value),
            "error" => error = Some(value),
            "error_description" => error_description = Some(value),
            _ => {}
        }
    }

    match access_token {
        Some(access_token) => Ok(TokenSet {
            access_token,
            id_token,
        }),
        None => Err(AuthError::AuthenticationFailed(format!(
            "token exchange failed: {}",
            error_detail(error, error_description)
        ))),
    }
}

/// Read the `openid_id` claim from an `id_token`.
///
/// The signature is not checked here; the token arrives straight from the
/// provider's token endpoint over TLS.
pub fn openid_id_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    claims["openid_id"]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extract a normalized identity from a provider's userinfo JSON response.
pub fn extract_user_info(
    config: &OAuthProviderConfig,
    userinfo_json: &serde_json::Value,
    tokens: &TokenSet,
) -> Result<ExternalIdentity, AuthError> {
    // Provider user ID may be number or string depending on provider
    let uid = match &userinfo_json[&config.field_map.id] {
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        _ => {
            return Err(AuthError::AuthenticationFailed(format!(
                "userinfo missing '{}' field",
                config.field_map.id
            )));
        }
    };

    let email = userinfo_json[&config.field_map.email]
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(ExternalIdentity {
        provider: config.id.clone(),
        uid,
        email,
        openid_id: tokens.id_token.as_deref().and_then(openid_id_from_id_token),
    })
}

// ── Provider Presets ────────────────────────────────────────────────────────

/// Create a Google OAuth2 provider config.
///
/// Pass `openid_realm` while users from the retired OpenID 2.0 login still
/// need migrating; Google then reports their old identity in the `id_token`.
pub fn google_preset(
    client_id: String,
    client_secret: String,
    openid_realm: Option<String>,
) -> OAuthProviderConfig {
    OAuthProviderConfig {
        id: "google".into(),
        display_name: "Google".into(),
        authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
        token_url: "https://oauth2.googleapis.com/token".into(),
        userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".into(),
        client_id,
        client_secret,
        scopes: "openid email".into(),
        field_map: OAuthFieldMap {
            id: "sub".into(),
            email: "email".into(),
        },
        openid_realm,
        external_authorize_url: None,
    }
}

/// Create a GitHub OAuth2 provider config. Only needs client credentials.
pub fn github_preset(client_id: String, client_secret: String) -> OAuthProviderConfig {
    OAuthProviderConfig {
        id: "github".into(),
        display_name: "GitHub".into(),
        authorize_url: "https://github.com/login/oauth/authorize".into(),
        token_url: "https://github.com/login/oauth/access_token".into(),
        userinfo_url: "https://api.github.com/user".into(),
        client_id,
        client_secret,
        scopes: "read:user,user:email".into(),
        field_map: OAuthFieldMap {
            id: "id".into(),
            email: "email".into(),
        },
        openid_realm: None,
        external_authorize_url: None,
    }
}

/// Create a GitLab OAuth2 provider config for a given instance URL.
///
/// `instance_url` is the server-accessible URL (e.g. `http://gitlab:80` in Docker).
/// `external_url` is the browser-accessible URL (e.g. `http://localhost:8929`).
pub fn gitlab_preset(
    instance_url: String,
    external_url: Option<String>,
    client_id: String,
    client_secret: String,
) -> OAuthProviderConfig {
    let base = instance_url.trim_end_matches('/');
    let ext_base = external_url
        .as_deref()
        .map(|u| u.trim_end_matches('/').to_string());

    OAuthProviderConfig {
        id: "gitlab".into(),
        display_name: "GitLab".into(),
        authorize_url: format!("{base}/oauth/authorize"),
        token_url: format!("{base}/oauth/token"),
        userinfo_url: format!("{base}/api/v4/user"),
        client_id,
        client_secret,
        scopes: "read_user".into(),
        field_map: OAuthFieldMap {
            id: "id".into(),
            email: "email".into(),
        },
        openid_realm: None,
        external_authorize_url: ext_base.map(|b| format!("{b}/oauth/authorize")),
    }
}

// ── API Response Types ──────────────────────────────────────────────────────

/// Available auth providers (returned by GET /api/auth/providers).
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthProvidersResponse {
    pub oauth: Vec<OAuthProviderInfo>,
    /// Whether signup requires the provider to report an email.
    pub email_required: bool,
}

/// Public info about an OAuth provider.
#[derive(Debug, Serialize, Deserialize)]
pub struct OAuthProviderInfo {
    pub id: String,
    pub display_name: String,
}

/// A linked OAuth identity shown in user settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinkedProvider {
    pub provider: String,
    pub uid: String,
    pub display_name: String,
    pub linked_at: String,
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn error_detail(error: Option<String>, description: Option<String>) -> String {
    match (error, description) {
        (Some(e), Some(d)) => format!("{e}: {d}"),
        (Some(e), None) => e,
        (None, Some(d)) => d,
        (None, None) => "no access_token in response".to_string(),
    }
}

fn decode_form_component(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_token_with(claims: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(claims.to_string().as_bytes());
        format!("{header}.{payload}.c2ln")
    }

    #[test]
    fn parse_token_json_ok() {
        let raw = r#"{"access_token":"ya29.abc","token_type":"Bearer","id_token":"a.b.c"}"#;
        let tokens = parse_token_response(raw).expect("token parse");
        assert_eq!(tokens.access_token, "ya29.abc");
        assert_eq!(tokens.id_token.as_deref(), Some("a.b.c"));
    }

    #[test]
    fn parse_token_form_ok() {
        let raw = "access_token=gho_abc&scope=read%3Auser&token_type=bearer";
        let tokens = parse_token_response(raw).expect("token parse");
        assert_eq!(tokens.access_token, "gho_abc");
        assert_eq!(tokens.id_token, None);
    }

    #[test]
    fn parse_token_json_error_has_reason() {
        let raw = r#"{"error":"invalid_grant","error_description":"Bad Request"}"#;
        let err = parse_token_response(raw).expect_err("must fail");
        assert!(matches!(err, AuthError::AuthenticationFailed(ref m) if m.contains("invalid_grant")));
    }

    #[test]
    fn parse_token_empty_body_fails() {
        assert!(parse_token_response("  ").is_err());
    }

    #[test]
    fn openid_id_is_read_from_id_token_payload() {
        let token = id_token_with(serde_json::json!({
            "sub": "xyz",
            "openid_id": "https://openid.example/u1",
        }));
        assert_eq!(
            openid_id_from_id_token(&token).as_deref(),
            Some("https://openid.example/u1")
        );
    }

    #[test]
    fn openid_id_absent_or_garbage_is_none() {
        let token = id_token_with(serde_json::json!({ "sub": "xyz" }));
        assert_eq!(openid_id_from_id_token(&token), None);
        assert_eq!(openid_id_from_id_token("not-a-jwt"), None);
        assert_eq!(openid_id_from_id_token("a.%%%.c"), None);
    }

    #[test]
    fn authorize_url_carries_required_params() {
        let provider = google_preset(
            "cid".into(),
            "secret".into(),
            Some("https://app.example/".into()),
        );
        let url = build_authorize_url(&provider, "https://app/cb", "st-1");
        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fapp%2Fcb"));
        assert!(url.contains("state=st-1"));
        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("openid.realm=https%3A%2F%2Fapp.example%2F"));
    }

    #[test]
    fn authorize_url_prefers_external_url() {
        let provider = gitlab_preset(
            "http://gitlab:80".into(),
            Some("http://localhost:8929/".into()),
            "cid".into(),
            "secret".into(),
        );
        let url = build_authorize_url(&provider, "https://app/cb", "s");
        assert!(url.starts_with("http://localhost:8929/oauth/authorize?"));
        assert!(!url.contains("openid.realm"));
    }

    #[test]
    fn token_form_contains_required_fields() {
        let provider = github_preset("cid".into(), "secret".into());
        let form = build_token_request_form(&provider, "code-1", "https://app/callback");
        let get = |k: &str| form.iter().find(|(key, _)| key == k).map(|(_, v)| v.as_str());
        assert_eq!(get("client_id"), Some("cid"));
        assert_eq!(get("client_secret"), Some("secret"));
        assert_eq!(get("grant_type"), Some("authorization_code"));
        assert_eq!(get("code"), Some("code-1"));
    }

    #[test]
    fn extract_user_info_numeric_id_and_openid() {
        let provider = github_preset("cid".into(), "secret".into());
        let tokens = TokenSet {
            access_token: "t".into(),
            id_token: Some(id_token_with(serde_json::json!({ "openid_id": "legacy-1" }))),
        };
        let info = extract_user_info(
            &provider,
            &serde_json::json!({ "id": 42, "email": "a@example.com" }),
            &tokens,
        )
        .expect("user info");
        assert_eq!(info.provider, "github");
        assert_eq!(info.uid, "42");
        assert_eq!(info.email.as_deref(), Some("a@example.com"));
        assert_eq!(info.openid_id.as_deref(), Some("legacy-1"));
    }

    #[test]
    fn extract_user_info_without_id_fails() {
        let provider = google_preset("cid".into(), "secret".into(), None);
        let tokens = TokenSet {
            access_token: "t".into(),
            id_token: None,
        };
        let err = extract_user_info(&provider, &serde_json::json!({ "sub": "" }), &tokens)
            .expect_err("must fail");
        assert!(matches!(err, AuthError::AuthenticationFailed(_)));
    }
}
