use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;

use accountlink_api::{
    AuthIntent, IdentityResponse, ListIdentitiesResponse, OAuthLinkResponse,
    RemoveIdentityResponse, SessionResponse, User,
    crypto::{self, StateClaims},
    oauth::{self, AuthProvidersResponse, LinkedProvider, OAuthProviderConfig, OAuthProviderInfo},
};

use super::auth::AuthUser;
use crate::accounts::{self, AuthRequest, AuthStep};
use crate::error::ApiErr;
use crate::provider::HttpProvider;
use crate::{AppConfig, AppState};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Query parameters the provider appends when sending the browser back.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

impl CallbackQuery {
    /// A request carrying a non-empty `code` or an `error` is the provider
    /// callback. Anything else starts a new round-trip.
    fn is_callback(&self) -> bool {
        self.code.as_deref().is_some_and(|c| !c.is_empty()) || self.error.is_some()
    }
}

fn find_provider<'a>(config: &'a AppConfig, id: &str) -> Result<&'a OAuthProviderConfig, ApiErr> {
    config
        .oauth_providers
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| ApiErr::not_found(format!("OAuth provider '{id}' not found")))
}

fn state_secret(config: &AppConfig) -> Result<&str, ApiErr> {
    if config.state_secret.is_empty() {
        return Err(ApiErr::internal("STATE_SECRET not configured"));
    }
    Ok(&config.state_secret)
}

fn callback_url(config: &AppConfig, provider_id: &str, intent: AuthIntent) -> String {
    let path = match intent {
        AuthIntent::Login => "login",
        AuthIntent::Signup => "signup",
        AuthIntent::Link => "link/callback",
    };
    format!("{}/api/auth/oauth/{provider_id}/{path}", config.base_url)
}

fn now_unix() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

fn client_addr(config: &AppConfig, headers: &HeaderMap, peer: SocketAddr) -> String {
    let forwarded = config
        .trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match forwarded {
        Some(addr) => addr.to_string(),
        None => peer.ip().to_string(),
    }
}

/// Check the `state` the provider echoed back against the flow we are in.
fn verify_callback_state(
    query: &CallbackQuery,
    secret: &str,
    intent: AuthIntent,
    provider_id: &str,
) -> Result<StateClaims, ApiErr> {
    let token = query
        .state
        .as_deref()
        .ok_or_else(|| ApiErr::bad_request("missing state parameter"))?;
    let claims = crypto::verify_state(token, secret, now_unix())?;
    if claims.intent != intent {
        tracing::warn!(
            expected = intent.as_str(),
            got = claims.intent.as_str(),
            "OAuth state intent mismatch"
        );
        return Err(ApiErr::bad_request("OAuth state intent mismatch"));
    }
    if claims.provider != provider_id {
        return Err(ApiErr::bad_request("OAuth state provider mismatch"));
    }
    Ok(claims)
}

/// Run one phase of the provider round-trip for a login or signup request.
async fn round_trip(
    state: &AppState,
    provider: &OAuthProviderConfig,
    intent: AuthIntent,
    query: &CallbackQuery,
    client: &str,
) -> Result<AuthStep, ApiErr> {
    let secret = state_secret(&state.config)?;

    let outgoing_state = if query.is_callback() {
        verify_callback_state(query, secret, intent, &provider.id)?;
        String::new()
    } else {
        let claims = StateClaims::new(intent, &provider.id, None, now_unix())?;
        crypto::sign_state(&claims, secret)?
    };

    let redirect_uri = callback_url(&state.config, &provider.id, intent);
    let req = AuthRequest {
        code: query.code.as_deref(),
        error: query.error.as_deref(),
        redirect_uri: &redirect_uri,
        state: &outgoing_state,
        client,
    };
    let adapter = HttpProvider::new(provider, &state.http);
    Ok(accounts::authenticate(&adapter, state.policy.as_ref(), &req).await?)
}

fn session_response(user: User, api_key: String) -> SessionResponse {
    SessionResponse {
        user_id: user.id,
        email: user.email,
        identity: user.identity.unwrap_or_default(),
        api_key,
    }
}

// ---------------------------------------------------------------------------
// GET /api/auth/providers — list available providers
// ---------------------------------------------------------------------------

/// GET /api/auth/providers — list configured OAuth providers.
pub async fn providers(State(config): State<AppConfig>) -> Json<AuthProvidersResponse> {
    Json(AuthProvidersResponse {
        oauth: config
            .oauth_providers
            .iter()
            .map(|p| OAuthProviderInfo {
                id: p.id.clone(),
                display_name: p.display_name.clone(),
            })
            .collect(),
        email_required: config.signup.require_email,
    })
}

// ---------------------------------------------------------------------------
// GET /api/auth/oauth/:provider/login — redirect, then log in on callback
// ---------------------------------------------------------------------------

/// GET /api/auth/oauth/:provider/login — phase 1 redirects to the provider;
/// the callback (same URL, with `code`) resolves the local user.
pub async fn login(
    Path(provider_id): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiErr> {
    let provider = find_provider(&state.config, &provider_id)?;
    let client = client_addr(&state.config, &headers, peer);

    let identity = match round_trip(&state, provider, AuthIntent::Login, &query, &client).await? {
        AuthStep::Redirect(url) => return Ok(Redirect::temporary(&url).into_response()),
        AuthStep::Resolved(identity) => identity,
    };

    let mut conn = state.db.conn();
    let user = accounts::login(&mut conn, &identity)?;
    let api_key = accounts::issue_api_key(&conn, user.id)?;

    Ok(Json(session_response(user, api_key)).into_response())
}

// ---------------------------------------------------------------------------
// GET /api/auth/oauth/:provider/signup — redirect, then create on callback
// ---------------------------------------------------------------------------

/// GET /api/auth/oauth/:provider/signup — like `login`, but creates the user.
pub async fn signup(
    Path(provider_id): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, ApiErr> {
    let provider = find_provider(&state.config, &provider_id)?;
    let client = client_addr(&state.config, &headers, peer);

    let identity = match round_trip(&state, provider, AuthIntent::Signup, &query, &client).await? {
        AuthStep::Redirect(url) => return Ok(Redirect::temporary(&url).into_response()),
        AuthStep::Resolved(identity) => identity,
    };

    let mut conn = state.db.conn();
    let user = accounts::signup(&mut conn, &identity, &state.config.signup)?;
    let api_key = accounts::issue_api_key(&conn, user.id)?;

    Ok((StatusCode::CREATED, Json(session_response(user, api_key))).into_response())
}

// ---------------------------------------------------------------------------
// POST /api/auth/oauth/:provider/link — initiate linking for authenticated user
// ---------------------------------------------------------------------------

/// POST /api/auth/oauth/:provider/link — returns the provider URL to open.
pub async fn link(
    Path(provider_id): Path<String>,
    State(config): State<AppConfig>,
    user: AuthUser,
) -> Result<Json<OAuthLinkResponse>, ApiErr> {
    let provider = find_provider(&config, &provider_id)?;
    let secret = state_secret(&config)?;

    let claims = StateClaims::new(AuthIntent::Link, &provider.id, Some(user.user_id), now_unix())?;
    let state = crypto::sign_state(&claims, secret)?;
    let redirect_uri = callback_url(&config, &provider.id, AuthIntent::Link);
    let url = oauth::build_authorize_url(provider, &redirect_uri, &state);

    Ok(Json(OAuthLinkResponse { url }))
}

// ---------------------------------------------------------------------------
// GET /api/auth/oauth/:provider/link/callback — finish linking
// ---------------------------------------------------------------------------

/// GET /api/auth/oauth/:provider/link/callback — exchange the code and link
/// the identity to the user named in the signed state.
pub async fn link_callback(
    Path(provider_id): Path<String>,
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<IdentityResponse>, ApiErr> {
    let provider = find_provider(&state.config, &provider_id)?;
    if !query.is_callback() {
        return Err(ApiErr::bad_request("missing code parameter"));
    }

    let secret = state_secret(&state.config)?;
    let claims = verify_callback_state(&query, secret, AuthIntent::Link, &provider.id)?;
    let user_id = claims
        .user_id
        .ok_or_else(|| ApiErr::bad_request("OAuth state carries no user"))?;

    let redirect_uri = callback_url(&state.config, &provider.id, AuthIntent::Link);
    let client = client_addr(&state.config, &headers, peer);
    let req = AuthRequest {
        code: query.code.as_deref(),
        error: query.error.as_deref(),
        redirect_uri: &redirect_uri,
        state: "",
        client: &client,
    };
    let adapter = HttpProvider::new(provider, &state.http);
    let identity = match accounts::authenticate(&adapter, state.policy.as_ref(), &req).await? {
        AuthStep::Resolved(identity) => identity,
        AuthStep::Redirect(_) => return Err(ApiErr::bad_request("missing code parameter")),
    };

    let mut conn = state.db.conn();
    let user = accounts::add_identity(&mut conn, user_id, &identity)?;

    Ok(Json(IdentityResponse {
        user_id: user.id,
        identity: user.identity.unwrap_or_default(),
    }))
}

// ---------------------------------------------------------------------------
// GET /api/auth/identities — linked identities of the current user
// ---------------------------------------------------------------------------

/// GET /api/auth/identities — identities linked to the authenticated user.
pub async fn list_identities(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ListIdentitiesResponse>, ApiErr> {
    let conn = state.db.conn();
    let identities = accounts::list_identities(&conn, user.user_id)?
        .into_iter()
        .map(|identity| LinkedProvider {
            display_name: find_provider(&state.config, &identity.provider)
                .map(|p| p.display_name.clone())
                .unwrap_or_else(|_| identity.provider.clone()),
            provider: identity.provider,
            uid: identity.uid,
            linked_at: identity.created_at,
        })
        .collect();

    Ok(Json(ListIdentitiesResponse { identities }))
}

// ---------------------------------------------------------------------------
// DELETE /api/auth/identities/:provider/:uid — unlink
// ---------------------------------------------------------------------------

/// DELETE /api/auth/identities/:provider/:uid — unlink one identity.
pub async fn remove_identity(
    Path((provider_id, uid)): Path<(String, String)>,
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<RemoveIdentityResponse>, ApiErr> {
    let conn = state.db.conn();
    let removed = accounts::remove_identity(&conn, user.user_id, &provider_id, &uid)?;
    Ok(Json(RemoveIdentityResponse { removed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use accountlink_api::service::SignupPolicy;

    fn config() -> AppConfig {
        AppConfig {
            base_url: "https://app.test".into(),
            state_secret: "s3cret".into(),
            trust_forwarded_for: false,
            signup: SignupPolicy::default(),
            oauth_providers: vec![accountlink_api::oauth::google_preset(
                "cid".into(),
                "secret".into(),
                None,
            )],
        }
    }

    fn query_with_state(state: String) -> CallbackQuery {
        CallbackQuery {
            code: Some("c0de".into()),
            state: Some(state),
            error: None,
        }
    }

    #[test]
    fn callback_urls_per_intent() {
        let config = config();
        assert_eq!(
            callback_url(&config, "google", AuthIntent::Login),
            "https://app.test/api/auth/oauth/google/login"
        );
        assert_eq!(
            callback_url(&config, "google", AuthIntent::Link),
            "https://app.test/api/auth/oauth/google/link/callback"
        );
    }

    #[test]
    fn callback_state_must_match_intent_and_provider() {
        let claims = StateClaims::new(AuthIntent::Login, "google", None, now_unix()).unwrap();
        let token = crypto::sign_state(&claims, "s3cret").unwrap();

        let query = query_with_state(token);
        assert!(verify_callback_state(&query, "s3cret", AuthIntent::Login, "google").is_ok());
        assert!(verify_callback_state(&query, "s3cret", AuthIntent::Signup, "google").is_err());
        assert!(verify_callback_state(&query, "s3cret", AuthIntent::Login, "github").is_err());
        assert!(verify_callback_state(&query, "other", AuthIntent::Login, "google").is_err());

        let missing = CallbackQuery {
            code: Some("c0de".into()),
            ..Default::default()
        };
        let err = verify_callback_state(&missing, "s3cret", AuthIntent::Login, "google")
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn forwarded_for_is_only_used_when_trusted() {
        let mut config = config();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "10.0.0.1:5555".parse().unwrap();

        assert_eq!(client_addr(&config, &headers, peer), "10.0.0.1");
        config.trust_forwarded_for = true;
        assert_eq!(client_addr(&config, &headers, peer), "203.0.113.9");
    }

    #[test]
    fn empty_code_starts_a_new_round_trip() {
        let empty = CallbackQuery {
            code: Some(String::new()),
            ..Default::default()
        };
        assert!(!empty.is_callback());

        let denied = CallbackQuery {
            code: Some(String::new()),
            error: Some("access_denied".into()),
            ..Default::default()
        };
        assert!(denied.is_callback());
        assert!(query_with_state("st".into()).is_callback());
    }

    #[test]
    fn unknown_provider_is_not_found() {
        let err = find_provider(&config(), "myspace").unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
