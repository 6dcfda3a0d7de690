mod accounts;
mod error;
mod policy;
mod provider;
mod routes;
mod storage;

use axum::{
    Router,
    extract::FromRef,
    routing::{delete, get, post},
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use accountlink_api::oauth::{self, OAuthProviderConfig};
use accountlink_api::service::SignupPolicy;
use policy::{AllowAll, AttemptLimiter, LoginPolicy};
use storage::Db;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: AppConfig,
    pub http: reqwest::Client,
    pub policy: Arc<dyn LoginPolicy>,
}

/// Server configuration loaded from environment variables.
#[derive(Clone)]
pub struct AppConfig {
    pub base_url: String,
    pub state_secret: String,
    pub signup: SignupPolicy,
    /// Take the client address from `X-Forwarded-For` (behind a reverse proxy).
    pub trust_forwarded_for: bool,
    pub oauth_providers: Vec<OAuthProviderConfig>,
}

impl FromRef<AppState> for Db {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_flag(key: &str) -> bool {
    env_nonempty(key).is_some_and(|v| matches!(v.as_str(), "1" | "true" | "yes"))
}

/// Load OAuth providers from environment variables.
fn load_oauth_providers() -> Vec<OAuthProviderConfig> {
    [try_load_google(), try_load_github(), try_load_gitlab()]
        .into_iter()
        .flatten()
        .collect()
}

fn try_load_google() -> Option<OAuthProviderConfig> {
    let id = env_nonempty("GOOGLE_CLIENT_ID")?;
    let secret = env_nonempty("GOOGLE_CLIENT_SECRET")?;
    let realm = env_nonempty("GOOGLE_OPENID_REALM");
    match &realm {
        Some(realm) => tracing::info!("OAuth provider enabled: Google (OpenID realm {realm})"),
        None => tracing::info!("OAuth provider enabled: Google"),
    }
    Some(oauth::google_preset(id, secret, realm))
}

fn try_load_github() -> Option<OAuthProviderConfig> {
    let id = env_nonempty("GITHUB_CLIENT_ID")?;
    let secret = env_nonempty("GITHUB_CLIENT_SECRET")?;
    tracing::info!("OAuth provider enabled: GitHub");
    Some(oauth::github_preset(id, secret))
}

fn try_load_gitlab() -> Option<OAuthProviderConfig> {
    let url = env_nonempty("GITLAB_URL")?;
    let id = env_nonempty("GITLAB_CLIENT_ID")?;
    let secret = env_nonempty("GITLAB_CLIENT_SECRET")?;
    let ext_url = env_nonempty("GITLAB_EXTERNAL_URL");
    tracing::info!("OAuth provider enabled: GitLab ({})", url);
    Some(oauth::gitlab_preset(url, ext_url, id, secret))
}

fn load_login_policy() -> Arc<dyn LoginPolicy> {
    let Some(max) = env_nonempty("LOGIN_MAX_ATTEMPTS").and_then(|v| v.parse::<u32>().ok()) else {
        return Arc::new(AllowAll);
    };
    let window = env_nonempty("LOGIN_WINDOW_SECS")
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60);
    match AttemptLimiter::enabled(max, Duration::from_secs(window)) {
        Some(limiter) => {
            tracing::info!("login rate limit: {max} attempts per {window}s");
            Arc::new(limiter)
        }
        None => Arc::new(AllowAll),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "accountlink_server=info,tower_http=info".into()),
        )
        .init();

    let data_dir = env_nonempty("ACCOUNTLINK_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("data"));
    tracing::info!("data directory: {}", data_dir.display());

    let db = storage::init_db(&data_dir)?;
    tracing::info!("database initialized");

    let base_url = env_nonempty("BASE_URL")
        .unwrap_or_else(|| "http://localhost:3000".into())
        .trim_end_matches('/')
        .to_string();

    let state_secret = std::env::var("STATE_SECRET").unwrap_or_default();
    if state_secret.is_empty() {
        tracing::warn!("STATE_SECRET not set, OAuth flows will be rejected");
    }

    let config = AppConfig {
        base_url: base_url.clone(),
        state_secret,
        signup: SignupPolicy {
            require_email: env_flag("REQUIRE_EMAIL"),
        },
        trust_forwarded_for: env_flag("TRUST_PROXY"),
        oauth_providers: load_oauth_providers(),
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;

    let state = AppState {
        db,
        config,
        http,
        policy: load_login_policy(),
    };

    let api = Router::new()
        .route("/health", get(routes::health::health))
        .route("/auth/providers", get(routes::oauth::providers))
        .route("/auth/oauth/{provider}/login", get(routes::oauth::login))
        .route("/auth/oauth/{provider}/signup", get(routes::oauth::signup))
        .route("/auth/oauth/{provider}/link", post(routes::oauth::link))
        .route(
            "/auth/oauth/{provider}/link/callback",
            get(routes::oauth::link_callback),
        )
        .route("/auth/identities", get(routes::oauth::list_identities))
        .route(
            "/auth/identities/{provider}/{uid}",
            delete(routes::oauth::remove_identity),
        );

    let app = Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    tracing::info!("starting server at {base_url}");

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".into());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
