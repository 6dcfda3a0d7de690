//! Provider adapter: the three calls the account flows need from an OAuth2
//! identity provider.

use std::future::Future;

use accountlink_api::oauth::{self, OAuthProviderConfig, TokenSet};
use accountlink_api::{AuthError, ExternalIdentity};

/// An OAuth2 identity provider.
///
/// Implementations own the protocol details (URL shape, token exchange,
/// userinfo lookup). The account flows only see the normalized result.
pub trait OAuthProvider: Send + Sync {
    /// Short provider key stored with each identity.
    fn key(&self) -> &str;

    /// URL the browser is sent to in phase 1.
    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String;

    /// Exchange an authorization code for tokens.
    fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> impl Future<Output = Result<TokenSet, AuthError>> + Send;

    /// Resolve tokens to the provider's view of the user.
    fn user_details(
        &self,
        tokens: &TokenSet,
    ) -> impl Future<Output = Result<ExternalIdentity, AuthError>> + Send;
}

/// Config-driven provider that talks to real endpoints over HTTP.
pub struct HttpProvider<'a> {
    config: &'a OAuthProviderConfig,
    client: &'a reqwest::Client,
}

impl<'a> HttpProvider<'a> {
    pub fn new(config: &'a OAuthProviderConfig, client: &'a reqwest::Client) -> Self {
        Self { config, client }
    }
}

impl OAuthProvider for HttpProvider<'_> {
    fn key(&self) -> &str {
        &self.config.id
    }

    fn authorization_url(&self, redirect_uri: &str, state: &str) -> String {
        oauth::build_authorize_url(self.config, redirect_uri, state)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, AuthError> {
        let form = oauth::build_token_request_form(self.config, code, redirect_uri);
        let body = self
            .client
            .post(&self.config.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.config.id, "token exchange request failed: {e}");
                AuthError::AuthenticationFailed("token exchange failed".into())
            })?
            .text()
            .await
            .map_err(|e| AuthError::AuthenticationFailed(format!("token response unreadable: {e}")))?;

        oauth::parse_token_response(&body)
    }

    async fn user_details(&self, tokens: &TokenSet) -> Result<ExternalIdentity, AuthError> {
        let userinfo: serde_json::Value = self
            .client
            .get(&self.config.userinfo_url)
            .bearer_auth(&tokens.access_token)
            .header("User-Agent", "accountlink-server")
            .header("Accept", "application/json")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| {
                tracing::warn!(provider = %self.config.id, "userinfo fetch failed: {e}");
                AuthError::AuthenticationFailed("userinfo fetch failed".into())
            })?
            .json()
            .await
            .map_err(|e| AuthError::AuthenticationFailed(format!("userinfo parse failed: {e}")))?;

        oauth::extract_user_info(self.config, &userinfo, tokens)
    }
}
