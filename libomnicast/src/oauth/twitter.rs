//! Twitter/X: authorization code flow with PKCE (S256)

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{
    authorize_url, ClientAuth, DiscoveredIdentity, OAuthFlow, OAuthProvider, TokenClient, TokenSet,
};
use crate::config::OAuthClientConfig;
use crate::error::{OmnicastError, PlatformError, Result};
use crate::types::Platform;

pub const DEFAULT_AUTH_URL: &str = "https://twitter.com/i/oauth2/authorize";
pub const DEFAULT_TOKEN_URL: &str = "https://api.twitter.com/2/oauth2/token";
pub const DEFAULT_API_BASE: &str = "https://api.twitter.com";
const DEFAULT_SCOPES: &str = "tweet.read tweet.write users.read offline.access";

pub struct TwitterProvider {
    http: reqwest::Client,
    tokens: TokenClient,
    auth_url: String,
    api_base: String,
    redirect_uri: String,
    scopes: String,
}

#[derive(Debug, Deserialize)]
struct MeResponse {
    data: TwitterUser,
}

#[derive(Debug, Deserialize)]
struct TwitterUser {
    id: String,
    name: String,
    username: String,
    profile_image_url: Option<String>,
}

impl TwitterProvider {
    pub fn new(http: reqwest::Client, config: &OAuthClientConfig) -> Self {
        Self {
            http,
            tokens: TokenClient::new(config, DEFAULT_TOKEN_URL, ClientAuth::Basic),
            auth_url: config
                .auth_url
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTH_URL.to_string()),
            api_base: config
                .api_base
                .clone()
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            redirect_uri: config.redirect_uri.clone(),
            scopes: if config.scopes.is_empty() {
                DEFAULT_SCOPES.to_string()
            } else {
                config.scopes.join(" ")
            },
        }
    }
}

#[async_trait]
impl OAuthProvider for TwitterProvider {
    fn name(&self) -> &'static str {
        "twitter"
    }

    fn flow(&self) -> OAuthFlow {
        OAuthFlow::Pkce
    }

    fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> Result<String> {
        let challenge = code_challenge.ok_or_else(|| {
            OmnicastError::InvalidInput("Twitter authorization requires a PKCE challenge".to_string())
        })?;

        authorize_url(
            &self.auth_url,
            &[
                ("response_type", "code"),
                ("client_id", self.tokens.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", self.scopes.as_str()),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
            ],
        )
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSet> {
        let verifier = code_verifier.ok_or_else(|| {
            PlatformError::Authentication("Missing PKCE code verifier".to_string())
        })?;

        self.tokens
            .exchange_code(&self.http, code, &self.redirect_uri, Some(verifier))
            .await
    }

    async fn discover_identities(&self, tokens: TokenSet) -> Result<Vec<DiscoveredIdentity>> {
        let response = self
            .http
            .get(format!("{}/2/users/me", self.api_base))
            .query(&[("user.fields", "profile_image_url")])
            .bearer_auth(tokens.access_token.expose_secret())
            .send()
            .await
            .map_err(PlatformError::from)?;

        if !response.status().is_success() {
            return Err(PlatformError::Authentication(format!(
                "Twitter users/me answered HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }

        let me: MeResponse = response.json().await.map_err(PlatformError::from)?;
        let user = me.data;

        Ok(vec![DiscoveredIdentity {
            platform: Platform::Twitter,
            platform_account_id: user.id,
            display_name: format!("{} (@{})", user.name, user.username),
            avatar_url: user.profile_image_url,
            tokens,
        }])
    }
}
