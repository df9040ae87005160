//! LinkedIn: plain authorization code flow with OpenID userinfo

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{
    authorize_url, ClientAuth, DiscoveredIdentity, OAuthFlow, OAuthProvider, TokenClient, TokenSet,
};
use crate::config::OAuthClientConfig;
use crate::error::{PlatformError, Result};
use crate::types::Platform;

pub const DEFAULT_AUTH_URL: &str = "https://www.linkedin.com/oauth/v2/authorization";
pub const DEFAULT_TOKEN_URL: &str = "https://www.linkedin.com/oauth/v2/accessToken";
pub const DEFAULT_API_BASE: &str = "https://api.linkedin.com";
const DEFAULT_SCOPES: &str = "openid profile w_member_social";

pub struct LinkedInProvider {
    http: reqwest::Client,
    tokens: TokenClient,
    auth_url: String,
    api_base: String,
    redirect_uri: String,
    scopes: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    name: Option<String>,
    given_name: Option<String>,
    family_name: Option<String>,
    picture: Option<String>,
}

impl UserInfo {
    fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        let joined = [self.given_name.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            self.sub.clone()
        } else {
            joined
        }
    }
}

impl LinkedInProvider {
    pub fn new(http: reqwest::Client, config: &OAuthClientConfig) -> Self {
        Self {
            http,
            tokens: TokenClient::new(config, DEFAULT_TOKEN_URL, ClientAuth::Body),
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
impl OAuthProvider for LinkedInProvider {
    fn name(&self) -> &'static str {
        "linkedin"
    }

    fn flow(&self) -> OAuthFlow {
        OAuthFlow::AuthorizationCode
    }

    fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn authorization_url(&self, state: &str, _code_challenge: Option<&str>) -> Result<String> {
        authorize_url(
            &self.auth_url,
            &[
                ("response_type", "code"),
                ("client_id", self.tokens.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("state", state),
                ("scope", self.scopes.as_str()),
            ],
        )
    }

    async fn exchange_code(&self, code: &str, _code_verifier: Option<&str>) -> Result<TokenSet> {
        self.tokens
            .exchange_code(&self.http, code, &self.redirect_uri, None)
            .await
    }

    async fn discover_identities(&self, tokens: TokenSet) -> Result<Vec<DiscoveredIdentity>> {
        let response = self
            .http
            .get(format!("{}/v2/userinfo", self.api_base))
            .bearer_auth(tokens.access_token.expose_secret())
            .send()
            .await
            .map_err(PlatformError::from)?;

        if !response.status().is_success() {
            return Err(PlatformError::Authentication(format!(
                "LinkedIn userinfo answered HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }

        let user: UserInfo = response.json().await.map_err(PlatformError::from)?;

        Ok(vec![DiscoveredIdentity {
            platform: Platform::Linkedin,
            display_name: user.display_name(),
            platform_account_id: user.sub,
            avatar_url: user.picture,
            tokens,
        }])
    }
}
