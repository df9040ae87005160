//! OAuth providers used by the account registry
//!
//! Three exchange shapes are supported:
//!
//! - [`OAuthFlow::AuthorizationCode`]: authorize, code, token (LinkedIn)
//! - [`OAuthFlow::Pkce`]: the same with an S256 code challenge (Twitter/X)
//! - [`OAuthFlow::LongLivedExchange`]: code, short-lived token, long-lived
//!   token (Meta, which also surfaces Pages and Instagram accounts)
//!
//! Providers only talk to the remote side. CSRF state, cookies and storage
//! live in [`crate::accounts`].

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{OAuthClientConfig, PlatformsConfig};
use crate::error::{PlatformError, Result};
use crate::platforms::{build_http_client, truncate_raw};
use crate::types::Platform;

pub mod linkedin;
pub mod meta;
pub mod mock;
pub mod twitter;

/// Plaintext token material fresh from a provider
///
/// Only the vault turns this into something storable.
#[derive(Debug)]
pub struct TokenSet {
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix seconds; `None` for tokens without a known expiry
    pub expires_at: Option<i64>,
    pub scopes: BTreeSet<String>,
}

impl TokenSet {
    pub fn new(access_token: &str) -> Self {
        Self {
            access_token: SecretString::from(access_token.to_string()),
            refresh_token: None,
            expires_at: None,
            scopes: BTreeSet::new(),
        }
    }
}

/// One publishable identity surfaced by a single consent
#[derive(Debug)]
pub struct DiscoveredIdentity {
    pub platform: Platform,
    pub platform_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub tokens: TokenSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthFlow {
    AuthorizationCode,
    Pkce,
    LongLivedExchange,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Provider name used in logs ("twitter", "linkedin", "meta")
    fn name(&self) -> &'static str;

    fn flow(&self) -> OAuthFlow;

    /// Callback URL registered with the provider
    fn redirect_uri(&self) -> &str;

    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> Result<String>;

    /// Trade the authorization code for (long-lived) user tokens
    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSet>;

    /// Every identity the tokens can publish as
    async fn discover_identities(&self, tokens: TokenSet) -> Result<Vec<DiscoveredIdentity>>;
}

pub trait ProviderFactory: Send + Sync {
    /// `None` when the platform has no configured OAuth client
    fn provider(&self, platform: Platform) -> Option<Arc<dyn OAuthProvider>>;
}

pub struct HttpProviderFactory {
    twitter: Option<Arc<twitter::TwitterProvider>>,
    linkedin: Option<Arc<linkedin::LinkedInProvider>>,
    meta: Option<Arc<meta::MetaProvider>>,
}

impl HttpProviderFactory {
    pub fn new(config: &PlatformsConfig) -> Result<Self> {
        let http = build_http_client(config.http_timeout_secs)?;

        Ok(Self {
            twitter: config
                .twitter
                .as_ref()
                .map(|c| Arc::new(twitter::TwitterProvider::new(http.clone(), c))),
            linkedin: config
                .linkedin
                .as_ref()
                .map(|c| Arc::new(linkedin::LinkedInProvider::new(http.clone(), c))),
            meta: config
                .meta
                .as_ref()
                .map(|c| Arc::new(meta::MetaProvider::new(http, c))),
        })
    }
}

impl ProviderFactory for HttpProviderFactory {
    fn provider(&self, platform: Platform) -> Option<Arc<dyn OAuthProvider>> {
        match platform {
            Platform::Twitter => self
                .twitter
                .clone()
                .map(|p| p as Arc<dyn OAuthProvider>),
            Platform::Linkedin => self
                .linkedin
                .clone()
                .map(|p| p as Arc<dyn OAuthProvider>),
            // Instagram business accounts are only reachable through a Meta consent
            Platform::Facebook | Platform::Instagram => {
                self.meta.clone().map(|p| p as Arc<dyn OAuthProvider>)
            }
        }
    }
}

/// 32 random bytes, base64url without padding
pub fn generate_state() -> String {
    random_token()
}

/// PKCE verifier and its S256 challenge
pub fn pkce_pair() -> (String, String) {
    let verifier = random_token();
    let challenge = pkce_challenge(&verifier);
    (verifier, challenge)
}

pub fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// How the client authenticates at the token endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientAuth {
    /// HTTP basic auth with id and secret
    Basic,
    /// `client_id` / `client_secret` form fields
    Body,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, now: i64) -> TokenSet {
        let scopes = self
            .scope
            .unwrap_or_default()
            .split(|c: char| c == ' ' || c == ',')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        TokenSet {
            access_token: SecretString::from(self.access_token),
            refresh_token: self.refresh_token.map(SecretString::from),
            expires_at: self.expires_in.map(|secs| now + secs),
            scopes,
        }
    }
}

/// Token endpoint of one OAuth client
///
/// Shared by the providers (code exchange) and the adapters (refresh).
pub struct TokenClient {
    pub client_id: String,
    client_secret: SecretString,
    pub token_url: String,
    auth: ClientAuth,
}

impl std::fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenClient")
            .field("client_id", &self.client_id)
            .field("token_url", &self.token_url)
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    pub fn new(config: &OAuthClientConfig, default_token_url: &str, auth: ClientAuth) -> Self {
        Self {
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.expose_secret().to_string()),
            token_url: config
                .token_url
                .clone()
                .unwrap_or_else(|| default_token_url.to_string()),
            auth,
        }
    }

    pub fn client_secret(&self) -> &SecretString {
        &self.client_secret
    }

    /// POST a grant to the token endpoint
    pub async fn request(
        &self,
        http: &reqwest::Client,
        mut params: Vec<(&'static str, String)>,
    ) -> Result<TokenSet> {
        let mut request = http.post(&self.token_url);

        match self.auth {
            ClientAuth::Basic => {
                params.push(("client_id", self.client_id.clone()));
                request = request.basic_auth(
                    &self.client_id,
                    Some(self.client_secret.expose_secret()),
                );
            }
            ClientAuth::Body => {
                params.push(("client_id", self.client_id.clone()));
                params.push((
                    "client_secret",
                    self.client_secret.expose_secret().to_string(),
                ));
            }
        }

        let response = request
            .form(&params)
            .send()
            .await
            .map_err(PlatformError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(PlatformError::from)?;

        if !status.is_success() {
            return Err(PlatformError::Authentication(format!(
                "Token endpoint answered HTTP {}: {}",
                status.as_u16(),
                truncate_raw(&body)
            ))
            .into());
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| PlatformError::Decode(format!("Token response: {}", e)))?;

        Ok(token.into_token_set(chrono::Utc::now().timestamp()))
    }

    pub async fn exchange_code(
        &self,
        http: &reqwest::Client,
        code: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenSet> {
        let mut params = vec![
            ("grant_type", "authorization_code".to_string()),
            ("code", code.to_string()),
            ("redirect_uri", redirect_uri.to_string()),
        ];
        if let Some(verifier) = code_verifier {
            params.push(("code_verifier", verifier.to_string()));
        }

        self.request(http, params).await
    }

    pub async fn refresh(
        &self,
        http: &reqwest::Client,
        refresh_token: &SecretString,
    ) -> Result<TokenSet> {
        let params = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose_secret().to_string()),
        ];

        self.request(http, params).await
    }
}

/// Build an authorize URL with properly encoded query parameters
pub(crate) fn authorize_url(base: &str, params: &[(&str, &str)]) -> Result<String> {
    let url = reqwest::Url::parse_with_params(base, params).map_err(|e| {
        crate::error::ConfigError::InvalidValue {
            field: "auth_url".to_string(),
            reason: e.to_string(),
        }
    })?;
    Ok(url.to_string())
}
