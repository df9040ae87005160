//! In-process OAuth provider for tests
//!
//! Token material is derived from the authorization code, so connecting the
//! same identity twice with different codes produces different tokens.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::{DiscoveredIdentity, OAuthFlow, OAuthProvider, ProviderFactory, TokenSet};
use crate::error::{PlatformError, Result};
use crate::types::Platform;

#[derive(Debug, Clone)]
pub struct MockIdentity {
    pub platform: Platform,
    pub platform_account_id: String,
    pub display_name: String,
}

impl MockIdentity {
    pub fn new(platform: Platform, platform_account_id: &str, display_name: &str) -> Self {
        Self {
            platform,
            platform_account_id: platform_account_id.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

pub struct MockProvider {
    name: &'static str,
    flow: OAuthFlow,
    redirect_uri: String,
    identities: Vec<MockIdentity>,
    token_lifetime: Option<i64>,
    fail_exchange: bool,
    fail_discovery: bool,
    exchange_calls: AtomicUsize,
}

impl MockProvider {
    pub fn new(name: &'static str, flow: OAuthFlow, identities: Vec<MockIdentity>) -> Self {
        Self {
            name,
            flow,
            redirect_uri: format!("http://localhost/api/oauth/{}", name),
            identities,
            token_lifetime: Some(3600),
            fail_exchange: false,
            fail_discovery: false,
            exchange_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_redirect_uri(mut self, redirect_uri: &str) -> Self {
        self.redirect_uri = redirect_uri.to_string();
        self
    }

    pub fn failing_exchange(mut self) -> Self {
        self.fail_exchange = true;
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn flow(&self) -> OAuthFlow {
        self.flow
    }

    fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn authorization_url(&self, state: &str, code_challenge: Option<&str>) -> Result<String> {
        let mut url = format!("https://auth.mock/{}/authorize?state={}", self.name, state);
        if let Some(challenge) = code_challenge {
            url.push_str("&code_challenge=");
            url.push_str(challenge);
        }
        Ok(url)
    }

    async fn exchange_code(&self, code: &str, code_verifier: Option<&str>) -> Result<TokenSet> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_exchange {
            return Err(PlatformError::Authentication("mock exchange refused".to_string()).into());
        }
        if self.flow == OAuthFlow::Pkce && code_verifier.is_none() {
            return Err(PlatformError::Authentication("Missing PKCE code verifier".to_string()).into());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tokens = TokenSet::new(&format!("access-{}", code));
        tokens.refresh_token = Some(SecretString::from(format!("refresh-{}", code)));
        tokens.expires_at = self.token_lifetime.map(|secs| now + secs);
        tokens.scopes.insert("publish".to_string());
        Ok(tokens)
    }

    async fn discover_identities(&self, tokens: TokenSet) -> Result<Vec<DiscoveredIdentity>> {
        if self.fail_discovery {
            return Err(PlatformError::Authentication("mock profile unavailable".to_string()).into());
        }

        let access = tokens.access_token.expose_secret();
        let refresh = tokens
            .refresh_token
            .as_ref()
            .map(|t| t.expose_secret().to_string());

        Ok(self
            .identities
            .iter()
            .map(|identity| DiscoveredIdentity {
                platform: identity.platform,
                platform_account_id: identity.platform_account_id.clone(),
                display_name: identity.display_name.clone(),
                avatar_url: None,
                tokens: TokenSet {
                    access_token: SecretString::from(access.to_string()),
                    refresh_token: refresh.clone().map(SecretString::from),
                    expires_at: tokens.expires_at,
                    scopes: tokens.scopes.clone(),
                },
            })
            .collect())
    }
}

/// Factory over a fixed set of providers
#[derive(Default)]
pub struct MockProviderFactory {
    providers: HashMap<Platform, Arc<dyn OAuthProvider>>,
}

impl MockProviderFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, platforms: &[Platform], provider: Arc<dyn OAuthProvider>) -> Self {
        for platform in platforms {
            self.providers.insert(*platform, provider.clone());
        }
        self
    }
}

impl ProviderFactory for MockProviderFactory {
    fn provider(&self, platform: Platform) -> Option<Arc<dyn OAuthProvider>> {
        self.providers.get(&platform).cloned()
    }
}
