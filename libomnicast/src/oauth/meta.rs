//! Meta (Facebook Pages and Instagram business accounts)
//!
//! The code is traded for a short-lived user token, which is traded again for
//! a long-lived one. The long-lived token lists the Pages the user manages;
//! each Page carries its own non-expiring page token and, optionally, a
//! linked Instagram business account published with that same page token.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::{authorize_url, DiscoveredIdentity, OAuthFlow, OAuthProvider, TokenSet};
use crate::config::OAuthClientConfig;
use crate::error::{PlatformError, Result};
use crate::platforms::facebook::GraphApi;
use crate::platforms::truncate_raw;
use crate::types::Platform;

const DEFAULT_SCOPES: &str = "pages_show_list,pages_manage_posts,pages_read_engagement,instagram_basic,instagram_content_publish,business_management";

pub struct MetaProvider {
    http: reqwest::Client,
    graph: GraphApi,
    client_id: String,
    client_secret: SecretString,
    auth_url: String,
    token_url: String,
    redirect_uri: String,
    scopes: String,
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PageList {
    #[serde(default)]
    data: Vec<Page>,
}

#[derive(Debug, Deserialize)]
struct Page {
    id: String,
    name: String,
    access_token: String,
    picture: Option<Picture>,
    instagram_business_account: Option<InstagramAccount>,
}

#[derive(Debug, Deserialize)]
struct Picture {
    data: PictureData,
}

#[derive(Debug, Deserialize)]
struct PictureData {
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstagramAccount {
    id: String,
    username: Option<String>,
    name: Option<String>,
    profile_picture_url: Option<String>,
}

impl MetaProvider {
    pub fn new(http: reqwest::Client, config: &OAuthClientConfig) -> Self {
        let graph = GraphApi::from_config(Some(config));
        let auth_url = config
            .auth_url
            .clone()
            .unwrap_or_else(|| format!("https://www.facebook.com/{}/dialog/oauth", graph.version));
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| graph.url("oauth/access_token"));

        Self {
            http,
            client_id: config.client_id.clone(),
            client_secret: SecretString::from(config.client_secret.expose_secret().to_string()),
            auth_url,
            token_url,
            redirect_uri: config.redirect_uri.clone(),
            scopes: if config.scopes.is_empty() {
                DEFAULT_SCOPES.to_string()
            } else {
                config.scopes.join(",")
            },
            graph,
        }
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<AccessTokenResponse> {
        let response = self
            .http
            .get(&self.token_url)
            .query(params)
            .send()
            .await
            .map_err(PlatformError::from)?;

        let status = response.status();
        let body = response.text().await.map_err(PlatformError::from)?;
        if !status.is_success() {
            return Err(PlatformError::Authentication(format!(
                "Meta token endpoint answered HTTP {}: {}",
                status.as_u16(),
                truncate_raw(&body)
            ))
            .into());
        }

        serde_json::from_str(&body)
            .map_err(|e| PlatformError::Decode(format!("Meta token response: {}", e)).into())
    }
}

#[async_trait]
impl OAuthProvider for MetaProvider {
    fn name(&self) -> &'static str {
        "meta"
    }

    fn flow(&self) -> OAuthFlow {
        OAuthFlow::LongLivedExchange
    }

    fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn authorization_url(&self, state: &str, _code_challenge: Option<&str>) -> Result<String> {
        authorize_url(
            &self.auth_url,
            &[
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("state", state),
                ("scope", self.scopes.as_str()),
                ("response_type", "code"),
            ],
        )
    }

    async fn exchange_code(&self, code: &str, _code_verifier: Option<&str>) -> Result<TokenSet> {
        let secret = self.client_secret.expose_secret();

        let short_lived = self
            .token_request(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", secret),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("code", code),
            ])
            .await?;

        let long_lived = self
            .token_request(&[
                ("grant_type", "fb_exchange_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", secret),
                ("fb_exchange_token", short_lived.access_token.as_str()),
            ])
            .await?;

        let now = chrono::Utc::now().timestamp();
        let mut tokens = TokenSet::new(&long_lived.access_token);
        tokens.expires_at = long_lived.expires_in.map(|secs| now + secs);
        tokens.scopes = self.scopes.split(',').map(str::to_string).collect();
        Ok(tokens)
    }

    async fn discover_identities(&self, tokens: TokenSet) -> Result<Vec<DiscoveredIdentity>> {
        let response = self
            .http
            .get(self.graph.url("me/accounts"))
            .query(&[
                (
                    "fields",
                    "id,name,access_token,picture{url},instagram_business_account{id,username,name,profile_picture_url}",
                ),
                ("access_token", tokens.access_token.expose_secret()),
            ])
            .send()
            .await
            .map_err(PlatformError::from)?;

        if !response.status().is_success() {
            return Err(PlatformError::Authentication(format!(
                "Meta me/accounts answered HTTP {}",
                response.status().as_u16()
            ))
            .into());
        }

        let pages: PageList = response.json().await.map_err(PlatformError::from)?;

        let mut identities = Vec::new();
        for page in pages.data {
            // Page tokens derived from a long-lived user token carry no expiry
            let mut page_tokens = TokenSet::new(&page.access_token);
            page_tokens.scopes = tokens.scopes.clone();

            if let Some(ig) = page.instagram_business_account {
                let mut ig_tokens = TokenSet::new(&page.access_token);
                ig_tokens.scopes = tokens.scopes.clone();

                identities.push(DiscoveredIdentity {
                    platform: Platform::Instagram,
                    display_name: ig
                        .username
                        .or(ig.name)
                        .unwrap_or_else(|| ig.id.clone()),
                    platform_account_id: ig.id,
                    avatar_url: ig.profile_picture_url,
                    tokens: ig_tokens,
                });
            }

            identities.push(DiscoveredIdentity {
                platform: Platform::Facebook,
                platform_account_id: page.id,
                display_name: page.name,
                avatar_url: page.picture.and_then(|p| p.data.url),
                tokens: page_tokens,
            });
        }

        Ok(identities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OAuthClientConfig {
        OAuthClientConfig {
            client_id: "meta-app".to_string(),
            client_secret: SecretString::from("meta-secret".to_string()),
            redirect_uri: "https://omnicast.example.com/api/oauth/facebook".to_string(),
            scopes: vec![],
            auth_url: None,
            token_url: None,
            api_base: None,
            upload_base: None,
            graph_version: Some("v20.0".to_string()),
        }
    }

    #[test]
    fn test_authorization_url_uses_graph_version() {
        let provider = MetaProvider::new(reqwest::Client::new(), &config());
        let url = provider.authorization_url("s", None).unwrap();

        assert!(url.starts_with("https://www.facebook.com/v20.0/dialog/oauth"));
        assert!(url.contains("instagram_content_publish"));
        assert_eq!(provider.flow(), OAuthFlow::LongLivedExchange);
        assert_eq!(
            provider.token_url,
            "https://graph.facebook.com/v20.0/oauth/access_token"
        );
    }

    #[test]
    fn test_page_list_parsing() {
        let pages: PageList = serde_json::from_str(
            r#"{"data":[
                {"id":"p1","name":"Bakery","access_token":"pt1",
                 "picture":{"data":{"url":"https://cdn/p1.png"}},
                 "instagram_business_account":{"id":"ig1","username":"bakery"}},
                {"id":"p2","name":"Blog","access_token":"pt2"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(pages.data.len(), 2);
        assert_eq!(
            pages.data[0]
                .instagram_business_account
                .as_ref()
                .unwrap()
                .username
                .as_deref(),
            Some("bakery")
        );
        assert!(pages.data[1].instagram_business_account.is_none());
    }
}
