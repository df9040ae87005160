//! Account registry: OAuth connect flows and linked account storage
//!
//! `initiate` hands out a provider redirect together with the CSRF state the
//! HTTP layer stores in a short-lived cookie. `complete` checks that state,
//! runs the provider exchange and upserts one [`AccountLink`] per discovered
//! identity. Tokens are sealed by the vault before they reach the database.

use secrecy::ExposeSecret;
use std::collections::BTreeSet;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{OmnicastError, Result};
use crate::oauth::{self, DiscoveredIdentity, OAuthFlow, OAuthProvider, ProviderFactory};
use crate::types::{AccountLink, AccountStatus, AccountSummary, Platform};
use crate::vault::CredentialVault;

/// Lifetime of a CSRF state, in seconds
pub const STATE_TTL_SECS: i64 = 600;

pub const STATE_COOKIE: &str = "omnicast_oauth_state";
pub const VERIFIER_COOKIE: &str = "omnicast_oauth_verifier";

/// Everything the HTTP layer needs to start a connect flow
#[derive(Debug)]
pub struct OAuthInitiation {
    pub platform: Platform,
    pub redirect_url: String,
    /// Value of the state cookie: `{state}.{issued_at}`
    pub state_cookie: String,
    /// PKCE verifier, set only for PKCE providers
    pub code_verifier: Option<String>,
    /// Path both cookies are scoped to; the provider calls back under it
    pub cookie_path: String,
}

/// Query parameters of a provider callback
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Failure codes reported back to the accounts page as `error=<code>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackError {
    OAuthDenied,
    MissingParams,
    InvalidState,
    UnsupportedPlatform,
    TokenExchangeFailed,
    ProfileFetchFailed,
    NoAccountsFound,
    StorageFailed,
    /// The callback reached us without a signed-in owner
    Unauthenticated,
}

impl CallbackError {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallbackError::OAuthDenied => "oauth_denied",
            CallbackError::MissingParams => "missing_params",
            CallbackError::InvalidState => "invalid_state",
            CallbackError::UnsupportedPlatform => "unsupported_platform",
            CallbackError::TokenExchangeFailed => "token_exchange_failed",
            CallbackError::ProfileFetchFailed => "profile_fetch_failed",
            CallbackError::NoAccountsFound => "no_accounts_found",
            CallbackError::StorageFailed => "storage_failed",
            CallbackError::Unauthenticated => "unauthenticated",
        }
    }
}

impl std::fmt::Display for CallbackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum CallbackOutcome {
    Connected {
        platform: Platform,
        accounts: Vec<AccountLink>,
    },
    Failed(CallbackError),
}

impl CallbackOutcome {
    /// Accounts page URL carrying `connected=<platform>` or `error=<code>`
    pub fn redirect_url(&self, accounts_page: &str) -> String {
        let (key, value) = match self {
            CallbackOutcome::Connected { platform, .. } => ("connected", platform.as_str()),
            CallbackOutcome::Failed(error) => ("error", error.as_str()),
        };
        let separator = if accounts_page.contains('?') { '&' } else { '?' };
        format!("{}{}{}={}", accounts_page, separator, key, value)
    }
}

/// Path the state cookies are scoped to
///
/// The provider's registered callback decides where the browser comes back,
/// which is not always the platform that initiated (Instagram connects
/// through the Meta callback).
pub fn cookie_path(provider: &dyn OAuthProvider, platform: Platform) -> String {
    reqwest::Url::parse(provider.redirect_uri())
        .ok()
        .map(|url| url.path().to_string())
        .filter(|path| !path.is_empty() && path != "/")
        .unwrap_or_else(|| format!("/api/oauth/{}", platform))
}

/// Check a returned state against the cookie
///
/// The cookie must be present, carry the same state (compared in constant
/// time) and be no older than [`STATE_TTL_SECS`].
pub fn verify_state(cookie: Option<&str>, returned_state: &str, now: i64) -> bool {
    let Some((state, issued_at)) = cookie.and_then(|value| value.rsplit_once('.')) else {
        return false;
    };
    let Ok(issued_at) = issued_at.parse::<i64>() else {
        return false;
    };

    let matches: bool = state.as_bytes().ct_eq(returned_state.as_bytes()).into();
    let age = now - issued_at;

    matches && (0..=STATE_TTL_SECS).contains(&age)
}

pub struct AccountRegistry {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    providers: Arc<dyn ProviderFactory>,
}

impl AccountRegistry {
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        providers: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            db,
            vault,
            providers,
        }
    }

    /// Start a connect flow for `platform`
    pub fn initiate(&self, owner_id: &str, platform: Platform, now: i64) -> Result<OAuthInitiation> {
        let provider = self.providers.provider(platform).ok_or_else(|| {
            OmnicastError::InvalidInput(format!("No OAuth client configured for {}", platform))
        })?;

        let state = oauth::generate_state();
        let (code_verifier, challenge) = match provider.flow() {
            OAuthFlow::Pkce => {
                let (verifier, challenge) = oauth::pkce_pair();
                (Some(verifier), Some(challenge))
            }
            OAuthFlow::AuthorizationCode | OAuthFlow::LongLivedExchange => (None, None),
        };

        let redirect_url = provider.authorization_url(&state, challenge.as_deref())?;
        info!(owner_id, %platform, provider = provider.name(), "Starting OAuth connect flow");

        Ok(OAuthInitiation {
            platform,
            redirect_url,
            state_cookie: format!("{}.{}", state, now),
            code_verifier,
            cookie_path: cookie_path(provider.as_ref(), platform),
        })
    }

    /// Finish a connect flow
    ///
    /// Nothing is written unless the state checks out. Every outcome, good or
    /// bad, is reported as a value so the caller can always redirect.
    pub async fn complete(
        &self,
        owner_id: &str,
        platform: Platform,
        params: &CallbackParams,
        state_cookie: Option<&str>,
        code_verifier: Option<&str>,
        now: i64,
    ) -> CallbackOutcome {
        match self
            .complete_inner(owner_id, platform, params, state_cookie, code_verifier, now)
            .await
        {
            Ok(accounts) => {
                info!(owner_id, %platform, accounts = accounts.len(), "Connected accounts");
                CallbackOutcome::Connected { platform, accounts }
            }
            Err(error) => {
                warn!(owner_id, %platform, error = %error, "OAuth callback failed");
                CallbackOutcome::Failed(error)
            }
        }
    }

    async fn complete_inner(
        &self,
        owner_id: &str,
        platform: Platform,
        params: &CallbackParams,
        state_cookie: Option<&str>,
        code_verifier: Option<&str>,
        now: i64,
    ) -> std::result::Result<Vec<AccountLink>, CallbackError> {
        if params.error.is_some() {
            return Err(CallbackError::OAuthDenied);
        }
        let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref()) else {
            return Err(CallbackError::MissingParams);
        };
        if code.is_empty() || state.is_empty() {
            return Err(CallbackError::MissingParams);
        }
        if !verify_state(state_cookie, state, now) {
            return Err(CallbackError::InvalidState);
        }

        let provider = self
            .providers
            .provider(platform)
            .ok_or(CallbackError::UnsupportedPlatform)?;

        let tokens = provider
            .exchange_code(code, code_verifier)
            .await
            .map_err(|e| {
                warn!(provider = provider.name(), error = %e, "Token exchange failed");
                CallbackError::TokenExchangeFailed
            })?;

        let identities = provider.discover_identities(tokens).await.map_err(|e| {
            warn!(provider = provider.name(), error = %e, "Profile lookup failed");
            CallbackError::ProfileFetchFailed
        })?;
        if identities.is_empty() {
            return Err(CallbackError::NoAccountsFound);
        }

        let mut stored = Vec::with_capacity(identities.len());
        for identity in identities {
            let link = self
                .store_identity(owner_id, identity, now)
                .await
                .map_err(|e| {
                    warn!(owner_id, error = %e, "Could not store account link");
                    CallbackError::StorageFailed
                })?;
            stored.push(link);
        }
        Ok(stored)
    }

    async fn store_identity(
        &self,
        owner_id: &str,
        identity: DiscoveredIdentity,
        now: i64,
    ) -> Result<AccountLink> {
        let tokens = identity.tokens;
        let access_token = self.vault.encrypt(tokens.access_token.expose_secret())?;
        let refresh_token = tokens
            .refresh_token
            .as_ref()
            .map(|token| self.vault.encrypt(token.expose_secret()))
            .transpose()?;

        let link = AccountLink {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            platform: identity.platform,
            platform_account_id: identity.platform_account_id,
            display_name: identity.display_name,
            avatar_url: identity.avatar_url,
            access_token,
            refresh_token,
            token_expires_at: tokens.expires_at,
            scopes: tokens.scopes,
            status: AccountStatus::Active,
            last_error: None,
            connected_at: now,
            updated_at: now,
        };

        let (stored, created) = self.db.upsert_account_link(&link).await?;
        info!(
            account_id = %stored.id,
            platform = %stored.platform,
            created,
            "Stored account link"
        );
        Ok(stored)
    }

    /// Owner's linked accounts without credential material
    pub async fn list(&self, owner_id: &str) -> Result<Vec<AccountSummary>> {
        let links = self.db.list_account_links(owner_id).await?;
        Ok(links.iter().map(AccountSummary::from).collect())
    }

    /// Hard-delete one of the owner's links
    pub async fn disconnect(&self, owner_id: &str, account_id: &str) -> Result<()> {
        if self.db.delete_account_link(owner_id, account_id).await? {
            info!(owner_id, account_id, "Disconnected account");
            Ok(())
        } else {
            Err(OmnicastError::NotFound(format!("account {}", account_id)))
        }
    }

    /// Path the connect cookies of `platform` live under
    pub fn callback_cookie_path(&self, platform: Platform) -> String {
        match self.providers.provider(platform) {
            Some(provider) => cookie_path(provider.as_ref(), platform),
            None => format!("/api/oauth/{}", platform),
        }
    }

    /// Platforms that can currently be connected
    pub fn connectable_platforms(&self) -> BTreeSet<Platform> {
        Platform::ALL
            .into_iter()
            .filter(|platform| self.providers.provider(*platform).is_some())
            .collect()
    }
}
