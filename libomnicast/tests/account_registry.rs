//! Connect flows end to end against in-process OAuth providers

mod common;

use common::{now, TestEnv, OWNER};
use libomnicast::accounts::{AccountRegistry, CallbackError, CallbackOutcome, CallbackParams};
use libomnicast::oauth::mock::{MockIdentity, MockProvider, MockProviderFactory};
use libomnicast::oauth::OAuthFlow;
use libomnicast::types::AccountStatus;
use libomnicast::Platform;
use secrecy::ExposeSecret;
use std::sync::Arc;

fn registry(env: &TestEnv, factory: MockProviderFactory) -> AccountRegistry {
    AccountRegistry::new(Arc::clone(&env.db), Arc::clone(&env.vault), Arc::new(factory))
}

fn meta_provider() -> Arc<MockProvider> {
    Arc::new(
        MockProvider::new(
            "meta",
            OAuthFlow::LongLivedExchange,
            vec![
                MockIdentity::new(Platform::Facebook, "page-1", "Bakery Page"),
                MockIdentity::new(Platform::Facebook, "page-2", "Cafe Page"),
                MockIdentity::new(Platform::Instagram, "ig-1", "bakery.gram"),
            ],
        )
        .with_redirect_uri("https://app.example.com/api/oauth/facebook"),
    )
}

/// Returned state taken from an initiation cookie `{state}.{issued_at}`
fn state_of(cookie: &str) -> String {
    cookie.rsplit_once('.').map(|(state, _)| state.to_string()).unwrap()
}

fn callback(code: &str, state: &str) -> CallbackParams {
    CallbackParams {
        code: Some(code.to_string()),
        state: Some(state.to_string()),
        error: None,
    }
}

#[tokio::test]
async fn test_meta_connect_discovers_pages_and_instagram() {
    let env = TestEnv::new().await;
    let provider = meta_provider();
    let registry = registry(
        &env,
        MockProviderFactory::new().with(
            &[Platform::Facebook, Platform::Instagram],
            provider.clone(),
        ),
    );

    let initiation = registry.initiate(OWNER, Platform::Instagram, now()).unwrap();
    // Instagram comes back through the Facebook callback, so the cookie lives there
    assert_eq!(initiation.cookie_path, "/api/oauth/facebook");
    assert!(initiation.code_verifier.is_none());

    let state = state_of(&initiation.state_cookie);
    let outcome = registry
        .complete(
            OWNER,
            Platform::Facebook,
            &callback("meta-code", &state),
            Some(&initiation.state_cookie),
            None,
            now(),
        )
        .await;

    let CallbackOutcome::Connected { accounts, .. } = outcome else {
        panic!("expected a connected outcome");
    };
    assert_eq!(accounts.len(), 3);
    assert_eq!(provider.exchange_calls(), 1);

    let links = env.db.list_account_links(OWNER).await.unwrap();
    assert_eq!(links.len(), 3);
    assert_eq!(
        links
            .iter()
            .filter(|l| l.platform == Platform::Facebook)
            .count(),
        2
    );
    let instagram = links
        .iter()
        .find(|l| l.platform == Platform::Instagram)
        .unwrap();
    assert_eq!(instagram.display_name, "bakery.gram");
    assert_eq!(
        env.vault
            .decrypt(&instagram.access_token)
            .unwrap()
            .expose_secret(),
        "access-meta-code"
    );
}

#[tokio::test]
async fn test_pkce_connect_needs_the_verifier() {
    let env = TestEnv::new().await;
    let provider = Arc::new(MockProvider::new(
        "twitter",
        OAuthFlow::Pkce,
        vec![MockIdentity::new(Platform::Twitter, "42", "@baker")],
    ));
    let registry = registry(
        &env,
        MockProviderFactory::new().with(&[Platform::Twitter], provider),
    );

    let initiation = registry.initiate(OWNER, Platform::Twitter, now()).unwrap();
    let verifier = initiation.code_verifier.clone().unwrap();
    assert!(initiation.redirect_url.contains("code_challenge="));
    let state = state_of(&initiation.state_cookie);

    let without = registry
        .complete(
            OWNER,
            Platform::Twitter,
            &callback("c1", &state),
            Some(&initiation.state_cookie),
            None,
            now(),
        )
        .await;
    assert!(matches!(
        without,
        CallbackOutcome::Failed(CallbackError::TokenExchangeFailed)
    ));

    let with = registry
        .complete(
            OWNER,
            Platform::Twitter,
            &callback("c2", &state),
            Some(&initiation.state_cookie),
            Some(&verifier),
            now(),
        )
        .await;
    assert!(matches!(with, CallbackOutcome::Connected { .. }));
    assert_eq!(env.db.list_account_links(OWNER).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_expired_state_is_rejected() {
    let env = TestEnv::new().await;
    let provider = Arc::new(MockProvider::new(
        "linkedin",
        OAuthFlow::AuthorizationCode,
        vec![MockIdentity::new(Platform::Linkedin, "li-1", "Baker")],
    ));
    let registry = registry(
        &env,
        MockProviderFactory::new().with(&[Platform::Linkedin], provider.clone()),
    );

    let issued = now() - 3600;
    let initiation = registry.initiate(OWNER, Platform::Linkedin, issued).unwrap();
    let state = state_of(&initiation.state_cookie);

    let outcome = registry
        .complete(
            OWNER,
            Platform::Linkedin,
            &callback("code", &state),
            Some(&initiation.state_cookie),
            None,
            now(),
        )
        .await;

    assert!(matches!(
        outcome,
        CallbackOutcome::Failed(CallbackError::InvalidState)
    ));
    assert_eq!(provider.exchange_calls(), 0);
    assert!(env.db.list_account_links(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_profile_failure_stores_nothing() {
    let env = TestEnv::new().await;
    let provider = Arc::new(
        MockProvider::new(
            "linkedin",
            OAuthFlow::AuthorizationCode,
            vec![MockIdentity::new(Platform::Linkedin, "li-1", "Baker")],
        )
        .failing_discovery(),
    );
    let registry = registry(
        &env,
        MockProviderFactory::new().with(&[Platform::Linkedin], provider),
    );

    let initiation = registry.initiate(OWNER, Platform::Linkedin, now()).unwrap();
    let state = state_of(&initiation.state_cookie);
    let outcome = registry
        .complete(
            OWNER,
            Platform::Linkedin,
            &callback("code", &state),
            Some(&initiation.state_cookie),
            None,
            now(),
        )
        .await;

    assert!(matches!(
        outcome,
        CallbackOutcome::Failed(CallbackError::ProfileFetchFailed)
    ));
    assert_eq!(
        outcome.redirect_url("/accounts"),
        "/accounts?error=profile_fetch_failed"
    );
    assert!(env.db.list_account_links(OWNER).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_reconnect_reactivates_expired_link() {
    let env = TestEnv::new().await;
    let existing = env
        .link(Platform::Linkedin, "li-1", "old-token", None, Some(now() - 10))
        .await;
    env.db
        .mark_account_status(&existing.id, AccountStatus::Expired, Some("token revoked"))
        .await
        .unwrap();

    let provider = Arc::new(MockProvider::new(
        "linkedin",
        OAuthFlow::AuthorizationCode,
        vec![MockIdentity::new(Platform::Linkedin, "li-1", "Baker")],
    ));
    let registry = registry(
        &env,
        MockProviderFactory::new().with(&[Platform::Linkedin], provider),
    );

    let initiation = registry.initiate(OWNER, Platform::Linkedin, now()).unwrap();
    let state = state_of(&initiation.state_cookie);
    let outcome = registry
        .complete(
            OWNER,
            Platform::Linkedin,
            &callback("again", &state),
            Some(&initiation.state_cookie),
            None,
            now(),
        )
        .await;
    assert_eq!(
        outcome.redirect_url("/accounts?tab=links"),
        "/accounts?tab=links&connected=linkedin"
    );

    let link = env.account(&existing.id).await;
    assert_eq!(link.status, AccountStatus::Active);
    assert!(link.last_error.is_none());
    assert_eq!(link.connected_at, existing.connected_at);
    assert_eq!(
        env.vault
            .decrypt(&link.access_token)
            .unwrap()
            .expose_secret(),
        "access-again"
    );
}

#[tokio::test]
async fn test_list_hides_tokens_and_lists_connectable_platforms() {
    let env = TestEnv::new().await;
    env.fresh_link(Platform::Twitter, "a").await;
    let registry = registry(
        &env,
        MockProviderFactory::new().with(&[Platform::Facebook, Platform::Instagram], meta_provider()),
    );

    let summaries = registry.list(OWNER).await.unwrap();
    assert_eq!(summaries.len(), 1);
    let json = serde_json::to_string(&summaries).unwrap();
    assert!(!json.contains("cipher"));
    assert!(!json.contains("token-a"));

    let connectable = registry.connectable_platforms();
    assert!(connectable.contains(&Platform::Facebook));
    assert!(connectable.contains(&Platform::Instagram));
    assert!(!connectable.contains(&Platform::Twitter));

    assert!(registry.initiate(OWNER, Platform::Twitter, now()).is_err());
}
