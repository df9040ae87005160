//! Mock adapter for testing
//!
//! Behaviour is configured per account id so one adapter can succeed for
//! one account and fail for another. Every publish and refresh call is
//! recorded for later assertions.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{
    AccountCredentials, AdapterFactory, PlatformAdapter, PublishOutcome, PublishPayload,
    ValidationReport,
};
use crate::error::{PlatformError, Result};
use crate::oauth::TokenSet;
use crate::types::{Platform, PublishError};

/// What `publish` does for an account
#[derive(Debug, Clone)]
pub enum MockBehavior {
    Succeed,
    /// Structured remote failure
    Reject(PublishError),
    /// Unexpected failure surfaced as `Err`
    Fail(String),
}

/// One recorded `publish` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCall {
    pub account_id: String,
    pub access_token: String,
    pub text: String,
}

pub struct MockAdapter {
    platform: Platform,
    default_behavior: MockBehavior,
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    refreshes: Mutex<HashMap<String, (String, Option<i64>)>>,
    validation_errors: Vec<String>,
    delay: Duration,
    publish_calls: Mutex<Vec<PublishCall>>,
    refresh_calls: Mutex<Vec<String>>,
    validate_calls: Mutex<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockAdapter {
    /// Adapter whose publishes all succeed
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            default_behavior: MockBehavior::Succeed,
            behaviors: Mutex::new(HashMap::new()),
            refreshes: Mutex::new(HashMap::new()),
            validation_errors: Vec::new(),
            delay: Duration::ZERO,
            publish_calls: Mutex::new(Vec::new()),
            refresh_calls: Mutex::new(Vec::new()),
            validate_calls: Mutex::new(0),
        }
    }

    /// Adapter that rejects every payload during validation
    pub fn rejecting_payloads(platform: Platform, reason: &str) -> Self {
        Self {
            validation_errors: vec![reason.to_string()],
            ..Self::new(platform)
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_behavior(self, account_id: &str, behavior: MockBehavior) -> Self {
        lock(&self.behaviors).insert(account_id.to_string(), behavior);
        self
    }

    /// Make `refresh_token` succeed for an account with the given token
    pub fn with_refresh(self, account_id: &str, access_token: &str, expires_in: Option<i64>) -> Self {
        lock(&self.refreshes).insert(
            account_id.to_string(),
            (access_token.to_string(), expires_in),
        );
        self
    }

    pub fn publish_calls(&self) -> Vec<PublishCall> {
        lock(&self.publish_calls).clone()
    }

    pub fn publish_call_count(&self) -> usize {
        lock(&self.publish_calls).len()
    }

    pub fn refresh_calls(&self) -> Vec<String> {
        lock(&self.refresh_calls).clone()
    }

    pub fn validate_call_count(&self) -> usize {
        *lock(&self.validate_calls)
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn validate_payload(&self, _payload: &PublishPayload) -> ValidationReport {
        *lock(&self.validate_calls) += 1;
        ValidationReport::from_errors(self.validation_errors.clone())
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> Result<PublishOutcome> {
        let account_id = credentials.account.id.clone();
        let call_number = {
            let mut calls = lock(&self.publish_calls);
            calls.push(PublishCall {
                account_id: account_id.clone(),
                access_token: credentials.access_token.expose_secret().to_string(),
                text: payload.rendered_text(),
            });
            calls.len()
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behavior = lock(&self.behaviors)
            .get(&account_id)
            .cloned()
            .unwrap_or_else(|| self.default_behavior.clone());

        match behavior {
            MockBehavior::Succeed => {
                let id = format!("{}-post-{}", self.platform, call_number);
                Ok(PublishOutcome::Published {
                    platform_post_url: Some(format!("https://{}.mock/{}", self.platform, id)),
                    platform_post_id: id,
                })
            }
            MockBehavior::Reject(error) => Ok(PublishOutcome::Rejected(error)),
            MockBehavior::Fail(message) => Err(PlatformError::Network(message).into()),
        }
    }

    async fn refresh_token(&self, credentials: &AccountCredentials) -> Option<TokenSet> {
        lock(&self.refresh_calls).push(credentials.account.id.clone());

        credentials.refresh_token.as_ref()?;
        let (access_token, expires_in) = lock(&self.refreshes).get(&credentials.account.id).cloned()?;

        let now = chrono::Utc::now().timestamp();
        let mut tokens = TokenSet::new(&access_token);
        tokens.refresh_token = Some(SecretString::from(format!("{}-refresh", access_token)));
        tokens.expires_at = expires_in.map(|secs| now + secs);
        Some(tokens)
    }
}

/// Factory handing out the same mock per platform
pub struct MockAdapterFactory {
    adapters: HashMap<Platform, Arc<MockAdapter>>,
}

impl MockAdapterFactory {
    /// Succeeding mocks for every platform
    pub fn new() -> Self {
        let adapters = Platform::ALL
            .iter()
            .map(|platform| (*platform, Arc::new(MockAdapter::new(*platform))))
            .collect();
        Self { adapters }
    }

    pub fn with_adapter(mut self, adapter: MockAdapter) -> Self {
        self.adapters.insert(adapter.platform, Arc::new(adapter));
        self
    }

    /// The mock serving `platform`, for assertions
    pub fn mock(&self, platform: Platform) -> Arc<MockAdapter> {
        self.adapters
            .get(&platform)
            .cloned()
            .unwrap_or_else(|| Arc::new(MockAdapter::new(platform)))
    }
}

impl Default for MockAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl AdapterFactory for MockAdapterFactory {
    fn adapter(&self, platform: Platform) -> Arc<dyn PlatformAdapter> {
        self.mock(platform)
    }
}
