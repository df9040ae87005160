//! Publish orchestrator
//!
//! One run takes a post through `publishing` to a terminal status:
//!
//! 1. claim the post with a compare-and-swap on its status; a lost claim
//!    ends the run as [`PublishRun::Skipped`]
//! 2. resolve targets against the owner's currently active accounts
//! 3. for each account, one after another: unseal tokens, refresh when the
//!    access token is close to expiry, validate, publish, append a log entry
//! 4. aggregate the per-account results into `completed`, `partial` or
//!    `failed`
//!
//! A failing account never stops the others. Errors from outside the
//! per-account step (the store going away, a log entry that cannot be
//! written) end the run. The post then leaves `publishing` on a best-effort
//! basis: back to `scheduled` for a scheduled run, so the job can try again,
//! and to `failed` otherwise.
//!
//! Accounts that already have a `published` entry for the post are never
//! published to again, whatever the trigger.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::error::{OmnicastError, Result};
use crate::platforms::{
    AccountCredentials, AdapterFactory, PlatformAdapter, PublishOutcome, PublishPayload,
};
use crate::service::events::{Event, EventBus};
use crate::types::{
    AccountLink, AccountStatus, LogStatus, Platform, Post, PostStatus, PublishError,
    PublishLogEntry,
};
use crate::vault::CredentialVault;

/// Refresh when the access token expires within this many seconds
pub const REFRESH_WINDOW_SECS: i64 = 300;

/// Whether a token with this expiry should be refreshed before use
///
/// Tokens without a known expiry are always refreshed when possible.
pub fn needs_refresh(token_expires_at: Option<i64>, now: i64) -> bool {
    match token_expires_at {
        None => true,
        Some(expires_at) => expires_at - now <= REFRESH_WINDOW_SECS,
    }
}

/// What asked for the run; decides which statuses it may start from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishTrigger {
    /// "Publish now"
    Manual,
    /// Webhook delivery or sweep of a due job
    Scheduled,
    /// Explicit retry of the accounts that have not published yet
    Retry,
}

impl PublishTrigger {
    pub fn allowed_from(&self) -> &'static [PostStatus] {
        match self {
            PublishTrigger::Manual => &[PostStatus::Draft, PostStatus::Scheduled],
            PublishTrigger::Scheduled => &[PostStatus::Scheduled],
            PublishTrigger::Retry => &[PostStatus::Partial, PostStatus::Failed],
        }
    }

    /// Where a claimed post goes when its run aborts
    pub fn status_after_abort(&self) -> PostStatus {
        match self {
            PublishTrigger::Scheduled => PostStatus::Scheduled,
            PublishTrigger::Manual | PublishTrigger::Retry => PostStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PublishTrigger::Manual => "manual",
            PublishTrigger::Scheduled => "scheduled",
            PublishTrigger::Retry => "retry",
        }
    }
}

/// Outcome for one account of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResult {
    pub account_id: String,
    pub platform: Platform,
    pub success: bool,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub error: Option<PublishError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReport {
    pub post_id: String,
    pub status: PostStatus,
    pub results: Vec<AccountResult>,
}

impl PublishReport {
    pub fn success(&self) -> bool {
        self.status == PostStatus::Completed
    }

    /// Failure messages keyed by platform name
    pub fn errors(&self) -> BTreeMap<String, String> {
        let mut errors: BTreeMap<String, String> = BTreeMap::new();
        for result in &self.results {
            let Some(error) = &result.error else { continue };
            errors
                .entry(result.platform.to_string())
                .and_modify(|existing| {
                    existing.push_str("; ");
                    existing.push_str(&error.message);
                })
                .or_insert_with(|| error.message.clone());
        }
        errors
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishRun {
    Completed(PublishReport),
    /// The post was not in a status this trigger may start from
    Skipped { post_id: String, status: PostStatus },
}

impl PublishRun {
    pub fn post_id(&self) -> &str {
        match self {
            PublishRun::Completed(report) => &report.post_id,
            PublishRun::Skipped { post_id, .. } => post_id,
        }
    }

    pub fn report(&self) -> Option<&PublishReport> {
        match self {
            PublishRun::Completed(report) => Some(report),
            PublishRun::Skipped { .. } => None,
        }
    }
}

/// Final status for a run given its results
///
/// `already_published` counts targets published by an earlier run, which
/// matters for retries.
pub fn aggregate_status(results: &[AccountResult], already_published: usize) -> PostStatus {
    let succeeded = results.iter().filter(|r| r.success).count() + already_published;
    let failed = results.len() - results.iter().filter(|r| r.success).count();

    if succeeded == 0 {
        PostStatus::Failed
    } else if failed == 0 {
        PostStatus::Completed
    } else {
        PostStatus::Partial
    }
}

#[derive(Clone)]
pub struct PublishOrchestrator {
    db: Arc<Database>,
    vault: Arc<CredentialVault>,
    adapters: Arc<dyn AdapterFactory>,
    events: EventBus,
}

impl PublishOrchestrator {
    pub fn new(
        db: Arc<Database>,
        vault: Arc<CredentialVault>,
        adapters: Arc<dyn AdapterFactory>,
        events: EventBus,
    ) -> Self {
        Self {
            db,
            vault,
            adapters,
            events,
        }
    }

    /// Run one publish of `post_id`
    ///
    /// # Errors
    ///
    /// `NotFound` when the post does not exist; database errors outside the
    /// per-account loop.
    pub async fn publish(&self, post_id: &str, trigger: PublishTrigger) -> Result<PublishRun> {
        if self.db.get_post(post_id).await?.is_none() {
            return Err(OmnicastError::NotFound(format!("post {}", post_id)));
        }

        let claimed = self
            .db
            .transition_post_status(post_id, trigger.allowed_from(), PostStatus::Publishing)
            .await?;

        if !claimed {
            let post = self
                .db
                .get_post(post_id)
                .await?
                .ok_or_else(|| OmnicastError::NotFound(format!("post {}", post_id)))?;
            info!(
                post_id,
                status = %post.status,
                trigger = trigger.as_str(),
                "Post not publishable from its current status, skipping"
            );
            self.events.emit(Event::PublishSkipped {
                post_id: post_id.to_string(),
                status: post.status,
            });
            return Ok(PublishRun::Skipped {
                post_id: post_id.to_string(),
                status: post.status,
            });
        }

        match self.run_claimed(post_id, trigger).await {
            Ok(report) => Ok(PublishRun::Completed(report)),
            Err(e) => {
                let fallback = trigger.status_after_abort();
                error!(post_id, error = %e, fallback = %fallback, "Publish run aborted");
                if let Err(mark_err) = self.db.finish_post(post_id, fallback, None).await {
                    warn!(post_id, error = %mark_err, "Could not move aborted post out of publishing");
                }
                self.events.emit(Event::PublishFinished {
                    post_id: post_id.to_string(),
                    status: fallback,
                });
                Err(e)
            }
        }
    }

    async fn run_claimed(&self, post_id: &str, trigger: PublishTrigger) -> Result<PublishReport> {
        // Re-read after the claim; content can no longer change underneath us
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| OmnicastError::NotFound(format!("post {}", post_id)))?;

        let already_published = self.db.published_account_ids(post_id).await?;

        let active: Vec<AccountLink> = self
            .db
            .list_account_links(&post.owner_id)
            .await?
            .into_iter()
            .filter(|a| a.status == AccountStatus::Active && post.target_account_ids.contains(&a.id))
            .collect();

        let skipped_published = active
            .iter()
            .filter(|a| already_published.contains(&a.id))
            .count();
        let targets: Vec<AccountLink> = active
            .into_iter()
            .filter(|a| !already_published.contains(&a.id))
            .collect();

        info!(
            post_id,
            trigger = trigger.as_str(),
            accounts = targets.len(),
            "Publishing post"
        );
        self.events.emit(Event::PublishStarted {
            post_id: post_id.to_string(),
            trigger,
            accounts: targets.len(),
        });

        let mut results = Vec::with_capacity(targets.len());
        for account in &targets {
            results.push(self.publish_to_account(&post, account).await?);
        }

        let status = aggregate_status(&results, skipped_published);
        let published_at = (status == PostStatus::Completed).then(|| chrono::Utc::now().timestamp());

        if !self.db.finish_post(post_id, status, published_at).await? {
            warn!(post_id, "Post left publishing before the run finished");
        }

        info!(post_id, status = %status, "Publish run finished");
        self.events.emit(Event::PublishFinished {
            post_id: post_id.to_string(),
            status,
        });

        Ok(PublishReport {
            post_id: post_id.to_string(),
            status,
            results,
        })
    }

    /// Everything for one account; remote and credential failures end up in
    /// the returned result, only store errors escape
    async fn publish_to_account(&self, post: &Post, account: &AccountLink) -> Result<AccountResult> {
        let adapter = self.adapters.adapter(account.platform);
        let attempts = self.db.count_publish_attempts(&post.id, &account.id).await? + 1;

        let outcome = match self.credentials_for(adapter.as_ref(), account).await {
            Some(credentials) => self.attempt(adapter.as_ref(), &credentials, post).await,
            None => PublishOutcome::Rejected(PublishError::new(
                PublishError::CREDENTIAL_ERROR,
                "Stored credentials could not be decrypted",
                false,
            )),
        };

        if let PublishOutcome::Rejected(error) = &outcome {
            self.note_account_problem(account, error).await;
        }

        self.record(post, account, outcome, attempts).await
    }

    /// Unseal and, when needed, refresh the account's tokens
    ///
    /// `None` when no usable access token could be produced.
    async fn credentials_for(
        &self,
        adapter: &dyn PlatformAdapter,
        account: &AccountLink,
    ) -> Option<AccountCredentials> {
        let access_token = match self.vault.decrypt(&account.access_token) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Access token unusable");
                None
            }
        };
        let refresh_token = account.refresh_token.as_ref().and_then(|sealed| {
            self.vault
                .decrypt(sealed)
                .map_err(|e| {
                    warn!(account_id = %account.id, error = %e, "Refresh token unusable, ignoring it");
                })
                .ok()
        });

        let now = chrono::Utc::now().timestamp();
        let has_access = access_token.is_some();
        let wants_refresh = !has_access || needs_refresh(account.token_expires_at, now);

        let mut credentials = AccountCredentials {
            account: account.clone(),
            access_token: access_token.unwrap_or_else(|| SecretString::from(String::new())),
            refresh_token,
        };

        if wants_refresh && credentials.refresh_token.is_some() {
            match adapter.refresh_token(&credentials).await {
                Some(tokens) => {
                    self.persist_refreshed(account, &tokens).await;
                    credentials.account.token_expires_at = tokens.expires_at;
                    credentials.access_token = tokens.access_token;
                    if let Some(refresh_token) = tokens.refresh_token {
                        credentials.refresh_token = Some(refresh_token);
                    }
                    return Some(credentials);
                }
                None => {
                    debug!(account_id = %account.id, "Refresh unavailable, using stored token");
                }
            }
        }

        has_access.then_some(credentials)
    }

    async fn persist_refreshed(&self, account: &AccountLink, tokens: &crate::oauth::TokenSet) {
        let sealed_access = match self.vault.encrypt(tokens.access_token.expose_secret()) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Could not seal refreshed token");
                return;
            }
        };
        let sealed_refresh = match tokens
            .refresh_token
            .as_ref()
            .map(|t| self.vault.encrypt(t.expose_secret()))
            .transpose()
        {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(account_id = %account.id, error = %e, "Could not seal refreshed refresh token");
                None
            }
        };

        match self
            .db
            .update_account_tokens(
                &account.id,
                &sealed_access,
                sealed_refresh.as_ref(),
                tokens.expires_at,
            )
            .await
        {
            Ok(()) => info!(account_id = %account.id, platform = %account.platform, "Refreshed access token"),
            Err(e) => warn!(account_id = %account.id, error = %e, "Could not persist refreshed token"),
        }
    }

    async fn attempt(
        &self,
        adapter: &dyn PlatformAdapter,
        credentials: &AccountCredentials,
        post: &Post,
    ) -> PublishOutcome {
        let payload = PublishPayload::build(credentials.account.platform, &post.content);

        let report = adapter.validate_payload(&payload);
        if !report.valid {
            return PublishOutcome::Rejected(PublishError::new(
                PublishError::VALIDATION_ERROR,
                report.errors.join("; "),
                false,
            ));
        }

        match adapter.publish(credentials, &payload).await {
            Ok(outcome) => outcome,
            Err(e) => PublishOutcome::Rejected(PublishError::new(
                PublishError::UNEXPECTED_ERROR,
                e.to_string(),
                true,
            )),
        }
    }

    async fn note_account_problem(&self, account: &AccountLink, error: &PublishError) {
        let status = match error.code.as_str() {
            PublishError::AUTH_ERROR => AccountStatus::Expired,
            PublishError::CREDENTIAL_ERROR => AccountStatus::Error,
            _ => return,
        };
        if let Err(e) = self
            .db
            .mark_account_status(&account.id, status, Some(&error.message))
            .await
        {
            warn!(account_id = %account.id, error = %e, "Could not update account status");
        }
    }

    async fn record(
        &self,
        post: &Post,
        account: &AccountLink,
        outcome: PublishOutcome,
        attempts: u32,
    ) -> Result<AccountResult> {
        let now = chrono::Utc::now().timestamp();

        let result = match outcome {
            PublishOutcome::Published {
                platform_post_id,
                platform_post_url,
            } => {
                info!(
                    post_id = %post.id,
                    account_id = %account.id,
                    platform = %account.platform,
                    platform_post_id = %platform_post_id,
                    "Published"
                );
                self.events.emit(Event::AccountPublished {
                    post_id: post.id.clone(),
                    account_id: account.id.clone(),
                    platform: account.platform,
                    platform_post_id: platform_post_id.clone(),
                    platform_post_url: platform_post_url.clone(),
                });
                AccountResult {
                    account_id: account.id.clone(),
                    platform: account.platform,
                    success: true,
                    platform_post_id: Some(platform_post_id),
                    platform_post_url,
                    error: None,
                }
            }
            PublishOutcome::Rejected(error) => {
                warn!(
                    post_id = %post.id,
                    account_id = %account.id,
                    platform = %account.platform,
                    code = %error.code,
                    retryable = error.retryable,
                    "Publish failed: {}",
                    error.message
                );
                self.events.emit(Event::AccountFailed {
                    post_id: post.id.clone(),
                    account_id: account.id.clone(),
                    platform: account.platform,
                    code: error.code.clone(),
                    message: error.message.clone(),
                    retryable: error.retryable,
                });
                AccountResult {
                    account_id: account.id.clone(),
                    platform: account.platform,
                    success: false,
                    platform_post_id: None,
                    platform_post_url: None,
                    error: Some(error),
                }
            }
        };

        let entry = PublishLogEntry {
            id: None,
            post_id: post.id.clone(),
            account_id: account.id.clone(),
            platform: account.platform,
            status: if result.success {
                LogStatus::Published
            } else {
                LogStatus::Failed
            },
            platform_post_id: result.platform_post_id.clone(),
            platform_post_url: result.platform_post_url.clone(),
            error: result.error.clone(),
            attempts,
            last_attempt_at: Some(now),
            published_at: result.success.then_some(now),
            created_at: now,
        };

        self.db.append_publish_log(&entry).await?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: bool) -> AccountResult {
        AccountResult {
            account_id: "a".to_string(),
            platform: Platform::Twitter,
            success,
            platform_post_id: None,
            platform_post_url: None,
            error: (!success).then(|| PublishError::new(PublishError::RATE_LIMITED, "slow", true)),
        }
    }

    #[test]
    fn test_refresh_window() {
        let now = 1_700_000_000;
        assert!(needs_refresh(None, now));
        assert!(needs_refresh(Some(now - 10), now));
        assert!(needs_refresh(Some(now + 4 * 60), now));
        assert!(needs_refresh(Some(now + 5 * 60), now));
        assert!(!needs_refresh(Some(now + 6 * 60), now));
    }

    #[test]
    fn test_aggregate_status() {
        assert_eq!(aggregate_status(&[], 0), PostStatus::Failed);
        assert_eq!(
            aggregate_status(&[result(true), result(true)], 0),
            PostStatus::Completed
        );
        assert_eq!(
            aggregate_status(&[result(false), result(false)], 0),
            PostStatus::Failed
        );
        assert_eq!(
            aggregate_status(&[result(true), result(false)], 0),
            PostStatus::Partial
        );
    }

    #[test]
    fn test_aggregate_status_counts_earlier_successes() {
        assert_eq!(aggregate_status(&[result(true)], 1), PostStatus::Completed);
        assert_eq!(aggregate_status(&[result(false)], 1), PostStatus::Partial);
        assert_eq!(aggregate_status(&[], 2), PostStatus::Completed);
    }

    #[test]
    fn test_trigger_start_states() {
        assert!(PublishTrigger::Manual
            .allowed_from()
            .contains(&PostStatus::Draft));
        assert!(!PublishTrigger::Scheduled
            .allowed_from()
            .contains(&PostStatus::Draft));
        assert_eq!(
            PublishTrigger::Retry.allowed_from(),
            &[PostStatus::Partial, PostStatus::Failed]
        );
    }

    #[test]
    fn test_aborted_scheduled_run_returns_to_scheduled() {
        assert_eq!(
            PublishTrigger::Scheduled.status_after_abort(),
            PostStatus::Scheduled
        );
        assert_eq!(PublishTrigger::Manual.status_after_abort(), PostStatus::Failed);
        assert_eq!(PublishTrigger::Retry.status_after_abort(), PostStatus::Failed);
    }

    #[test]
    fn test_report_errors_grouped_by_platform() {
        let mut first = result(false);
        first.error = Some(PublishError::new(PublishError::AUTH_ERROR, "token revoked", false));
        let mut second = result(false);
        second.account_id = "b".to_string();
        let report = PublishReport {
            post_id: "p".to_string(),
            status: PostStatus::Failed,
            results: vec![first, second, result(true)],
        };

        let errors = report.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors["twitter"], "token revoked; slow");
        assert!(!report.success());
    }
}
