//! Publish runs against mock adapters: fan-out, fault isolation, token
//! refresh and the status compare-and-swap

mod common;

use common::{now, TestEnv};
use libomnicast::platforms::mock::{MockAdapter, MockAdapterFactory, MockBehavior};
use libomnicast::service::events::Event;
use libomnicast::service::executor::PublishExecutor;
use libomnicast::types::{AccountStatus, LogStatus, PublishError};
use libomnicast::{OmnicastError, Platform, PostStatus, PublishRun, PublishTrigger};
use secrecy::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;

fn completed(run: PublishRun) -> libomnicast::PublishReport {
    match run {
        PublishRun::Completed(report) => report,
        PublishRun::Skipped { status, .. } => panic!("run skipped, post was {}", status),
    }
}

#[tokio::test]
async fn test_all_targets_publish_after_refreshing_expired_token() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let b = env
        .link(
            Platform::Linkedin,
            "b",
            "stale-b",
            Some("refresh-b"),
            Some(now() - 60),
        )
        .await;
    let post = env.draft("Launch day", &[&a, &b]).await;

    let factory = Arc::new(
        MockAdapterFactory::new()
            .with_adapter(MockAdapter::new(Platform::Linkedin).with_refresh(&b.id, "fresh-b", Some(3600))),
    );
    let report = completed(
        env.orchestrator(factory.clone())
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Completed);
    assert!(report.success());

    let logs = env.db.list_publish_logs(&post.id).await.unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().all(|l| l.status == LogStatus::Published));
    assert!(logs.iter().all(|l| l.attempts == 1));

    let stored = env.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Completed);
    assert!(stored.published_at.is_some());

    // The refreshed token was used and persisted
    let linkedin = factory.mock(Platform::Linkedin);
    assert_eq!(linkedin.publish_calls()[0].access_token, "fresh-b");
    let b_after = env.account(&b.id).await;
    assert_eq!(
        env.vault
            .decrypt(&b_after.access_token)
            .unwrap()
            .expose_secret(),
        "fresh-b"
    );
    assert!(b_after.token_expires_at.unwrap() > now() + 3000);

    // A's token was fresh, so it was never refreshed
    assert!(factory.mock(Platform::Twitter).refresh_calls().is_empty());
}

#[tokio::test]
async fn test_retryable_failure_on_one_target_gives_partial() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let b = env.fresh_link(Platform::Linkedin, "b").await;
    let post = env.draft("Launch day", &[&a, &b]).await;

    let factory = Arc::new(MockAdapterFactory::new().with_adapter(
        MockAdapter::new(Platform::Linkedin).with_behavior(
            &b.id,
            MockBehavior::Reject(PublishError::new(
                PublishError::PLATFORM_UNAVAILABLE,
                "LinkedIn returned 503",
                true,
            )),
        ),
    ));
    let report = completed(
        env.orchestrator(factory)
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Partial);
    assert_eq!(report.errors()["linkedin"], "LinkedIn returned 503");

    let logs = env.db.list_publish_logs(&post.id).await.unwrap();
    let a_log = logs.iter().find(|l| l.account_id == a.id).unwrap();
    let b_log = logs.iter().find(|l| l.account_id == b.id).unwrap();
    assert_eq!(a_log.status, LogStatus::Published);
    assert_eq!(b_log.status, LogStatus::Failed);
    assert!(b_log.error.as_ref().unwrap().retryable);

    let stored = env.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Partial);
    assert!(stored.published_at.is_none());
}

#[tokio::test]
async fn test_invalid_payload_is_never_sent() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let b = env.fresh_link(Platform::Linkedin, "b").await;
    let c = env.fresh_link(Platform::Facebook, "c").await;
    let post = env.draft("Launch day", &[&a, &b, &c]).await;

    let factory = Arc::new(MockAdapterFactory::new().with_adapter(
        MockAdapter::rejecting_payloads(Platform::Facebook, "Facebook posts need text or media"),
    ));
    let report = completed(
        env.orchestrator(factory.clone())
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Partial);

    let logs = env.db.list_publish_logs(&post.id).await.unwrap();
    assert_eq!(logs.len(), 3);
    let c_log = logs.iter().find(|l| l.account_id == c.id).unwrap();
    let error = c_log.error.as_ref().unwrap();
    assert_eq!(error.code, PublishError::VALIDATION_ERROR);
    assert!(!error.retryable);
    assert_eq!(factory.mock(Platform::Facebook).publish_call_count(), 0);

    for id in [&a.id, &b.id] {
        let log = logs.iter().find(|l| &l.account_id == id).unwrap();
        assert_eq!(log.status, LogStatus::Published);
    }
}

#[tokio::test]
async fn test_unexpected_failure_is_recorded_as_retryable() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;

    let factory = Arc::new(MockAdapterFactory::new().with_adapter(
        MockAdapter::new(Platform::Twitter)
            .with_behavior(&a.id, MockBehavior::Fail("connection reset".to_string())),
    ));
    let report = completed(
        env.orchestrator(factory)
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Failed);
    let error = report.results[0].error.as_ref().unwrap();
    assert_eq!(error.code, PublishError::UNEXPECTED_ERROR);
    assert!(error.retryable);
    assert!(error.message.contains("connection reset"));
}

#[tokio::test]
async fn test_refresh_window_boundaries() {
    let env = TestEnv::new().await;
    let soon = env
        .link(Platform::Twitter, "soon", "old-soon", Some("r"), Some(now() + 4 * 60))
        .await;
    let later = env
        .link(Platform::Twitter, "later", "old-later", Some("r"), Some(now() + 6 * 60))
        .await;
    let unknown = env
        .link(Platform::Twitter, "unknown", "old-unknown", Some("r"), None)
        .await;
    let post = env.draft("hello", &[&soon, &later, &unknown]).await;

    let factory = Arc::new(
        MockAdapterFactory::new().with_adapter(
            MockAdapter::new(Platform::Twitter)
                .with_refresh(&soon.id, "new-soon", Some(3600))
                .with_refresh(&later.id, "new-later", Some(3600))
                .with_refresh(&unknown.id, "new-unknown", None),
        ),
    );
    env.orchestrator(factory.clone())
        .publish(&post.id, PublishTrigger::Manual)
        .await
        .unwrap();

    let refreshed = factory.mock(Platform::Twitter).refresh_calls();
    assert!(refreshed.contains(&soon.id));
    assert!(refreshed.contains(&unknown.id));
    assert!(!refreshed.contains(&later.id));

    let tokens: Vec<String> = factory
        .mock(Platform::Twitter)
        .publish_calls()
        .into_iter()
        .map(|call| call.access_token)
        .collect();
    assert!(tokens.contains(&"new-soon".to_string()));
    assert!(tokens.contains(&"old-later".to_string()));
    assert!(tokens.contains(&"new-unknown".to_string()));
}

#[tokio::test]
async fn test_failed_refresh_falls_back_to_stored_token() {
    let env = TestEnv::new().await;
    let a = env
        .link(Platform::Linkedin, "a", "stored-a", Some("refresh-a"), Some(now() - 10))
        .await;
    let post = env.draft("hello", &[&a]).await;

    // No refresh configured for the account: refresh_token yields None
    let factory = Arc::new(MockAdapterFactory::new());
    let report = completed(
        env.orchestrator(factory.clone())
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Completed);
    let linkedin = factory.mock(Platform::Linkedin);
    assert_eq!(linkedin.refresh_calls(), vec![a.id.clone()]);
    assert_eq!(linkedin.publish_calls()[0].access_token, "stored-a");
}

#[tokio::test]
async fn test_undecryptable_refresh_token_is_ignored() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;

    let other_vault =
        libomnicast::CredentialVault::from_base64_key(&libomnicast::CredentialVault::generate_key())
            .unwrap();
    let foreign_refresh = other_vault.encrypt("refresh-from-elsewhere").unwrap();
    env.db
        .update_account_tokens(
            &a.id,
            &env.vault.encrypt("token-a").unwrap(),
            Some(&foreign_refresh),
            Some(now() - 10),
        )
        .await
        .unwrap();
    let post = env.draft("hello", &[&a]).await;

    let factory = Arc::new(MockAdapterFactory::new());
    let report = completed(
        env.orchestrator(factory.clone())
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    // Refresh is skipped and the stored access token still publishes
    assert_eq!(report.status, PostStatus::Completed);
    assert!(factory.mock(Platform::Twitter).refresh_calls().is_empty());
}

#[tokio::test]
async fn test_undecryptable_access_token_fails_only_that_account() {
    let env = TestEnv::new().await;
    let good = env.fresh_link(Platform::Twitter, "good").await;
    let broken = env
        .link(Platform::Linkedin, "broken", "ignored", None, Some(now() + 3600))
        .await;

    let other_vault =
        libomnicast::CredentialVault::from_base64_key(&libomnicast::CredentialVault::generate_key())
            .unwrap();
    env.db
        .update_account_tokens(
            &broken.id,
            &other_vault.encrypt("token-broken").unwrap(),
            None,
            Some(now() + 3600),
        )
        .await
        .unwrap();
    let post = env.draft("hello", &[&good, &broken]).await;

    let factory = Arc::new(MockAdapterFactory::new());
    let report = completed(
        env.orchestrator(factory.clone())
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Partial);
    let failed = report
        .results
        .iter()
        .find(|r| r.account_id == broken.id)
        .unwrap();
    assert_eq!(
        failed.error.as_ref().unwrap().code,
        PublishError::CREDENTIAL_ERROR
    );
    assert_eq!(factory.mock(Platform::Linkedin).publish_call_count(), 0);
    assert_eq!(env.account(&broken.id).await.status, AccountStatus::Error);
}

#[tokio::test]
async fn test_auth_error_marks_account_expired() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;

    let factory = Arc::new(MockAdapterFactory::new().with_adapter(
        MockAdapter::new(Platform::Twitter).with_behavior(
            &a.id,
            MockBehavior::Reject(PublishError::new(
                PublishError::AUTH_ERROR,
                "token revoked",
                false,
            )),
        ),
    ));
    env.orchestrator(factory)
        .publish(&post.id, PublishTrigger::Manual)
        .await
        .unwrap();

    let account = env.account(&a.id).await;
    assert_eq!(account.status, AccountStatus::Expired);
    assert_eq!(account.last_error.as_deref(), Some("token revoked"));
}

#[tokio::test]
async fn test_missing_and_inactive_targets_are_silently_excluded() {
    let env = TestEnv::new().await;
    let active = env.fresh_link(Platform::Twitter, "active").await;
    let expired = env.fresh_link(Platform::Linkedin, "expired").await;
    env.db
        .mark_account_status(&expired.id, AccountStatus::Expired, Some("revoked"))
        .await
        .unwrap();

    let post = libomnicast::Post::new(
        common::OWNER,
        libomnicast::PostContent::text("hello"),
        [Platform::Twitter, Platform::Linkedin].into_iter().collect(),
        [active.id.clone(), expired.id.clone(), "ghost".to_string()]
            .into_iter()
            .collect(),
    );
    env.db.create_post(&post).await.unwrap();

    let factory = Arc::new(MockAdapterFactory::new());
    let report = completed(
        env.orchestrator(factory)
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Completed);
    let logs = env.db.list_publish_logs(&post.id).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].account_id, active.id);
}

#[tokio::test]
async fn test_no_remaining_targets_fails_without_logs() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;
    env.db
        .delete_account_link(common::OWNER, &a.id)
        .await
        .unwrap();

    let report = completed(
        env.orchestrator(Arc::new(MockAdapterFactory::new()))
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Failed);
    assert!(report.results.is_empty());
    assert!(env.db.list_publish_logs(&post.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_post_is_not_found() {
    let env = TestEnv::new().await;
    let result = env
        .orchestrator(Arc::new(MockAdapterFactory::new()))
        .publish("no-such-post", PublishTrigger::Manual)
        .await;
    assert!(matches!(result, Err(OmnicastError::NotFound(_))));
}

#[tokio::test]
async fn test_finished_post_is_skipped() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;
    let factory = Arc::new(MockAdapterFactory::new());
    let orchestrator = env.orchestrator(factory.clone());

    orchestrator
        .publish(&post.id, PublishTrigger::Manual)
        .await
        .unwrap();
    let second = orchestrator
        .publish(&post.id, PublishTrigger::Manual)
        .await
        .unwrap();

    assert_eq!(
        second,
        PublishRun::Skipped {
            post_id: post.id.clone(),
            status: PostStatus::Completed
        }
    );
    assert_eq!(factory.mock(Platform::Twitter).publish_call_count(), 1);
    assert_eq!(env.db.list_publish_logs(&post.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_concurrent_runs_publish_once() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;

    let factory = Arc::new(MockAdapterFactory::new().with_adapter(
        MockAdapter::new(Platform::Twitter).with_delay(Duration::from_millis(200)),
    ));
    let executor = PublishExecutor::new(env.orchestrator(factory.clone()));

    let first = executor.submit(&post.id, PublishTrigger::Manual);
    let second = executor.submit(&post.id, PublishTrigger::Manual);
    let runs = [first.wait().await.unwrap(), second.wait().await.unwrap()];

    let completed_runs = runs
        .iter()
        .filter(|run| matches!(run, PublishRun::Completed(_)))
        .count();
    assert_eq!(completed_runs, 1);
    assert_eq!(factory.mock(Platform::Twitter).publish_call_count(), 1);
    assert_eq!(env.db.list_publish_logs(&post.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retry_only_targets_unpublished_accounts() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let b = env.fresh_link(Platform::Linkedin, "b").await;
    let post = env.draft("hello", &[&a, &b]).await;

    let factory = Arc::new(MockAdapterFactory::new().with_adapter(
        MockAdapter::new(Platform::Linkedin).with_behavior(
            &b.id,
            MockBehavior::Reject(PublishError::new(PublishError::RATE_LIMITED, "slow down", true)),
        ),
    ));
    let orchestrator = env.orchestrator(factory.clone());

    let first = completed(
        orchestrator
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
    );
    assert_eq!(first.status, PostStatus::Partial);

    // A plain publish may not restart a partial post
    assert!(matches!(
        orchestrator
            .publish(&post.id, PublishTrigger::Manual)
            .await
            .unwrap(),
        PublishRun::Skipped { .. }
    ));

    let retry = completed(
        orchestrator
            .publish(&post.id, PublishTrigger::Retry)
            .await
            .unwrap(),
    );
    assert_eq!(retry.status, PostStatus::Partial);
    assert_eq!(retry.results.len(), 1);
    assert_eq!(retry.results[0].account_id, b.id);

    assert_eq!(factory.mock(Platform::Twitter).publish_call_count(), 1);
    assert_eq!(factory.mock(Platform::Linkedin).publish_call_count(), 2);

    let logs = env.db.list_publish_logs(&post.id).await.unwrap();
    let b_attempts: Vec<u32> = logs
        .iter()
        .filter(|l| l.account_id == b.id)
        .map(|l| l.attempts)
        .collect();
    assert_eq!(b_attempts, vec![1, 2]);
}

#[tokio::test]
async fn test_progress_events() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;
    let mut receiver = env.events.subscribe();

    env.orchestrator(Arc::new(MockAdapterFactory::new()))
        .publish(&post.id, PublishTrigger::Manual)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }

    assert!(matches!(
        events[0],
        Event::PublishStarted { accounts: 1, .. }
    ));
    assert!(matches!(events[1], Event::AccountPublished { .. }));
    assert_eq!(
        events[2],
        Event::PublishFinished {
            post_id: post.id.clone(),
            status: PostStatus::Completed
        }
    );
}

#[tokio::test]
async fn test_unwritable_publish_log_aborts_the_run() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let post = env.draft("hello", &[&a]).await;
    env.block_publish_log().await;

    let factory = Arc::new(MockAdapterFactory::new());
    let result = env
        .orchestrator(factory.clone())
        .publish(&post.id, PublishTrigger::Manual)
        .await;

    assert!(matches!(result, Err(OmnicastError::Database(_))));
    assert_eq!(factory.mock(Platform::Twitter).publish_call_count(), 1);
    // No terminal success without a log entry behind it
    let stored = env.db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(stored.status, PostStatus::Failed);
    assert!(stored.published_at.is_none());
    assert!(env.db.list_publish_logs(&post.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rerun_never_republishes_a_logged_account() {
    let env = TestEnv::new().await;
    let a = env.fresh_link(Platform::Twitter, "a").await;
    let b = env.fresh_link(Platform::Linkedin, "b").await;
    let post = env.draft("hello", &[&a, &b]).await;
    env.db
        .transition_post_status(&post.id, &[PostStatus::Draft], PostStatus::Scheduled)
        .await
        .unwrap();

    let factory = Arc::new(MockAdapterFactory::new());
    let orchestrator = env.orchestrator(factory.clone());

    // Twitter gets logged, then the store refuses the LinkedIn entry
    env.execute_sql(&format!(
        "CREATE TRIGGER block_linkedin BEFORE INSERT ON publish_logs \
         WHEN NEW.account_id = '{}' \
         BEGIN SELECT RAISE(ABORT, 'publish log unavailable'); END",
        b.id
    ))
    .await;
    assert!(orchestrator
        .publish(&post.id, PublishTrigger::Scheduled)
        .await
        .is_err());
    assert_eq!(
        env.db.get_post(&post.id).await.unwrap().unwrap().status,
        PostStatus::Scheduled
    );

    env.execute_sql("DROP TRIGGER block_linkedin").await;
    let report = completed(
        orchestrator
            .publish(&post.id, PublishTrigger::Scheduled)
            .await
            .unwrap(),
    );

    assert_eq!(report.status, PostStatus::Completed);
    assert_eq!(report.results.len(), 1);
    assert_eq!(report.results[0].account_id, b.id);
    assert_eq!(factory.mock(Platform::Twitter).publish_call_count(), 1);
    assert_eq!(factory.mock(Platform::Linkedin).publish_call_count(), 2);
}
