//! Integration tests for the omni-sweep daemon

use assert_cmd::Command;
use libomnicast::types::{JobStatus, ScheduledJob};
use libomnicast::{Database, Post, PostContent, PostStatus};
use predicates::prelude::*;
use std::collections::BTreeSet;
use std::fs;
use tempfile::TempDir;

const VAULT_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";

/// Setup test environment with config and database
async fn setup_test_env() -> (TempDir, String, String) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");

    let config_content = format!(
        r#"
[database]
path = "{}"

[vault]
key = "{}"

[scheduler]
max_attempts = 3
sweep_interval_secs = 1
"#,
        db_path.display().to_string().replace('\\', "/"),
        VAULT_KEY
    );

    fs::write(&config_path, config_content).unwrap();

    // Initialize database
    let _db = Database::new(db_path.to_str().unwrap()).await.unwrap();

    (
        temp_dir,
        config_path.to_str().unwrap().to_string(),
        db_path.to_str().unwrap().to_string(),
    )
}

/// Create a scheduled post with a due job; its only target account does not exist
async fn create_due_post(db_path: &str) -> String {
    let db = Database::new(db_path).await.unwrap();
    let now = chrono::Utc::now().timestamp();

    let post = Post::new(
        "owner-1",
        PostContent::text("Test scheduled post"),
        BTreeSet::new(),
        BTreeSet::from(["missing-account".to_string()]),
    );
    db.create_post(&post).await.unwrap();
    assert!(db
        .set_post_schedule(
            &post.id,
            &[PostStatus::Draft],
            PostStatus::Scheduled,
            Some(now - 10)
        )
        .await
        .unwrap());

    db.upsert_scheduled_job(&ScheduledJob {
        id: uuid::Uuid::new_v4().to_string(),
        post_id: post.id.clone(),
        owner_id: "owner-1".to_string(),
        scheduled_at: now - 10,
        status: JobStatus::Pending,
        queue_message_id: None,
        attempts: 0,
        max_attempts: 3,
        last_attempt_at: None,
        error: None,
        created_at: now - 60,
    })
    .await
    .unwrap();

    post.id
}

#[tokio::test]
async fn test_once_with_no_due_jobs() {
    let (_temp_dir, config_path, _db_path) = setup_test_env().await;

    let mut cmd = Command::cargo_bin("omni-sweep").unwrap();
    cmd.env("OMNICAST_CONFIG", &config_path)
        .arg("--once")
        .assert()
        .success();
}

#[tokio::test]
async fn test_requires_valid_config() {
    let temp_dir = TempDir::new().unwrap();
    let invalid_config = temp_dir.path().join("invalid.toml");
    fs::write(&invalid_config, "invalid toml content [[[").unwrap();

    let mut cmd = Command::cargo_bin("omni-sweep").unwrap();
    cmd.env("OMNICAST_CONFIG", invalid_config.to_str().unwrap())
        .arg("--once")
        .assert()
        .failure()
        .code(1);
}

#[tokio::test]
async fn test_requires_vault_key() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    let db_path = temp_dir.path().join("test.db");
    fs::write(
        &config_path,
        format!(
            "[database]\npath = \"{}\"\n",
            db_path.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let mut cmd = Command::cargo_bin("omni-sweep").unwrap();
    cmd.env("OMNICAST_CONFIG", config_path.to_str().unwrap())
        .env_remove("OMNICAST_VAULT_KEY")
        .arg("--once")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("vault.key"));
}

#[tokio::test]
async fn test_once_processes_due_job() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_due_post(&db_path).await;

    let mut cmd = Command::cargo_bin("omni-sweep").unwrap();
    cmd.env("OMNICAST_CONFIG", &config_path)
        .arg("--once")
        .assert()
        .success();

    let db = Database::new(&db_path).await.unwrap();

    // The only target is gone, so the run ends failed without log entries
    let post = db.get_post(&post_id).await.unwrap().unwrap();
    assert_eq!(post.status, PostStatus::Failed);
    assert!(db.list_publish_logs(&post_id).await.unwrap().is_empty());

    let job = db.get_job_for_post(&post_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
}

#[tokio::test]
async fn test_second_run_does_not_republish() {
    let (_temp_dir, config_path, db_path) = setup_test_env().await;
    let post_id = create_due_post(&db_path).await;

    for _ in 0..2 {
        Command::cargo_bin("omni-sweep")
            .unwrap()
            .env("OMNICAST_CONFIG", &config_path)
            .arg("--once")
            .assert()
            .success();
    }

    let db = Database::new(&db_path).await.unwrap();
    let job = db.get_job_for_post(&post_id).await.unwrap().unwrap();
    assert_eq!(job.attempts, 1);
}

#[test]
fn test_help_documents_exit_codes() {
    Command::cargo_bin("omni-sweep")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 - Runtime or configuration error"))
        .stdout(predicate::str::contains("3 - Invalid input"));
}

#[test]
fn test_help_lists_flags() {
    Command::cargo_bin("omni-sweep")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--poll-interval"))
        .stdout(predicate::str::contains("--once"));
}
