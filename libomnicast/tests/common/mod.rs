//! Shared fixtures for integration tests

#![allow(dead_code)]

use libomnicast::platforms::AdapterFactory;
use libomnicast::service::events::EventBus;
use libomnicast::types::{AccountLink, AccountStatus};
use libomnicast::{CredentialVault, Database, Platform, Post, PostContent, PublishOrchestrator};
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::TempDir;

pub const VAULT_KEY: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=";
pub const OWNER: &str = "owner-1";

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub struct TestEnv {
    pub temp_dir: TempDir,
    pub db: Arc<Database>,
    pub vault: Arc<CredentialVault>,
    pub events: EventBus,
}

impl TestEnv {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

        Self {
            temp_dir,
            db: Arc::new(db),
            vault: Arc::new(CredentialVault::from_base64_key(VAULT_KEY).unwrap()),
            events: EventBus::new(100),
        }
    }

    pub fn db_path(&self) -> String {
        self.temp_dir
            .path()
            .join("test.db")
            .to_str()
            .unwrap()
            .to_string()
    }

    /// Store an active link with tokens sealed by this env's vault
    pub async fn link(
        &self,
        platform: Platform,
        platform_account_id: &str,
        access_token: &str,
        refresh_token: Option<&str>,
        token_expires_at: Option<i64>,
    ) -> AccountLink {
        let now = now();
        let link = AccountLink {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: OWNER.to_string(),
            platform,
            platform_account_id: platform_account_id.to_string(),
            display_name: format!("{} {}", platform, platform_account_id),
            avatar_url: None,
            access_token: self.vault.encrypt(access_token).unwrap(),
            refresh_token: refresh_token.map(|t| self.vault.encrypt(t).unwrap()),
            token_expires_at,
            scopes: BTreeSet::new(),
            status: AccountStatus::Active,
            last_error: None,
            connected_at: now,
            updated_at: now,
        };
        self.db.upsert_account_link(&link).await.unwrap().0
    }

    /// Link whose token is valid for another hour
    pub async fn fresh_link(&self, platform: Platform, platform_account_id: &str) -> AccountLink {
        self.link(
            platform,
            platform_account_id,
            &format!("token-{}", platform_account_id),
            Some(&format!("refresh-{}", platform_account_id)),
            Some(now() + 3600),
        )
        .await
    }

    /// Draft targeting `accounts`
    pub async fn draft(&self, text: &str, accounts: &[&AccountLink]) -> Post {
        let post = Post::new(
            OWNER,
            PostContent::text(text),
            accounts.iter().map(|a| a.platform).collect(),
            accounts.iter().map(|a| a.id.clone()).collect(),
        );
        self.db.create_post(&post).await.unwrap();
        post
    }

    pub fn orchestrator(&self, adapters: Arc<dyn AdapterFactory>) -> PublishOrchestrator {
        PublishOrchestrator::new(
            Arc::clone(&self.db),
            Arc::clone(&self.vault),
            adapters,
            self.events.clone(),
        )
    }

    /// Run a statement on a connection of its own
    pub async fn execute_sql(&self, sql: &str) {
        let pool = sqlx::SqlitePool::connect(&format!("sqlite://{}", self.db_path()))
            .await
            .unwrap();
        sqlx::query(sql).execute(&pool).await.unwrap();
        pool.close().await;
    }

    /// Make every insert into the publish log fail until `unblock_publish_log`
    pub async fn block_publish_log(&self) {
        self.execute_sql(
            "CREATE TRIGGER block_publish_log BEFORE INSERT ON publish_logs \
             BEGIN SELECT RAISE(ABORT, 'publish log unavailable'); END",
        )
        .await;
    }

    pub async fn unblock_publish_log(&self) {
        self.execute_sql("DROP TRIGGER block_publish_log").await;
    }

    pub async fn account(&self, id: &str) -> AccountLink {
        self.db.get_account_link(id).await.unwrap().unwrap()
    }
}
