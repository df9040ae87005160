//! Database operations for Omnicast
//!
//! One SQLite database holds account links, posts, scheduled jobs and the
//! publish log. Status changes that can race (publish triggers, job claims)
//! are single conditional `UPDATE`s whose affected-row count tells the caller
//! whether it won.

use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use crate::error::{DbError, Result};
use crate::types::{
    AccountLink, AccountStatus, JobStatus, LogStatus, Platform, Post, PostContent, PostStatus,
    PublishError, PublishLogEntry, ScheduledJob,
};
use crate::vault::EncryptedSecret;

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Database {
    /// Open (creating if needed) the database and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
            }
        }

        // mode=rwc creates the file on first start
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    // ---------------------------------------------------------------------
    // Account links
    // ---------------------------------------------------------------------

    /// Insert a link or refresh the existing one for the same external identity
    ///
    /// Returns the stored row and whether it was newly created. An existing
    /// link keeps its id and `connected_at`; tokens, profile and scopes are
    /// replaced and the link becomes active again.
    pub async fn upsert_account_link(&self, link: &AccountLink) -> Result<(AccountLink, bool)> {
        let existing = self
            .find_account_link(&link.owner_id, link.platform, &link.platform_account_id)
            .await?;

        let scopes = serde_json::to_string(&link.scopes).map_err(DbError::Serialization)?;
        let refresh = link.refresh_token.as_ref();

        sqlx::query(
            r#"
            INSERT INTO account_links (
                id, owner_id, platform, platform_account_id, display_name, avatar_url,
                access_token_cipher, access_token_iv, access_token_tag,
                refresh_token_cipher, refresh_token_iv, refresh_token_tag,
                token_expires_at, scopes, status, last_error, connected_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'active', NULL, ?, ?)
            ON CONFLICT (owner_id, platform, platform_account_id) DO UPDATE SET
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                access_token_cipher = excluded.access_token_cipher,
                access_token_iv = excluded.access_token_iv,
                access_token_tag = excluded.access_token_tag,
                refresh_token_cipher = excluded.refresh_token_cipher,
                refresh_token_iv = excluded.refresh_token_iv,
                refresh_token_tag = excluded.refresh_token_tag,
                token_expires_at = excluded.token_expires_at,
                scopes = excluded.scopes,
                status = 'active',
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&link.id)
        .bind(&link.owner_id)
        .bind(link.platform.as_str())
        .bind(&link.platform_account_id)
        .bind(&link.display_name)
        .bind(&link.avatar_url)
        .bind(&link.access_token.cipher)
        .bind(&link.access_token.iv)
        .bind(&link.access_token.auth_tag)
        .bind(refresh.map(|r| r.cipher.as_str()))
        .bind(refresh.map(|r| r.iv.as_str()))
        .bind(refresh.map(|r| r.auth_tag.as_str()))
        .bind(link.token_expires_at)
        .bind(scopes)
        .bind(link.connected_at)
        .bind(link.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        let stored = self
            .find_account_link(&link.owner_id, link.platform, &link.platform_account_id)
            .await?
            .ok_or_else(|| DbError::Corrupt(format!("account link {} vanished", link.id)))?;

        Ok((stored, existing.is_none()))
    }

    async fn find_account_link(
        &self,
        owner_id: &str,
        platform: Platform,
        platform_account_id: &str,
    ) -> Result<Option<AccountLink>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM account_links
            WHERE owner_id = ? AND platform = ? AND platform_account_id = ?
            "#,
        )
        .bind(owner_id)
        .bind(platform.as_str())
        .bind(platform_account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account_link).transpose()
    }

    pub async fn get_account_link(&self, id: &str) -> Result<Option<AccountLink>> {
        let row = sqlx::query("SELECT * FROM account_links WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_account_link).transpose()
    }

    /// All links of one owner, oldest first
    pub async fn list_account_links(&self, owner_id: &str) -> Result<Vec<AccountLink>> {
        let rows = sqlx::query(
            "SELECT * FROM account_links WHERE owner_id = ? ORDER BY connected_at, id",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_account_link).collect()
    }

    /// Delete a link if it belongs to `owner_id`; returns whether a row was removed
    pub async fn delete_account_link(&self, owner_id: &str, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM account_links WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Persist refreshed tokens
    ///
    /// A `None` refresh token keeps the stored one; providers that do not
    /// rotate refresh tokens omit it from the refresh response.
    pub async fn update_account_tokens(
        &self,
        id: &str,
        access_token: &EncryptedSecret,
        refresh_token: Option<&EncryptedSecret>,
        token_expires_at: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE account_links SET
                access_token_cipher = ?,
                access_token_iv = ?,
                access_token_tag = ?,
                refresh_token_cipher = COALESCE(?, refresh_token_cipher),
                refresh_token_iv = COALESCE(?, refresh_token_iv),
                refresh_token_tag = COALESCE(?, refresh_token_tag),
                token_expires_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&access_token.cipher)
        .bind(&access_token.iv)
        .bind(&access_token.auth_tag)
        .bind(refresh_token.map(|r| r.cipher.as_str()))
        .bind(refresh_token.map(|r| r.iv.as_str()))
        .bind(refresh_token.map(|r| r.auth_tag.as_str()))
        .bind(token_expires_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn mark_account_status(
        &self,
        id: &str,
        status: AccountStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE account_links SET status = ?, last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    // ---------------------------------------------------------------------
    // Posts
    // ---------------------------------------------------------------------

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        let content = serde_json::to_string(&post.content).map_err(DbError::Serialization)?;
        let platforms =
            serde_json::to_string(&post.target_platforms).map_err(DbError::Serialization)?;
        let accounts =
            serde_json::to_string(&post.target_account_ids).map_err(DbError::Serialization)?;

        sqlx::query(
            r#"
            INSERT INTO posts (
                id, owner_id, content, target_platforms, target_account_ids,
                status, scheduled_at, published_at, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.owner_id)
        .bind(content)
        .bind(platforms)
        .bind(accounts)
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.published_at)
        .bind(post.created_at)
        .bind(post.updated_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_post).transpose()
    }

    /// Posts of one owner, newest first, optionally filtered by status
    pub async fn list_posts(&self, owner_id: &str, status: Option<PostStatus>) -> Result<Vec<Post>> {
        let mut where_clauses = vec!["owner_id = ?"];
        if status.is_some() {
            where_clauses.push("status = ?");
        }

        let query_str = format!(
            "SELECT * FROM posts WHERE {} ORDER BY created_at DESC, id",
            where_clauses.join(" AND ")
        );

        let mut query = sqlx::query(&query_str).bind(owner_id);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }

        let rows = query
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_post).collect()
    }

    /// Replace content and targets while the post is still a draft or scheduled
    ///
    /// Returns false when the post is in any other state (or missing).
    pub async fn update_post_content(
        &self,
        post_id: &str,
        content: &PostContent,
        target_platforms: &BTreeSet<Platform>,
        target_account_ids: &BTreeSet<String>,
    ) -> Result<bool> {
        let content = serde_json::to_string(content).map_err(DbError::Serialization)?;
        let platforms = serde_json::to_string(target_platforms).map_err(DbError::Serialization)?;
        let accounts = serde_json::to_string(target_account_ids).map_err(DbError::Serialization)?;

        let result = sqlx::query(
            r#"
            UPDATE posts
            SET content = ?, target_platforms = ?, target_account_ids = ?, updated_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(content)
        .bind(platforms)
        .bind(accounts)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a post unless a publish run currently owns it
    ///
    /// Publish log entries are left in place.
    pub async fn delete_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ? AND status != 'publishing'")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-swap the post status
    ///
    /// The update only applies when the current status is one of `expected`.
    /// Returns whether this caller performed the transition.
    pub async fn transition_post_status(
        &self,
        post_id: &str,
        expected: &[PostStatus],
        new_status: PostStatus,
    ) -> Result<bool> {
        if expected.is_empty() {
            return Ok(false);
        }

        let query_str = format!(
            "UPDATE posts SET status = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&query_str)
            .bind(new_status.as_str())
            .bind(chrono::Utc::now().timestamp())
            .bind(post_id);
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Compare-and-swap status together with the scheduled time
    pub async fn set_post_schedule(
        &self,
        post_id: &str,
        expected: &[PostStatus],
        new_status: PostStatus,
        scheduled_at: Option<i64>,
    ) -> Result<bool> {
        if expected.is_empty() {
            return Ok(false);
        }

        let query_str = format!(
            "UPDATE posts SET status = ?, scheduled_at = ?, updated_at = ? WHERE id = ? AND status IN ({})",
            placeholders(expected.len())
        );

        let mut query = sqlx::query(&query_str)
            .bind(new_status.as_str())
            .bind(scheduled_at)
            .bind(chrono::Utc::now().timestamp())
            .bind(post_id);
        for status in expected {
            query = query.bind(status.as_str());
        }

        let result = query
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    /// Close a publish run: `publishing` to a terminal status
    pub async fn finish_post(
        &self,
        post_id: &str,
        status: PostStatus,
        published_at: Option<i64>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts
            SET status = ?, published_at = COALESCE(?, published_at), updated_at = ?
            WHERE id = ? AND status = 'publishing'
            "#,
        )
        .bind(status.as_str())
        .bind(published_at)
        .bind(chrono::Utc::now().timestamp())
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ---------------------------------------------------------------------
    // Scheduled jobs
    // ---------------------------------------------------------------------

    /// Create the job for a post or reset the existing one to `pending`
    pub async fn upsert_scheduled_job(&self, job: &ScheduledJob) -> Result<ScheduledJob> {
        sqlx::query(
            r#"
            INSERT INTO scheduled_jobs (
                id, post_id, owner_id, scheduled_at, status, queue_message_id,
                attempts, max_attempts, last_attempt_at, error, created_at
            )
            VALUES (?, ?, ?, ?, 'pending', ?, 0, ?, NULL, NULL, ?)
            ON CONFLICT (post_id) DO UPDATE SET
                scheduled_at = excluded.scheduled_at,
                status = 'pending',
                queue_message_id = excluded.queue_message_id,
                attempts = 0,
                max_attempts = excluded.max_attempts,
                last_attempt_at = NULL,
                error = NULL
            "#,
        )
        .bind(&job.id)
        .bind(&job.post_id)
        .bind(&job.owner_id)
        .bind(job.scheduled_at)
        .bind(&job.queue_message_id)
        .bind(job.max_attempts as i64)
        .bind(job.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        self.get_job_for_post(&job.post_id)
            .await?
            .ok_or_else(|| DbError::Corrupt(format!("job for post {} vanished", job.post_id)).into())
    }

    pub async fn get_job_for_post(&self, post_id: &str) -> Result<Option<ScheduledJob>> {
        let row = sqlx::query("SELECT * FROM scheduled_jobs WHERE post_id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Jobs whose time has come, earliest first
    ///
    /// Besides `pending` jobs this returns `processing` jobs claimed at or
    /// before `lease_expired_before`; their sweeper is presumed gone.
    pub async fn due_jobs(
        &self,
        now: i64,
        lease_expired_before: i64,
        limit: i64,
    ) -> Result<Vec<ScheduledJob>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM scheduled_jobs
            WHERE scheduled_at <= ?
              AND (status = 'pending'
                   OR (status = 'processing' AND COALESCE(last_attempt_at, 0) <= ?))
            ORDER BY scheduled_at, id
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(lease_expired_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_job).collect()
    }

    /// Move a job to `processing`, counting the attempt
    ///
    /// A `processing` job whose lease ran out can be claimed again. Returns
    /// false when another sweeper got there first.
    pub async fn claim_job(&self, job_id: &str, now: i64, lease_expired_before: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_jobs
            SET status = 'processing', attempts = attempts + 1, last_attempt_at = ?
            WHERE id = ?
              AND (status = 'pending'
                   OR (status = 'processing' AND COALESCE(last_attempt_at, 0) <= ?))
            "#,
        )
        .bind(now)
        .bind(job_id)
        .bind(lease_expired_before)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn set_job_status(
        &self,
        job_id: &str,
        status: JobStatus,
        error: Option<&str>,
    ) -> Result<()> {
        sqlx::query("UPDATE scheduled_jobs SET status = ?, error = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(error)
            .bind(job_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(())
    }

    pub async fn delete_job_for_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM scheduled_jobs WHERE post_id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() > 0)
    }

    // ---------------------------------------------------------------------
    // Publish log
    // ---------------------------------------------------------------------

    /// Append one entry; entries are never updated afterwards
    pub async fn append_publish_log(&self, entry: &PublishLogEntry) -> Result<i64> {
        let error = entry.error.as_ref();

        let result = sqlx::query(
            r#"
            INSERT INTO publish_logs (
                post_id, account_id, platform, status, platform_post_id, platform_post_url,
                error_code, error_message, error_retryable, error_raw_response,
                attempts, last_attempt_at, published_at, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.post_id)
        .bind(&entry.account_id)
        .bind(entry.platform.as_str())
        .bind(entry.status.as_str())
        .bind(&entry.platform_post_id)
        .bind(&entry.platform_post_url)
        .bind(error.map(|e| e.code.as_str()))
        .bind(error.map(|e| e.message.as_str()))
        .bind(error.map(|e| e.retryable))
        .bind(error.and_then(|e| e.raw_response.as_deref()))
        .bind(entry.attempts as i64)
        .bind(entry.last_attempt_at)
        .bind(entry.published_at)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.last_insert_rowid())
    }

    /// Every log entry of a post in insertion order
    pub async fn list_publish_logs(&self, post_id: &str) -> Result<Vec<PublishLogEntry>> {
        let rows = sqlx::query("SELECT * FROM publish_logs WHERE post_id = ? ORDER BY id")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await
            .map_err(DbError::SqlxError)?;

        rows.iter().map(row_to_log_entry).collect()
    }

    pub async fn count_publish_attempts(&self, post_id: &str, account_id: &str) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM publish_logs WHERE post_id = ? AND account_id = ?",
        )
        .bind(post_id)
        .bind(account_id)
        .fetch_one(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(count as u32)
    }

    /// Accounts that already have a `published` entry for the post
    pub async fn published_account_ids(&self, post_id: &str) -> Result<HashSet<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT account_id FROM publish_logs WHERE post_id = ? AND status = 'published'",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(ids.into_iter().collect())
    }
}

fn row_to_account_link(row: &SqliteRow) -> Result<AccountLink> {
    let refresh_token = match (
        row.get::<Option<String>, _>("refresh_token_cipher"),
        row.get::<Option<String>, _>("refresh_token_iv"),
        row.get::<Option<String>, _>("refresh_token_tag"),
    ) {
        (Some(cipher), Some(iv), Some(auth_tag)) => Some(EncryptedSecret { cipher, iv, auth_tag }),
        _ => None,
    };

    let scopes: String = row.get("scopes");

    Ok(AccountLink {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        platform: row.get::<String, _>("platform").parse()?,
        platform_account_id: row.get("platform_account_id"),
        display_name: row.get("display_name"),
        avatar_url: row.get("avatar_url"),
        access_token: EncryptedSecret {
            cipher: row.get("access_token_cipher"),
            iv: row.get("access_token_iv"),
            auth_tag: row.get("access_token_tag"),
        },
        refresh_token,
        token_expires_at: row.get("token_expires_at"),
        scopes: serde_json::from_str(&scopes).map_err(DbError::Serialization)?,
        status: row.get::<String, _>("status").parse()?,
        last_error: row.get("last_error"),
        connected_at: row.get("connected_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_post(row: &SqliteRow) -> Result<Post> {
    let content: String = row.get("content");
    let platforms: String = row.get("target_platforms");
    let accounts: String = row.get("target_account_ids");

    Ok(Post {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        content: serde_json::from_str(&content).map_err(DbError::Serialization)?,
        target_platforms: serde_json::from_str(&platforms).map_err(DbError::Serialization)?,
        target_account_ids: serde_json::from_str(&accounts).map_err(DbError::Serialization)?,
        status: row.get::<String, _>("status").parse()?,
        scheduled_at: row.get("scheduled_at"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn row_to_job(row: &SqliteRow) -> Result<ScheduledJob> {
    Ok(ScheduledJob {
        id: row.get("id"),
        post_id: row.get("post_id"),
        owner_id: row.get("owner_id"),
        scheduled_at: row.get("scheduled_at"),
        status: row.get::<String, _>("status").parse()?,
        queue_message_id: row.get("queue_message_id"),
        attempts: row.get::<i64, _>("attempts") as u32,
        max_attempts: row.get::<i64, _>("max_attempts") as u32,
        last_attempt_at: row.get("last_attempt_at"),
        error: row.get("error"),
        created_at: row.get("created_at"),
    })
}

fn row_to_log_entry(row: &SqliteRow) -> Result<PublishLogEntry> {
    let error = match row.get::<Option<String>, _>("error_code") {
        Some(code) => Some(PublishError {
            code,
            message: row
                .get::<Option<String>, _>("error_message")
                .unwrap_or_default(),
            retryable: row
                .get::<Option<bool>, _>("error_retryable")
                .unwrap_or(false),
            raw_response: row.get("error_raw_response"),
        }),
        None => None,
    };

    let status: LogStatus = row.get::<String, _>("status").parse()?;

    Ok(PublishLogEntry {
        id: Some(row.get("id")),
        post_id: row.get("post_id"),
        account_id: row.get("account_id"),
        platform: row.get::<String, _>("platform").parse()?,
        status,
        platform_post_id: row.get("platform_post_id"),
        platform_post_url: row.get("platform_post_url"),
        error,
        attempts: row.get::<i64, _>("attempts") as u32,
        last_attempt_at: row.get("last_attempt_at"),
        published_at: row.get("published_at"),
        created_at: row.get("created_at"),
    })
}
