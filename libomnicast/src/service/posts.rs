//! Post management scoped to one owner
//!
//! Posts of other owners behave exactly like missing posts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;

use super::executor::{PublishExecutor, PublishTask};
use crate::db::Database;
use crate::error::{OmnicastError, Result};
use crate::publisher::PublishTrigger;
use crate::scheduling::SchedulerBridge;
use crate::types::{Platform, Post, PostContent, PostStatus, PublishLogEntry, ScheduledJob};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPost {
    pub content: PostContent,
    /// Derived from the targeted accounts when empty
    #[serde(default)]
    pub target_platforms: BTreeSet<Platform>,
    pub target_account_ids: BTreeSet<String>,
    /// Schedule right away when set
    #[serde(default)]
    pub scheduled_at: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostUpdate {
    pub content: Option<PostContent>,
    pub target_platforms: Option<BTreeSet<Platform>>,
    pub target_account_ids: Option<BTreeSet<String>>,
}

/// A post with its publish history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub logs: Vec<PublishLogEntry>,
    pub job: Option<ScheduledJob>,
}

fn validate_content(content: &PostContent) -> Result<()> {
    if content.text.trim().is_empty() && content.media.is_empty() {
        return Err(OmnicastError::InvalidInput(
            "Post needs text or media".to_string(),
        ));
    }
    if let Some(item) = content.media.iter().find(|m| m.url.trim().is_empty()) {
        return Err(OmnicastError::InvalidInput(format!(
            "Media item of type {} has no URL",
            item.mime_type
        )));
    }
    Ok(())
}

#[derive(Clone)]
pub struct PostService {
    db: Arc<Database>,
    scheduler: Arc<SchedulerBridge>,
    executor: PublishExecutor,
}

impl PostService {
    pub fn new(db: Arc<Database>, scheduler: Arc<SchedulerBridge>, executor: PublishExecutor) -> Self {
        Self {
            db,
            scheduler,
            executor,
        }
    }

    async fn owned(&self, owner_id: &str, post_id: &str) -> Result<Post> {
        self.db
            .get_post(post_id)
            .await?
            .filter(|post| post.owner_id == owner_id)
            .ok_or_else(|| OmnicastError::NotFound(format!("post {}", post_id)))
    }

    async fn platforms_of(
        &self,
        owner_id: &str,
        account_ids: &BTreeSet<String>,
    ) -> Result<BTreeSet<Platform>> {
        Ok(self
            .db
            .list_account_links(owner_id)
            .await?
            .into_iter()
            .filter(|link| account_ids.contains(&link.id))
            .map(|link| link.platform)
            .collect())
    }

    /// Create a draft, scheduling it when `scheduled_at` is given
    pub async fn create(&self, owner_id: &str, request: NewPost) -> Result<Post> {
        validate_content(&request.content)?;
        if request.target_account_ids.is_empty() {
            return Err(OmnicastError::InvalidInput(
                "At least one target account is required".to_string(),
            ));
        }

        let platforms = if request.target_platforms.is_empty() {
            self.platforms_of(owner_id, &request.target_account_ids)
                .await?
        } else {
            request.target_platforms
        };

        let post = Post::new(
            owner_id,
            request.content,
            platforms,
            request.target_account_ids,
        );
        self.db.create_post(&post).await?;
        info!(post_id = %post.id, owner_id, "Created post");

        match request.scheduled_at {
            Some(when) => {
                if let Err(e) = self.scheduler.schedule(owner_id, &post.id, when).await {
                    // Leave no half-created post behind
                    self.db.delete_post(&post.id).await?;
                    return Err(e);
                }
                self.owned(owner_id, &post.id).await
            }
            None => Ok(post),
        }
    }

    pub async fn get(&self, owner_id: &str, post_id: &str) -> Result<PostDetail> {
        let post = self.owned(owner_id, post_id).await?;
        let logs = self.db.list_publish_logs(post_id).await?;
        let job = self.db.get_job_for_post(post_id).await?;
        Ok(PostDetail { post, logs, job })
    }

    pub async fn list(&self, owner_id: &str, status: Option<PostStatus>) -> Result<Vec<Post>> {
        self.db.list_posts(owner_id, status).await
    }

    /// Edit content or targets of a draft or scheduled post
    pub async fn update(&self, owner_id: &str, post_id: &str, update: PostUpdate) -> Result<Post> {
        let post = self.owned(owner_id, post_id).await?;
        if !post.status.is_editable() {
            return Err(OmnicastError::Conflict(format!(
                "post {} is {} and can no longer be edited",
                post_id, post.status
            )));
        }

        let content = update.content.unwrap_or(post.content);
        validate_content(&content)?;
        let account_ids = update.target_account_ids.unwrap_or(post.target_account_ids);
        if account_ids.is_empty() {
            return Err(OmnicastError::InvalidInput(
                "At least one target account is required".to_string(),
            ));
        }
        let platforms = match update.target_platforms {
            Some(platforms) if !platforms.is_empty() => platforms,
            _ => self.platforms_of(owner_id, &account_ids).await?,
        };

        if !self
            .db
            .update_post_content(post_id, &content, &platforms, &account_ids)
            .await?
        {
            return Err(OmnicastError::Conflict(format!(
                "post {} started publishing",
                post_id
            )));
        }
        self.owned(owner_id, post_id).await
    }

    /// Delete a post and its pending schedule; the publish log stays
    pub async fn delete(&self, owner_id: &str, post_id: &str) -> Result<()> {
        let post = self.owned(owner_id, post_id).await?;
        if post.status == PostStatus::Publishing {
            return Err(OmnicastError::Conflict(format!(
                "post {} is publishing",
                post_id
            )));
        }

        self.scheduler.drop_job(post_id).await?;
        if !self.db.delete_post(post_id).await? {
            return Err(OmnicastError::Conflict(format!(
                "post {} started publishing",
                post_id
            )));
        }
        info!(post_id, owner_id, "Deleted post");
        Ok(())
    }

    /// Start a publish run ("publish now", or an explicit retry)
    pub async fn publish(&self, owner_id: &str, post_id: &str, retry: bool) -> Result<PublishTask> {
        self.owned(owner_id, post_id).await?;
        let trigger = if retry {
            PublishTrigger::Retry
        } else {
            PublishTrigger::Manual
        };
        Ok(self.executor.submit(post_id, trigger))
    }

    pub async fn schedule(&self, owner_id: &str, post_id: &str, when: i64) -> Result<ScheduledJob> {
        self.scheduler.schedule(owner_id, post_id, when).await
    }

    pub async fn unschedule(&self, owner_id: &str, post_id: &str) -> Result<()> {
        self.scheduler.unschedule(owner_id, post_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MediaItem;

    #[test]
    fn test_validate_content() {
        assert!(validate_content(&PostContent::text("hello")).is_ok());
        assert!(validate_content(&PostContent::text("   ")).is_err());

        let mut media_only = PostContent::text("");
        media_only.media = vec![MediaItem::image("https://cdn/a.jpg", "image/jpeg")];
        assert!(validate_content(&media_only).is_ok());

        media_only.media = vec![MediaItem::image(" ", "image/jpeg")];
        assert!(validate_content(&media_only).is_err());
    }
}
