//! Instagram business account adapter (Graph API content publishing)
//!
//! Publishing is container based: one container per media item (carousel
//! children when there is more than one), a wait until every video container
//! has finished processing, a carousel container on top of the children,
//! then `media_publish`.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::facebook::{GraphApi, GraphId};
use super::{
    check_text_length, finish_steps, read_json, AccountCredentials, MediaRules, PlatformAdapter,
    PublishOutcome, PublishPayload, StepResult, ValidationReport,
};
use crate::error::Result;
use crate::oauth::TokenSet;
use crate::types::{MediaItem, MediaKind, Platform, PublishError};

pub const TEXT_LIMIT: usize = 2200;
pub const HASHTAG_LIMIT: usize = 30;
pub const MAX_ITEMS: usize = 10;

const MEDIA_RULES: MediaRules = MediaRules {
    max_images: MAX_ITEMS,
    max_videos: MAX_ITEMS,
    allow_mixed: true,
    image_types: &["image/jpeg"],
    video_types: &["video/mp4", "video/quicktime"],
};

pub struct InstagramAdapter {
    http: reqwest::Client,
    graph: GraphApi,
    poll_interval: Duration,
    max_polls: u32,
}

#[derive(Debug, Deserialize)]
struct ContainerStatus {
    status_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Permalink {
    permalink: Option<String>,
}

impl InstagramAdapter {
    pub fn new(http: reqwest::Client, graph: GraphApi) -> Self {
        Self {
            http,
            graph,
            poll_interval: Duration::from_secs(3),
            max_polls: 40,
        }
    }

    /// Override the container status polling cadence
    pub fn with_polling(mut self, interval: Duration, max_polls: u32) -> Self {
        self.poll_interval = interval;
        self.max_polls = max_polls;
        self
    }

    async fn create_container(
        &self,
        ig_user: &str,
        form: Vec<(&'static str, String)>,
    ) -> StepResult<String> {
        let response = self
            .http
            .post(self.graph.url(&format!("{}/media", ig_user)))
            .form(&form)
            .send()
            .await?;
        let created: GraphId = read_json(Platform::Instagram, response).await?;
        Ok(created.id)
    }

    fn item_form(item: &MediaItem, carousel_item: bool, token: &str) -> Vec<(&'static str, String)> {
        let mut form = match item.kind {
            MediaKind::Image => vec![("image_url", item.url.clone())],
            MediaKind::Video => vec![
                ("media_type", (if carousel_item { "VIDEO" } else { "REELS" }).to_string()),
                ("video_url", item.url.clone()),
            ],
        };
        if carousel_item {
            form.push(("is_carousel_item", "true".to_string()));
        }
        form.push(("access_token", token.to_string()));
        form
    }

    async fn wait_until_finished(&self, container_id: &str, token: &str) -> StepResult<()> {
        for attempt in 0..self.max_polls {
            let response = self
                .http
                .get(self.graph.url(container_id))
                .query(&[("fields", "status_code"), ("access_token", token)])
                .send()
                .await?;
            let status: ContainerStatus = read_json(Platform::Instagram, response).await?;

            match status.status_code.as_deref() {
                Some("FINISHED") | Some("PUBLISHED") => return Ok(()),
                Some("ERROR") | Some("EXPIRED") => {
                    return Err(PublishError::new(
                        PublishError::PLATFORM_REJECTED,
                        format!("Instagram could not process container {}", container_id),
                        false,
                    )
                    .into())
                }
                other => {
                    debug!(container_id, attempt, status = ?other, "Instagram container not ready");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        Err(PublishError::new(
            PublishError::PLATFORM_UNAVAILABLE,
            format!("Instagram container {} did not finish processing", container_id),
            true,
        )
        .into())
    }

    async fn publish_steps(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> StepResult<PublishOutcome> {
        let token = credentials.access_token.expose_secret();
        let ig_user = credentials.account.platform_account_id.as_str();
        let caption = payload.rendered_text();

        let container_id = if let [item] = payload.media.as_slice() {
            let mut form = Self::item_form(item, false, token);
            form.push(("caption", caption));
            let id = self.create_container(ig_user, form).await?;
            if item.kind == MediaKind::Video {
                self.wait_until_finished(&id, token).await?;
            }
            id
        } else {
            let mut children = Vec::with_capacity(payload.media.len());
            let mut videos = Vec::new();
            for item in &payload.media {
                let id = self
                    .create_container(ig_user, Self::item_form(item, true, token))
                    .await?;
                if item.kind == MediaKind::Video {
                    videos.push(id.clone());
                }
                children.push(id);
            }

            // Children must be FINISHED before a carousel may reference them
            for video in &videos {
                self.wait_until_finished(video, token).await?;
            }

            let form = vec![
                ("media_type", "CAROUSEL".to_string()),
                ("children", children.join(",")),
                ("caption", caption),
                ("access_token", token.to_string()),
            ];
            self.create_container(ig_user, form).await?
        };

        let response = self
            .http
            .post(self.graph.url(&format!("{}/media_publish", ig_user)))
            .form(&[("creation_id", container_id.as_str()), ("access_token", token)])
            .send()
            .await?;
        let published: GraphId = read_json(Platform::Instagram, response).await?;

        // The permalink is a convenience; the post exists either way
        let permalink = match self
            .http
            .get(self.graph.url(&published.id))
            .query(&[("fields", "permalink"), ("access_token", token)])
            .send()
            .await
        {
            Ok(response) => read_json::<Permalink>(Platform::Instagram, response)
                .await
                .ok()
                .and_then(|p| p.permalink),
            Err(_) => None,
        };

        Ok(PublishOutcome::Published {
            platform_post_id: published.id,
            platform_post_url: permalink,
        })
    }
}

fn count_hashtags(text: &str) -> usize {
    text.split_whitespace()
        .filter(|word| word.starts_with('#') && word.len() > 1)
        .count()
}

#[async_trait]
impl PlatformAdapter for InstagramAdapter {
    fn platform(&self) -> Platform {
        Platform::Instagram
    }

    fn validate_payload(&self, payload: &PublishPayload) -> ValidationReport {
        let mut errors = Vec::new();
        let caption = payload.rendered_text();

        if payload.media.is_empty() {
            errors.push("instagram requires at least one image or video".to_string());
        }
        if payload.media.len() > MAX_ITEMS {
            errors.push(format!(
                "instagram accepts at most {} media items, got {}",
                MAX_ITEMS,
                payload.media.len()
            ));
        }
        check_text_length(Platform::Instagram, &caption, TEXT_LIMIT, &mut errors);

        let hashtags = count_hashtags(&caption);
        if hashtags > HASHTAG_LIMIT {
            errors.push(format!(
                "instagram allows at most {} hashtags, got {}",
                HASHTAG_LIMIT, hashtags
            ));
        }
        MEDIA_RULES.check(Platform::Instagram, payload, &mut errors);

        ValidationReport::from_errors(errors)
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> Result<PublishOutcome> {
        finish_steps(self.publish_steps(credentials, payload).await)
    }

    /// Instagram publishes with the linked Page's token, which does not expire
    async fn refresh_token(&self, _credentials: &AccountCredentials) -> Option<TokenSet> {
        None
    }
}
