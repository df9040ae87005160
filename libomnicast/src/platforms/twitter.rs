//! Twitter/X adapter
//!
//! Media is downloaded from its public URL and re-uploaded through the v1.1
//! upload endpoint, then the tweet is created through API v2.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{
    check_text_length, fetch_media, finish_steps, read_json, AccountCredentials, MediaRules,
    PlatformAdapter, PublishOutcome, PublishPayload, StepResult, ValidationReport,
};
use crate::config::OAuthClientConfig;
use crate::error::Result;
use crate::oauth::{self, ClientAuth, TokenClient, TokenSet};
use crate::types::{MediaKind, Platform};

pub const DEFAULT_UPLOAD_BASE: &str = "https://upload.twitter.com";
pub const TEXT_LIMIT: usize = 280;

const MEDIA_RULES: MediaRules = MediaRules {
    max_images: 4,
    max_videos: 1,
    allow_mixed: false,
    image_types: &["image/jpeg", "image/png", "image/gif", "image/webp"],
    video_types: &["video/mp4"],
};

pub struct TwitterAdapter {
    http: reqwest::Client,
    api_base: String,
    upload_base: String,
    token_client: Option<TokenClient>,
}

#[derive(Debug, Deserialize)]
struct MediaUpload {
    media_id_string: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTweet {
    data: TweetData,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
}

impl TwitterAdapter {
    pub fn new(http: reqwest::Client, config: Option<&OAuthClientConfig>) -> Self {
        Self {
            http,
            api_base: config
                .and_then(|c| c.api_base.clone())
                .unwrap_or_else(|| oauth::twitter::DEFAULT_API_BASE.to_string()),
            upload_base: config
                .and_then(|c| c.upload_base.clone())
                .unwrap_or_else(|| DEFAULT_UPLOAD_BASE.to_string()),
            token_client: config.map(|c| {
                TokenClient::new(c, oauth::twitter::DEFAULT_TOKEN_URL, ClientAuth::Basic)
            }),
        }
    }

    async fn publish_steps(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> StepResult<PublishOutcome> {
        let token = credentials.access_token.expose_secret();

        let mut media_ids = Vec::with_capacity(payload.media.len());
        for item in &payload.media {
            let bytes = fetch_media(&self.http, item).await?;
            let category = match item.kind {
                MediaKind::Image => "tweet_image",
                MediaKind::Video => "tweet_video",
            };

            let response = self
                .http
                .post(format!("{}/1.1/media/upload.json", self.upload_base))
                .bearer_auth(token)
                .form(&[
                    ("media_data", BASE64.encode(&bytes)),
                    ("media_category", category.to_string()),
                ])
                .send()
                .await?;
            let upload: MediaUpload = read_json(Platform::Twitter, response).await?;
            debug!(media_id = %upload.media_id_string, "Uploaded media to Twitter");
            media_ids.push(upload.media_id_string);
        }

        let mut body = json!({ "text": payload.rendered_text() });
        if !media_ids.is_empty() {
            body["media"] = json!({ "media_ids": media_ids });
        }

        let response = self
            .http
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let created: CreatedTweet = read_json(Platform::Twitter, response).await?;

        Ok(PublishOutcome::Published {
            platform_post_url: Some(format!(
                "https://twitter.com/i/web/status/{}",
                created.data.id
            )),
            platform_post_id: created.data.id,
        })
    }
}

#[async_trait]
impl PlatformAdapter for TwitterAdapter {
    fn platform(&self) -> Platform {
        Platform::Twitter
    }

    fn validate_payload(&self, payload: &PublishPayload) -> ValidationReport {
        let mut errors = Vec::new();
        let text = payload.rendered_text();

        if text.trim().is_empty() && payload.media.is_empty() {
            errors.push("twitter requires text or media".to_string());
        }
        check_text_length(Platform::Twitter, &text, TEXT_LIMIT, &mut errors);
        MEDIA_RULES.check(Platform::Twitter, payload, &mut errors);

        ValidationReport::from_errors(errors)
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> Result<PublishOutcome> {
        finish_steps(self.publish_steps(credentials, payload).await)
    }

    async fn refresh_token(&self, credentials: &AccountCredentials) -> Option<TokenSet> {
        let client = self.token_client.as_ref()?;
        let refresh_token = credentials.refresh_token.as_ref()?;

        match client.refresh(&self.http, refresh_token).await {
            Ok(tokens) => Some(tokens),
            Err(e) => {
                warn!(account_id = %credentials.account.id, error = %e, "Twitter token refresh failed");
                None
            }
        }
    }
}
