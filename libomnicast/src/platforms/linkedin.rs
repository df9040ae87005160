//! LinkedIn adapter (member shares through the UGC API)

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    check_text_length, expect_success, fetch_media, finish_steps, read_json, AccountCredentials,
    MediaRules, PlatformAdapter, PublishOutcome, PublishPayload, StepResult, ValidationReport,
};
use crate::config::OAuthClientConfig;
use crate::error::Result;
use crate::oauth::{self, ClientAuth, TokenClient, TokenSet};
use crate::types::{Platform, PublishError};

pub const TEXT_LIMIT: usize = 3000;

const MEDIA_RULES: MediaRules = MediaRules {
    max_images: 9,
    max_videos: 0,
    allow_mixed: false,
    image_types: &["image/jpeg", "image/png", "image/gif"],
    video_types: &[],
};

const UPLOAD_MECHANISM: &str = "com.linkedin.digitalmedia.uploading.MediaUploadHttpRequest";

pub struct LinkedInAdapter {
    http: reqwest::Client,
    api_base: String,
    token_client: Option<TokenClient>,
}

#[derive(Debug, Deserialize)]
struct RegisterUploadResponse {
    value: RegisteredUpload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisteredUpload {
    asset: String,
    upload_mechanism: Value,
}

impl RegisteredUpload {
    fn upload_url(&self) -> Option<&str> {
        self.upload_mechanism
            .get(UPLOAD_MECHANISM)
            .and_then(|m| m.get("uploadUrl"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct CreatedShare {
    id: Option<String>,
}

impl LinkedInAdapter {
    pub fn new(http: reqwest::Client, config: Option<&OAuthClientConfig>) -> Self {
        Self {
            http,
            api_base: config
                .and_then(|c| c.api_base.clone())
                .unwrap_or_else(|| oauth::linkedin::DEFAULT_API_BASE.to_string()),
            token_client: config.map(|c| {
                TokenClient::new(c, oauth::linkedin::DEFAULT_TOKEN_URL, ClientAuth::Body)
            }),
        }
    }

    async fn upload_image(
        &self,
        token: &str,
        author: &str,
        item: &crate::types::MediaItem,
    ) -> StepResult<String> {
        let register = json!({
            "registerUploadRequest": {
                "recipes": ["urn:li:digitalmediaRecipe:feedshare-image"],
                "owner": author,
                "serviceRelationships": [{
                    "relationshipType": "OWNER",
                    "identifier": "urn:li:userGeneratedContent"
                }]
            }
        });

        let response = self
            .http
            .post(format!("{}/v2/assets?action=registerUpload", self.api_base))
            .bearer_auth(token)
            .json(&register)
            .send()
            .await?;
        let registered: RegisterUploadResponse = read_json(Platform::Linkedin, response).await?;

        let upload_url = registered.value.upload_url().ok_or_else(|| {
            PublishError::new(
                PublishError::PLATFORM_REJECTED,
                "LinkedIn registerUpload returned no upload URL",
                false,
            )
        })?;

        let bytes = fetch_media(&self.http, item).await?;
        let response = self
            .http
            .put(upload_url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, item.mime_type.as_str())
            .body(bytes)
            .send()
            .await?;
        expect_success(Platform::Linkedin, response).await?;

        debug!(asset = %registered.value.asset, "Uploaded image to LinkedIn");
        Ok(registered.value.asset)
    }

    async fn publish_steps(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> StepResult<PublishOutcome> {
        let token = credentials.access_token.expose_secret();
        let author = format!("urn:li:person:{}", credentials.account.platform_account_id);

        let mut assets = Vec::new();
        for item in payload.images() {
            assets.push(self.upload_image(token, &author, item).await?);
        }

        let (category, media) = if !assets.is_empty() {
            let media: Vec<Value> = assets
                .iter()
                .map(|asset| json!({ "status": "READY", "media": asset }))
                .collect();
            ("IMAGE", media)
        } else if let Some(link) = &payload.link {
            let mut article = json!({ "status": "READY", "originalUrl": link });
            if let Some(title) = &payload.title {
                article["title"] = json!({ "text": title });
            }
            ("ARTICLE", vec![article])
        } else {
            ("NONE", Vec::new())
        };

        let mut share_content = json!({
            "shareCommentary": { "text": payload.rendered_text() },
            "shareMediaCategory": category,
        });
        if !media.is_empty() {
            share_content["media"] = Value::Array(media);
        }

        let body = json!({
            "author": author,
            "lifecycleState": "PUBLISHED",
            "specificContent": { "com.linkedin.ugc.ShareContent": share_content },
            "visibility": { "com.linkedin.ugc.MemberNetworkVisibility": "PUBLIC" },
        });

        let response = self
            .http
            .post(format!("{}/v2/ugcPosts", self.api_base))
            .bearer_auth(token)
            .header("X-Restli-Protocol-Version", "2.0.0")
            .json(&body)
            .send()
            .await?;
        let response = expect_success(Platform::Linkedin, response).await?;

        let header_id = response
            .headers()
            .get("x-restli-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body_id = response
            .json::<CreatedShare>()
            .await
            .ok()
            .and_then(|share| share.id);

        let id = header_id.or(body_id).ok_or_else(|| {
            PublishError::new(
                PublishError::PLATFORM_REJECTED,
                "LinkedIn accepted the share but returned no id",
                false,
            )
        })?;

        Ok(PublishOutcome::Published {
            platform_post_url: Some(format!("https://www.linkedin.com/feed/update/{}", id)),
            platform_post_id: id,
        })
    }
}

#[async_trait]
impl PlatformAdapter for LinkedInAdapter {
    fn platform(&self) -> Platform {
        Platform::Linkedin
    }

    fn validate_payload(&self, payload: &PublishPayload) -> ValidationReport {
        let mut errors = Vec::new();
        let text = payload.rendered_text();

        if text.trim().is_empty() && payload.media.is_empty() && payload.link.is_none() {
            errors.push("linkedin requires text, media or a link".to_string());
        }
        check_text_length(Platform::Linkedin, &text, TEXT_LIMIT, &mut errors);
        MEDIA_RULES.check(Platform::Linkedin, payload, &mut errors);

        if payload.link.is_some() && payload.title.as_deref().map_or(true, |t| t.trim().is_empty())
        {
            errors.push("linkedin link shares require a title".to_string());
        }

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
                warn!(account_id = %credentials.account.id, error = %e, "LinkedIn token refresh failed");
                None
            }
        }
    }
}
