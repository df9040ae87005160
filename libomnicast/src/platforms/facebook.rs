//! Facebook Page adapter (Graph API)

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;

use super::{
    check_text_length, finish_steps, read_json, AccountCredentials, MediaRules, PlatformAdapter,
    PublishOutcome, PublishPayload, StepResult, ValidationReport,
};
use crate::config::OAuthClientConfig;
use crate::error::Result;
use crate::oauth::TokenSet;
use crate::types::Platform;

pub const DEFAULT_GRAPH_BASE: &str = "https://graph.facebook.com";
pub const DEFAULT_GRAPH_VERSION: &str = "v19.0";
pub const TEXT_LIMIT: usize = 63206;

const MEDIA_RULES: MediaRules = MediaRules {
    max_images: 10,
    max_videos: 1,
    allow_mixed: false,
    image_types: &["image/jpeg", "image/png", "image/gif", "image/bmp", "image/tiff"],
    video_types: &["video/mp4", "video/quicktime"],
};

/// Versioned Graph API base shared by the Facebook and Instagram adapters
#[derive(Debug, Clone)]
pub struct GraphApi {
    pub base: String,
    pub version: String,
}

impl GraphApi {
    pub fn from_config(config: Option<&OAuthClientConfig>) -> Self {
        Self {
            base: config
                .and_then(|c| c.api_base.clone())
                .unwrap_or_else(|| DEFAULT_GRAPH_BASE.to_string()),
            version: config
                .and_then(|c| c.graph_version.clone())
                .unwrap_or_else(|| DEFAULT_GRAPH_VERSION.to_string()),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base.trim_end_matches('/'),
            self.version,
            path.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct GraphId {
    pub id: String,
}

pub struct FacebookAdapter {
    http: reqwest::Client,
    graph: GraphApi,
}

impl FacebookAdapter {
    pub fn new(http: reqwest::Client, graph: GraphApi) -> Self {
        Self { http, graph }
    }

    async fn post_form(&self, path: &str, form: &[(String, String)]) -> StepResult<GraphId> {
        let response = self
            .http
            .post(self.graph.url(path))
            .form(form)
            .send()
            .await?;
        read_json(Platform::Facebook, response).await
    }

    async fn publish_steps(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> StepResult<PublishOutcome> {
        let token = credentials.access_token.expose_secret().to_string();
        let page_id = &credentials.account.platform_account_id;
        let message = payload.rendered_text();

        let created = if let Some(video) = payload.videos().next() {
            let form = vec![
                ("file_url".to_string(), video.url.clone()),
                ("description".to_string(), message),
                ("access_token".to_string(), token),
            ];
            self.post_form(&format!("{}/videos", page_id), &form).await?
        } else {
            let mut photo_ids = Vec::new();
            for image in payload.images() {
                let form = vec![
                    ("url".to_string(), image.url.clone()),
                    ("published".to_string(), "false".to_string()),
                    ("access_token".to_string(), token.clone()),
                ];
                let photo = self.post_form(&format!("{}/photos", page_id), &form).await?;
                photo_ids.push(photo.id);
            }

            let mut form = vec![("message".to_string(), message)];
            if let Some(link) = &payload.link {
                form.push(("link".to_string(), link.clone()));
            }
            for (index, id) in photo_ids.iter().enumerate() {
                form.push((
                    format!("attached_media[{}]", index),
                    serde_json::json!({ "media_fbid": id }).to_string(),
                ));
            }
            form.push(("access_token".to_string(), token));

            self.post_form(&format!("{}/feed", page_id), &form).await?
        };

        Ok(PublishOutcome::Published {
            platform_post_url: Some(format!("https://www.facebook.com/{}", created.id)),
            platform_post_id: created.id,
        })
    }
}

#[async_trait]
impl PlatformAdapter for FacebookAdapter {
    fn platform(&self) -> Platform {
        Platform::Facebook
    }

    fn validate_payload(&self, payload: &PublishPayload) -> ValidationReport {
        let mut errors = Vec::new();
        let text = payload.rendered_text();

        if text.trim().is_empty() && payload.media.is_empty() && payload.link.is_none() {
            errors.push("facebook requires text, media or a link".to_string());
        }
        check_text_length(Platform::Facebook, &text, TEXT_LIMIT, &mut errors);
        MEDIA_RULES.check(Platform::Facebook, payload, &mut errors);

        ValidationReport::from_errors(errors)
    }

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> Result<PublishOutcome> {
        finish_steps(self.publish_steps(credentials, payload).await)
    }

    /// Page tokens do not expire, so there is nothing to refresh
    async fn refresh_token(&self, _credentials: &AccountCredentials) -> Option<TokenSet> {
        None
    }
}
