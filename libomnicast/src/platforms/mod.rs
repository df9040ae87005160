//! Platform adapters
//!
//! Every external platform implements [`PlatformAdapter`]: a pure
//! `validate_payload`, a possibly multi-step `publish`, and a
//! `refresh_token` that never fails loudly. Adapters are selected by
//! platform tag through an [`AdapterFactory`]; adding a platform means one
//! more `Platform` variant and one more adapter.
//!
//! Expected remote failures (4xx/5xx answers) come back as
//! [`PublishOutcome::Rejected`] with a classified [`PublishError`]. Transport
//! failures and anything else unexpected are returned as `Err` and the
//! orchestrator records them as retryable.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use crate::config::PlatformsConfig;
use crate::error::{OmnicastError, PlatformError, Result};
use crate::oauth::TokenSet;
use crate::types::{AccountLink, MediaItem, MediaKind, Platform, PostContent, PublishError};

pub mod facebook;
pub mod instagram;
pub mod linkedin;
pub mod twitter;

// Public so integration tests can drive the orchestrator without network access
pub mod mock;

/// Longest raw response body kept in a log entry
pub const RAW_RESPONSE_LIMIT: usize = 2000;

/// Content resolved for one platform: shared content with that platform's
/// override applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPayload {
    pub platform: Platform,
    pub text: String,
    pub hashtags: Vec<String>,
    pub media: Vec<MediaItem>,
    pub title: Option<String>,
    pub link: Option<String>,
}

impl PublishPayload {
    pub fn build(platform: Platform, content: &PostContent) -> Self {
        let overrides = content.platform_overrides.get(&platform);

        let text = overrides
            .and_then(|o| o.text.clone())
            .unwrap_or_else(|| content.text.clone());
        let hashtags = overrides
            .and_then(|o| o.hashtags.clone())
            .unwrap_or_else(|| content.hashtags.clone());
        let media = overrides
            .and_then(|o| o.media.clone())
            .unwrap_or_else(|| content.media.clone());

        Self {
            platform,
            text,
            hashtags,
            media,
            title: overrides.and_then(|o| o.title.clone()),
            link: overrides.and_then(|o| o.link.clone()),
        }
    }

    /// Hashtags with a single leading `#`, empty ones dropped
    pub fn normalized_hashtags(&self) -> Vec<String> {
        self.hashtags
            .iter()
            .map(|tag| tag.trim().trim_start_matches('#'))
            .filter(|tag| !tag.is_empty())
            .map(|tag| format!("#{}", tag))
            .collect()
    }

    /// The text actually sent: body, blank line, hashtags
    pub fn rendered_text(&self) -> String {
        let body = self.text.trim_end();
        let tags = self.normalized_hashtags();

        match (body.is_empty(), tags.is_empty()) {
            (_, true) => body.to_string(),
            (true, false) => tags.join(" "),
            (false, false) => format!("{}\n\n{}", body, tags.join(" ")),
        }
    }

    pub fn images(&self) -> impl Iterator<Item = &MediaItem> {
        self.media.iter().filter(|m| m.kind == MediaKind::Image)
    }

    pub fn videos(&self) -> impl Iterator<Item = &MediaItem> {
        self.media.iter().filter(|m| m.kind == MediaKind::Video)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn ok() -> Self {
        Self::from_errors(Vec::new())
    }
}

/// Decrypted credentials of one account, alive only for one publish call
#[derive(Debug)]
pub struct AccountCredentials {
    pub account: AccountLink,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Published {
        platform_post_id: String,
        platform_post_url: Option<String>,
    },
    Rejected(PublishError),
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Check platform constraints; no I/O
    fn validate_payload(&self, payload: &PublishPayload) -> ValidationReport;

    async fn publish(
        &self,
        credentials: &AccountCredentials,
        payload: &PublishPayload,
    ) -> Result<PublishOutcome>;

    /// New token material, or `None` when the platform has no refresh flow
    /// or the attempt failed
    async fn refresh_token(&self, credentials: &AccountCredentials) -> Option<TokenSet>;
}

/// Single point that maps a platform tag to its adapter
pub trait AdapterFactory: Send + Sync {
    fn adapter(&self, platform: Platform) -> Arc<dyn PlatformAdapter>;
}

/// Production factory: one HTTP adapter per platform sharing one client
pub struct HttpAdapterFactory {
    twitter: Arc<twitter::TwitterAdapter>,
    linkedin: Arc<linkedin::LinkedInAdapter>,
    facebook: Arc<facebook::FacebookAdapter>,
    instagram: Arc<instagram::InstagramAdapter>,
}

impl HttpAdapterFactory {
    pub fn new(config: &PlatformsConfig) -> Result<Self> {
        let http = build_http_client(config.http_timeout_secs)?;
        let graph = facebook::GraphApi::from_config(config.meta.as_ref());

        Ok(Self {
            twitter: Arc::new(twitter::TwitterAdapter::new(
                http.clone(),
                config.twitter.as_ref(),
            )),
            linkedin: Arc::new(linkedin::LinkedInAdapter::new(
                http.clone(),
                config.linkedin.as_ref(),
            )),
            facebook: Arc::new(facebook::FacebookAdapter::new(http.clone(), graph.clone())),
            instagram: Arc::new(instagram::InstagramAdapter::new(http, graph)),
        })
    }
}

impl AdapterFactory for HttpAdapterFactory {
    fn adapter(&self, platform: Platform) -> Arc<dyn PlatformAdapter> {
        match platform {
            Platform::Twitter => self.twitter.clone(),
            Platform::Linkedin => self.linkedin.clone(),
            Platform::Facebook => self.facebook.clone(),
            Platform::Instagram => self.instagram.clone(),
        }
    }
}

pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(concat!("omnicast/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PlatformError::from(e).into())
}

/// Cut a raw body to [`RAW_RESPONSE_LIMIT`] characters
pub fn truncate_raw(body: &str) -> String {
    match body.char_indices().nth(RAW_RESPONSE_LIMIT) {
        Some((index, _)) => body[..index].to_string(),
        None => body.to_string(),
    }
}

/// Map a non-success HTTP answer to a publish error
pub fn classify_failure(platform: Platform, status: StatusCode, body: &str) -> PublishError {
    let (code, retryable) = match status.as_u16() {
        401 | 403 => (PublishError::AUTH_ERROR, false),
        429 => (PublishError::RATE_LIMITED, true),
        500..=599 => (PublishError::PLATFORM_UNAVAILABLE, true),
        _ => (PublishError::PLATFORM_REJECTED, false),
    };

    PublishError::new(
        code,
        format!("{} answered HTTP {}", platform, status.as_u16()),
        retryable,
    )
    .with_raw_response(truncate_raw(body))
}

/// Failure inside a multi-step publish
///
/// `Rejected` ends the publish with a recorded remote error, `Unexpected`
/// propagates as `Err`.
#[derive(Debug)]
pub(crate) enum StepError {
    Rejected(PublishError),
    Unexpected(OmnicastError),
}

impl From<reqwest::Error> for StepError {
    fn from(error: reqwest::Error) -> Self {
        StepError::Unexpected(PlatformError::from(error).into())
    }
}

impl From<PublishError> for StepError {
    fn from(error: PublishError) -> Self {
        StepError::Rejected(error)
    }
}

pub(crate) type StepResult<T> = std::result::Result<T, StepError>;

pub(crate) fn finish_steps(result: StepResult<PublishOutcome>) -> Result<PublishOutcome> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(StepError::Rejected(error)) => Ok(PublishOutcome::Rejected(error)),
        Err(StepError::Unexpected(error)) => Err(error),
    }
}

/// Pass a successful response through, turn anything else into a rejection
pub(crate) async fn expect_success(
    platform: Platform,
    response: reqwest::Response,
) -> StepResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(StepError::Rejected(classify_failure(platform, status, &body)))
}

/// Decode a JSON answer, treating a malformed body as a rejection
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    platform: Platform,
    response: reqwest::Response,
) -> StepResult<T> {
    let response = expect_success(platform, response).await?;
    let body = response.text().await?;

    serde_json::from_str(&body).map_err(|e| {
        StepError::Rejected(
            PublishError::new(
                PublishError::PLATFORM_REJECTED,
                format!("{} returned an unexpected response: {}", platform, e),
                false,
            )
            .with_raw_response(truncate_raw(&body)),
        )
    })
}

/// Download a pre-uploaded media file
pub(crate) async fn fetch_media(http: &reqwest::Client, item: &MediaItem) -> StepResult<Vec<u8>> {
    let response = http.get(&item.url).send().await.map_err(|e| {
        StepError::Rejected(PublishError::new(
            PublishError::MEDIA_FETCH_FAILED,
            format!("Could not download {}: {}", item.url, e),
            true,
        ))
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(StepError::Rejected(PublishError::new(
            PublishError::MEDIA_FETCH_FAILED,
            format!("Downloading {} returned HTTP {}", item.url, status.as_u16()),
            status.is_server_error(),
        )));
    }

    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

/// Shared media checks: kind counts, mixing and MIME types
pub(crate) struct MediaRules {
    pub max_images: usize,
    pub max_videos: usize,
    pub allow_mixed: bool,
    pub image_types: &'static [&'static str],
    pub video_types: &'static [&'static str],
}

impl MediaRules {
    pub fn check(&self, platform: Platform, payload: &PublishPayload, errors: &mut Vec<String>) {
        let images = payload.images().count();
        let videos = payload.videos().count();

        if images > self.max_images {
            if self.max_images == 0 {
                errors.push(format!("{} does not accept images", platform));
            } else {
                errors.push(format!(
                    "{} accepts at most {} images, got {}",
                    platform, self.max_images, images
                ));
            }
        }
        if videos > self.max_videos {
            if self.max_videos == 0 {
                errors.push(format!("{} does not accept video", platform));
            } else {
                errors.push(format!(
                    "{} accepts at most {} video(s), got {}",
                    platform, self.max_videos, videos
                ));
            }
        }
        if !self.allow_mixed && images > 0 && videos > 0 {
            errors.push(format!("{} cannot mix images and video", platform));
        }

        for item in &payload.media {
            let allowed = match item.kind {
                MediaKind::Image => self.image_types,
                MediaKind::Video => self.video_types,
            };
            if !allowed.is_empty() && !allowed.contains(&item.mime_type.as_str()) {
                errors.push(format!(
                    "{} does not support media type {}",
                    platform, item.mime_type
                ));
            }
        }
    }
}

pub(crate) fn check_text_length(
    platform: Platform,
    text: &str,
    limit: usize,
    errors: &mut Vec<String>,
) {
    let length = text.chars().count();
    if length > limit {
        errors.push(format!(
            "{} text is {} characters, limit is {}",
            platform, length, limit
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PlatformOverride;

    #[test]
    fn test_payload_applies_override() {
        let mut content = PostContent::text("Long form announcement");
        content.hashtags = vec!["launch".to_string()];
        content.platform_overrides.insert(
            Platform::Twitter,
            PlatformOverride {
                text: Some("Short".to_string()),
                ..Default::default()
            },
        );

        let twitter = PublishPayload::build(Platform::Twitter, &content);
        assert_eq!(twitter.text, "Short");
        assert_eq!(twitter.hashtags, vec!["launch".to_string()]);

        let linkedin = PublishPayload::build(Platform::Linkedin, &content);
        assert_eq!(linkedin.text, "Long form announcement");
        assert_eq!(linkedin.title, None);
    }

    #[test]
    fn test_rendered_text_normalizes_hashtags() {
        let mut content = PostContent::text("Hello  ");
        content.hashtags = vec!["#rust".to_string(), "async".to_string(), " ".to_string()];
        let payload = PublishPayload::build(Platform::Facebook, &content);

        assert_eq!(payload.rendered_text(), "Hello\n\n#rust #async");

        content.text = String::new();
        let payload = PublishPayload::build(Platform::Facebook, &content);
        assert_eq!(payload.rendered_text(), "#rust #async");
    }

    #[test]
    fn test_classify_failure() {
        let cases = [
            (401, PublishError::AUTH_ERROR, false),
            (403, PublishError::AUTH_ERROR, false),
            (429, PublishError::RATE_LIMITED, true),
            (503, PublishError::PLATFORM_UNAVAILABLE, true),
            (400, PublishError::PLATFORM_REJECTED, false),
        ];

        for (status, code, retryable) in cases {
            let error = classify_failure(
                Platform::Linkedin,
                StatusCode::from_u16(status).unwrap(),
                "{}",
            );
            assert_eq!(error.code, code, "status {}", status);
            assert_eq!(error.retryable, retryable, "status {}", status);
            assert_eq!(error.raw_response.as_deref(), Some("{}"));
        }
    }

    #[test]
    fn test_truncate_raw_respects_char_boundaries() {
        let body = "é".repeat(RAW_RESPONSE_LIMIT + 10);
        let truncated = truncate_raw(&body);
        assert_eq!(truncated.chars().count(), RAW_RESPONSE_LIMIT);

        assert_eq!(truncate_raw("short"), "short");
    }

    #[test]
    fn test_media_rules_report_every_problem() {
        let rules = MediaRules {
            max_images: 1,
            max_videos: 0,
            allow_mixed: false,
            image_types: &["image/jpeg"],
            video_types: &[],
        };
        let payload = PublishPayload {
            platform: Platform::Linkedin,
            text: "x".to_string(),
            hashtags: vec![],
            media: vec![
                MediaItem::image("https://cdn/a.png", "image/png"),
                MediaItem::image("https://cdn/b.jpg", "image/jpeg"),
                MediaItem::video("https://cdn/c.mp4", "video/mp4"),
            ],
            title: None,
            link: None,
        };

        let mut errors = vec![];
        rules.check(Platform::Linkedin, &payload, &mut errors);

        assert!(errors.iter().any(|e| e.contains("at most 1 images")));
        assert!(errors.iter().any(|e| e.contains("does not accept video")));
        assert!(errors.iter().any(|e| e.contains("cannot mix")));
        assert!(errors.iter().any(|e| e.contains("image/png")));
    }
}
