//! Core types for Omnicast

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::OmnicastError;
use crate::vault::EncryptedSecret;

/// External publishing platforms an account can be linked to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitter,
    Linkedin,
    Facebook,
    Instagram,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Twitter,
        Platform::Linkedin,
        Platform::Facebook,
        Platform::Instagram,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitter => "twitter",
            Platform::Linkedin => "linkedin",
            Platform::Facebook => "facebook",
            Platform::Instagram => "instagram",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = OmnicastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "twitter" | "x" => Ok(Platform::Twitter),
            "linkedin" => Ok(Platform::Linkedin),
            "facebook" => Ok(Platform::Facebook),
            "instagram" => Ok(Platform::Instagram),
            other => Err(OmnicastError::InvalidInput(format!(
                "Unknown platform: '{}'",
                other
            ))),
        }
    }
}

/// Lifecycle of a post
///
/// ```text
/// draft ──► scheduled ──► publishing ──► completed | partial | failed
///   └────────────────────────►┘                        │
///                             ◄──── explicit retry ────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    Draft,
    Scheduled,
    Publishing,
    Completed,
    Partial,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Scheduled => "scheduled",
            PostStatus::Publishing => "publishing",
            PostStatus::Completed => "completed",
            PostStatus::Partial => "partial",
            PostStatus::Failed => "failed",
        }
    }

    /// Terminal states of a single publish run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PostStatus::Completed | PostStatus::Partial | PostStatus::Failed
        )
    }

    /// Whether content and targets may still be edited
    pub fn is_editable(&self) -> bool {
        matches!(self, PostStatus::Draft | PostStatus::Scheduled)
    }

    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        use PostStatus::*;
        matches!(
            (self, next),
            (Draft, Scheduled)
                | (Draft, Publishing)
                | (Scheduled, Draft)
                | (Scheduled, Scheduled)
                | (Scheduled, Publishing)
                | (Publishing, Completed)
                | (Publishing, Partial)
                | (Publishing, Failed)
                | (Partial, Publishing)
                | (Failed, Publishing)
        )
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PostStatus {
    type Err = OmnicastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(PostStatus::Draft),
            "scheduled" => Ok(PostStatus::Scheduled),
            "publishing" => Ok(PostStatus::Publishing),
            "completed" => Ok(PostStatus::Completed),
            "partial" => Ok(PostStatus::Partial),
            "failed" => Ok(PostStatus::Failed),
            other => Err(OmnicastError::InvalidInput(format!(
                "Unknown post status: '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// A pre-uploaded media reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaItem {
    pub url: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub mime_type: String,
}

impl MediaItem {
    pub fn image(url: &str, mime_type: &str) -> Self {
        Self {
            url: url.to_string(),
            kind: MediaKind::Image,
            mime_type: mime_type.to_string(),
        }
    }

    pub fn video(url: &str, mime_type: &str) -> Self {
        Self {
            url: url.to_string(),
            kind: MediaKind::Video,
            mime_type: mime_type.to_string(),
        }
    }
}

/// Per-platform replacements applied on top of the shared content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Vec<MediaItem>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostContent {
    pub text: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub media: Vec<MediaItem>,
    #[serde(default)]
    pub platform_overrides: HashMap<Platform, PlatformOverride>,
}

impl PostContent {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub owner_id: String,
    pub content: PostContent,
    pub target_platforms: BTreeSet<Platform>,
    pub target_account_ids: BTreeSet<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<i64>,
    pub published_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Post {
    /// Create a draft targeting the given accounts
    pub fn new(
        owner_id: &str,
        content: PostContent,
        target_platforms: BTreeSet<Platform>,
        target_account_ids: BTreeSet<String>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            content,
            target_platforms,
            target_account_ids,
            status: PostStatus::Draft,
            scheduled_at: None,
            published_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Expired,
    Revoked,
    Error,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Active => "active",
            AccountStatus::Expired => "expired",
            AccountStatus::Revoked => "revoked",
            AccountStatus::Error => "error",
        }
    }
}

impl FromStr for AccountStatus {
    type Err = OmnicastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "expired" => Ok(AccountStatus::Expired),
            "revoked" => Ok(AccountStatus::Revoked),
            "error" => Ok(AccountStatus::Error),
            other => Err(OmnicastError::InvalidInput(format!(
                "Unknown account status: '{}'",
                other
            ))),
        }
    }
}

/// Stored binding between one external platform identity and one owner
///
/// Token fields only ever hold vault output; plaintext never reaches this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountLink {
    pub id: String,
    pub owner_id: String,
    pub platform: Platform,
    pub platform_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub access_token: EncryptedSecret,
    pub refresh_token: Option<EncryptedSecret>,
    pub token_expires_at: Option<i64>,
    pub scopes: BTreeSet<String>,
    pub status: AccountStatus,
    pub last_error: Option<String>,
    pub connected_at: i64,
    pub updated_at: i64,
}

/// Public projection of an [`AccountLink`] with no credential material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub id: String,
    pub platform: Platform,
    pub platform_account_id: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
    pub token_expires_at: Option<i64>,
    pub scopes: BTreeSet<String>,
    pub status: AccountStatus,
    pub last_error: Option<String>,
    pub connected_at: i64,
}

impl From<&AccountLink> for AccountSummary {
    fn from(link: &AccountLink) -> Self {
        Self {
            id: link.id.clone(),
            platform: link.platform,
            platform_account_id: link.platform_account_id.clone(),
            display_name: link.display_name.clone(),
            avatar_url: link.avatar_url.clone(),
            token_expires_at: link.token_expires_at,
            scopes: link.scopes.clone(),
            status: link.status,
            last_error: link.last_error.clone(),
            connected_at: link.connected_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl FromStr for JobStatus {
    type Err = OmnicastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(OmnicastError::InvalidInput(format!(
                "Unknown job status: '{}'",
                other
            ))),
        }
    }
}

/// Deferred publish of one post; at most one per post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: String,
    pub post_id: String,
    pub owner_id: String,
    pub scheduled_at: i64,
    pub status: JobStatus,
    pub queue_message_id: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub error: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Publishing,
    Published,
    Failed,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Publishing => "publishing",
            LogStatus::Published => "published",
            LogStatus::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = OmnicastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LogStatus::Pending),
            "publishing" => Ok(LogStatus::Publishing),
            "published" => Ok(LogStatus::Published),
            "failed" => Ok(LogStatus::Failed),
            other => Err(OmnicastError::InvalidInput(format!(
                "Unknown log status: '{}'",
                other
            ))),
        }
    }
}

/// Structured remote failure reported by an adapter or the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishError {
    pub code: String,
    pub message: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_response: Option<String>,
}

impl PublishError {
    pub const VALIDATION_ERROR: &'static str = "VALIDATION_ERROR";
    pub const CREDENTIAL_ERROR: &'static str = "CREDENTIAL_ERROR";
    pub const AUTH_ERROR: &'static str = "AUTH_ERROR";
    pub const RATE_LIMITED: &'static str = "RATE_LIMITED";
    pub const PLATFORM_UNAVAILABLE: &'static str = "PLATFORM_UNAVAILABLE";
    pub const PLATFORM_REJECTED: &'static str = "PLATFORM_REJECTED";
    pub const MEDIA_FETCH_FAILED: &'static str = "MEDIA_FETCH_FAILED";
    pub const UNEXPECTED_ERROR: &'static str = "UNEXPECTED_ERROR";

    pub fn new(code: &str, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            retryable,
            raw_response: None,
        }
    }

    pub fn with_raw_response(mut self, raw: impl Into<String>) -> Self {
        self.raw_response = Some(raw.into());
        self
    }
}

/// Append-only audit record of one publish attempt for one account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishLogEntry {
    pub id: Option<i64>,
    pub post_id: String,
    pub account_id: String,
    pub platform: Platform,
    pub status: LogStatus,
    pub platform_post_id: Option<String>,
    pub platform_post_url: Option<String>,
    pub error: Option<PublishError>,
    pub attempts: u32,
    pub last_attempt_at: Option<i64>,
    pub published_at: Option<i64>,
    pub created_at: i64,
}
