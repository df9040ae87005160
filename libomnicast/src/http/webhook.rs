//! Scheduler webhook
//!
//! The queue calls this once a scheduled post is due. A processed delivery is
//! acknowledged with 200 whatever the per-account outcome, so partial
//! failures never trigger redelivery.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde::Serialize;

use super::{ApiResult, AppState};
use crate::publisher::{AccountResult, PublishRun};
use crate::scheduling::SIGNATURE_HEADER;
use crate::types::PostStatus;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookResponse {
    pub success: bool,
    pub post_id: String,
    pub status: PostStatus,
    /// Set when another run owned the post or it was no longer scheduled
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub skipped: bool,
    pub results: Vec<AccountResult>,
}

impl From<PublishRun> for WebhookResponse {
    fn from(run: PublishRun) -> Self {
        match run {
            PublishRun::Completed(report) => Self {
                success: true,
                post_id: report.post_id,
                status: report.status,
                skipped: false,
                results: report.results,
            },
            PublishRun::Skipped { post_id, status } => Self {
                success: true,
                post_id,
                status,
                skipped: true,
                results: Vec::new(),
            },
        }
    }
}

pub async fn scheduler_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let run = state
        .service
        .scheduler()
        .handle_delivery(signature, &body)
        .await?;
    Ok(Json(run.into()))
}
