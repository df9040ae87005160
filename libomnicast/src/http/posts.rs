//! Post API
//!
//! Posts of other owners answer 404. The publish route returns the aggregate
//! a composing client shows: overall success, final status, per-account
//! results and a platform→message map of failures.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use super::{ApiResult, AppState, Owner};
use crate::error::OmnicastError;
use crate::publisher::{AccountResult, PublishReport, PublishRun};
use crate::service::posts::{NewPost, PostDetail, PostUpdate};
use crate::types::{Post, PostStatus, ScheduledJob};

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PublishQuery {
    #[serde(default)]
    pub retry: bool,
    /// `false` answers 202 right away and leaves the run going
    pub wait: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub scheduled_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub success: bool,
    pub post_id: String,
    pub status: PostStatus,
    pub results: Vec<AccountResult>,
    pub errors: BTreeMap<String, String>,
}

impl From<PublishReport> for PublishResponse {
    fn from(report: PublishReport) -> Self {
        Self {
            success: report.success(),
            errors: report.errors(),
            post_id: report.post_id,
            status: report.status,
            results: report.results,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    accepted: bool,
    post_id: String,
}

pub async fn list_posts(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Post>>> {
    let status = query
        .status
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(PostStatus::from_str)
        .transpose()?;
    Ok(Json(state.service.posts().list(&owner_id, status).await?))
}

pub async fn create_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Json(request): Json<NewPost>,
) -> ApiResult<(StatusCode, Json<Post>)> {
    let post = state.service.posts().create(&owner_id, request).await?;
    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn get_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> ApiResult<Json<PostDetail>> {
    Ok(Json(state.service.posts().get(&owner_id, &id).await?))
}

pub async fn update_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
    Json(update): Json<PostUpdate>,
) -> ApiResult<Json<Post>> {
    Ok(Json(state.service.posts().update(&owner_id, &id, update).await?))
}

pub async fn delete_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.posts().delete(&owner_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn publish_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
    Query(query): Query<PublishQuery>,
) -> ApiResult<Response> {
    let task = state
        .service
        .posts()
        .publish(&owner_id, &id, query.retry)
        .await?;

    if query.wait == Some(false) {
        task.detach();
        let body = Accepted {
            accepted: true,
            post_id: id,
        };
        return Ok((StatusCode::ACCEPTED, Json(body)).into_response());
    }

    match task.wait().await? {
        PublishRun::Completed(report) => Ok(Json(PublishResponse::from(report)).into_response()),
        PublishRun::Skipped { post_id, status } => Err(OmnicastError::Conflict(format!(
            "post {} is {} and cannot be published by this request",
            post_id, status
        ))
        .into()),
    }
}

pub async fn schedule_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<Json<ScheduledJob>> {
    let job = state
        .service
        .posts()
        .schedule(&owner_id, &id, request.scheduled_at)
        .await?;
    Ok(Json(job))
}

pub async fn unschedule_post(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.posts().unschedule(&owner_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
