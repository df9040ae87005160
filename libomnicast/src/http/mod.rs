//! HTTP surface
//!
//! Routes for OAuth account linking, the scheduler webhook and the post and
//! account API. Callers sit behind an authenticating gateway that forwards
//! the owner id in a header (`server.owner_header`).

pub mod accounts;
pub mod oauth;
pub mod posts;
pub mod webhook;

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

use crate::error::OmnicastError;
use crate::service::OmnicastService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<OmnicastService>,
}

impl AppState {
    pub fn new(service: OmnicastService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/oauth/{platform}", get(oauth::oauth_flow))
        .route("/api/webhooks/scheduler", post(webhook::scheduler_webhook))
        .route("/api/accounts", get(accounts::list_accounts))
        .route("/api/accounts/{id}", delete(accounts::disconnect_account))
        .route("/api/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/api/posts/{id}",
            get(posts::get_post)
                .patch(posts::update_post)
                .delete(posts::delete_post),
        )
        .route("/api/posts/{id}/publish", post(posts::publish_post))
        .route(
            "/api/posts/{id}/schedule",
            post(posts::schedule_post).delete(posts::unschedule_post),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Owner id forwarded by the gateway
#[derive(Debug, Clone)]
pub struct Owner(pub String);

impl FromRequestParts<AppState> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = &state.service.config().server.owner_header;
        parts
            .headers
            .get(header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| Owner(value.to_string()))
            .ok_or_else(|| {
                ApiError(OmnicastError::Authentication(
                    "no authenticated owner".to_string(),
                ))
            })
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// `OmnicastError` rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub OmnicastError);

impl<E> From<E> for ApiError
where
    E: Into<OmnicastError>,
{
    fn from(error: E) -> Self {
        ApiError(error.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            OmnicastError::NotFound(_) => StatusCode::NOT_FOUND,
            OmnicastError::Authentication(_) | OmnicastError::Signature(_) => {
                StatusCode::UNAUTHORIZED
            }
            OmnicastError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OmnicastError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "Request failed");
        }

        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
