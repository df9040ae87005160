//! OAuth connect routes
//!
//! `GET /api/oauth/{platform}?initiate=true` starts a flow;
//! the provider calls the same route back with `code` and `state` (or
//! `error`). Starting a flow needs the owner header. Callbacks always end in
//! a redirect to the accounts page and always clear the flow cookies, even
//! when the owner header is missing.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::Deserialize;
use std::str::FromStr;
use tracing::warn;

use super::{ApiError, ApiResult, AppState, Owner};
use crate::accounts::{
    CallbackError, CallbackOutcome, CallbackParams, STATE_COOKIE, STATE_TTL_SECS, VERIFIER_COOKIE,
};
use crate::types::Platform;

#[derive(Debug, Default, Deserialize)]
pub struct OAuthQuery {
    pub initiate: Option<String>,
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl OAuthQuery {
    fn is_initiate(&self) -> bool {
        matches!(self.initiate.as_deref(), Some("true") | Some("1"))
    }
}

fn flow_cookie(name: &'static str, value: String, path: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .path(path.to_string())
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::seconds(STATE_TTL_SECS))
        .build()
}

fn removal_cookie(name: &'static str, path: &str, secure: bool) -> Cookie<'static> {
    Cookie::build((name, ""))
        .path(path.to_string())
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(time::Duration::ZERO)
        .build()
}

fn found(location: String) -> (StatusCode, [(header::HeaderName, String); 1]) {
    (StatusCode::FOUND, [(header::LOCATION, location)])
}

pub async fn oauth_flow(
    State(state): State<AppState>,
    Path(platform): Path<String>,
    owner: Result<Owner, ApiError>,
    Query(query): Query<OAuthQuery>,
    jar: CookieJar,
) -> ApiResult<Response> {
    if query.is_initiate() {
        let Owner(owner_id) = owner?;
        initiate(state, &platform, &owner_id, jar)
    } else {
        let owner_id = owner.ok().map(|Owner(id)| id);
        Ok(callback(state, &platform, owner_id.as_deref(), query, jar).await)
    }
}

fn initiate(state: AppState, platform: &str, owner_id: &str, jar: CookieJar) -> ApiResult<Response> {
    let platform = Platform::from_str(platform)?;
    let now = chrono::Utc::now().timestamp();
    let initiation = state.service.accounts().initiate(owner_id, platform, now)?;
    let secure = state.service.config().server.secure_cookies;

    let mut jar = jar.add(flow_cookie(
        STATE_COOKIE,
        initiation.state_cookie,
        &initiation.cookie_path,
        secure,
    ));
    if let Some(verifier) = initiation.code_verifier {
        jar = jar.add(flow_cookie(
            VERIFIER_COOKIE,
            verifier,
            &initiation.cookie_path,
            secure,
        ));
    }

    Ok((jar, found(initiation.redirect_url)).into_response())
}

async fn callback(
    state: AppState,
    platform: &str,
    owner_id: Option<&str>,
    query: OAuthQuery,
    jar: CookieJar,
) -> Response {
    let config = state.service.config();
    let secure = config.server.secure_cookies;
    let accounts_page = config.server.accounts_page.clone();

    let (cookie_path, outcome) = match (Platform::from_str(platform), owner_id) {
        (Ok(platform), None) => {
            warn!(platform = %platform, "OAuth callback without an authenticated owner");
            (
                state.service.accounts().callback_cookie_path(platform),
                CallbackOutcome::Failed(CallbackError::Unauthenticated),
            )
        }
        (Ok(platform), Some(owner_id)) => {
            let params = CallbackParams {
                code: query.code,
                state: query.state,
                error: query.error,
            };
            let state_cookie = jar.get(STATE_COOKIE).map(|c| c.value().to_string());
            let verifier = jar.get(VERIFIER_COOKIE).map(|c| c.value().to_string());
            let now = chrono::Utc::now().timestamp();

            let outcome = state
                .service
                .accounts()
                .complete(
                    owner_id,
                    platform,
                    &params,
                    state_cookie.as_deref(),
                    verifier.as_deref(),
                    now,
                )
                .await;
            (state.service.accounts().callback_cookie_path(platform), outcome)
        }
        (Err(e), _) => {
            warn!(platform, error = %e, "OAuth callback for unknown platform");
            (
                format!("/api/oauth/{}", platform),
                CallbackOutcome::Failed(CallbackError::UnsupportedPlatform),
            )
        }
    };

    let jar = jar
        .add(removal_cookie(STATE_COOKIE, &cookie_path, secure))
        .add(removal_cookie(VERIFIER_COOKIE, &cookie_path, secure));

    (jar, found(outcome.redirect_url(&accounts_page))).into_response()
}
