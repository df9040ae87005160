use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use super::{ApiResult, AppState, Owner};
use crate::types::{AccountSummary, Platform};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsResponse {
    pub accounts: Vec<AccountSummary>,
    /// Platforms with a configured OAuth client
    pub connectable: Vec<Platform>,
}

pub async fn list_accounts(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
) -> ApiResult<Json<AccountsResponse>> {
    let registry = state.service.accounts();
    let accounts = registry.list(&owner_id).await?;
    Ok(Json(AccountsResponse {
        accounts,
        connectable: registry.connectable_platforms().into_iter().collect(),
    }))
}

pub async fn disconnect_account(
    State(state): State<AppState>,
    Owner(owner_id): Owner,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.service.accounts().disconnect(&owner_id, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}
