//! Handlers for the caller's own account.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    /// Defaults to 50, capped at 200.
    pub limit: Option<i64>,
}

/// GET /api/v1/accounts/me
pub async fn get_my_account(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let account = state.orchestrator.account(&auth.user_id).await?;
    Ok(Json(DataResponse { data: account }))
}

/// GET /api/v1/accounts/me/transactions
///
/// Credit history, newest first.
pub async fn list_my_transactions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<TransactionQuery>,
) -> AppResult<impl IntoResponse> {
    let transactions = state
        .orchestrator
        .transactions(&auth.user_id, params.limit)
        .await?;
    Ok(Json(DataResponse { data: transactions }))
}
