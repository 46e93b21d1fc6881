//! Admin-only handlers.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use sonora_core::types::JobId;
use sonora_db::models::credit_transaction::GrantCredits;

use crate::error::AppResult;
use crate::handlers::jobs::JobView;
use crate::middleware::rbac::RequireAdmin;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/admin/accounts/{user_id}/credits
///
/// Add credit minutes to an account (e.g. after a payment settles).
pub async fn grant_credits(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(input): Json<GrantCredits>,
) -> AppResult<impl IntoResponse> {
    let account = state
        .orchestrator
        .grant_credits(&user_id, input.minutes, input.reason.as_deref())
        .await?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %user_id,
        minutes = input.minutes,
        "Admin granted credits",
    );

    Ok(Json(DataResponse { data: account }))
}

/// POST /api/v1/admin/jobs/{id}/archive
pub async fn archive_job(
    RequireAdmin(_admin): RequireAdmin,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.archive(job_id).await?;
    Ok(Json(DataResponse {
        data: JobView::from(job),
    }))
}
