//! Callbacks from remote workers.
//!
//! Authenticated with the shared worker token ([`WorkerAuth`]), not a user
//! JWT. Each callback is turned into a [`WorkerEvent`] and applied exactly
//! like a report from an in-process worker.
//!
//! Every body names the `attempt` it reports on, as received in the submit
//! request; reports for a superseded attempt are accepted but not applied.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use sonora_core::billing::{is_valid_output_duration, MAX_OUTPUT_DURATION_SECS};
use sonora_core::types::JobId;
use sonora_workers::WorkerEvent;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::WorkerAuth;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProgressBody {
    pub attempt: i32,
    pub percent: i16,
}

#[derive(Debug, Deserialize)]
pub struct CompleteBody {
    pub attempt: i32,
    pub output_ref: String,
    #[serde(default)]
    pub output_text: Option<String>,
    pub duration_secs: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct FailBody {
    pub attempt: i32,
    pub reason: String,
}

async fn apply(state: &AppState, event: WorkerEvent) -> AppResult<impl IntoResponse> {
    let applied = state.orchestrator.accept_callback(event).await?;
    Ok(Json(DataResponse {
        data: serde_json::json!({ "applied": applied }),
    }))
}

/// POST /api/v1/internal/jobs/{id}/progress
pub async fn report_progress(
    _worker: WorkerAuth,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<ProgressBody>,
) -> AppResult<impl IntoResponse> {
    apply(
        &state,
        WorkerEvent::Progress {
            job_id,
            attempt: body.attempt,
            percent: body.percent,
        },
    )
    .await
}

/// POST /api/v1/internal/jobs/{id}/complete
pub async fn report_complete(
    _worker: WorkerAuth,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<CompleteBody>,
) -> AppResult<impl IntoResponse> {
    if body.output_ref.trim().is_empty() {
        return Err(AppError::BadRequest("output_ref must not be empty".into()));
    }
    if let Some(secs) = body.duration_secs.filter(|&secs| !is_valid_output_duration(secs)) {
        return Err(AppError::BadRequest(format!(
            "duration_secs must be between 0 and {MAX_OUTPUT_DURATION_SECS}, got {secs}"
        )));
    }
    apply(
        &state,
        WorkerEvent::Completed {
            job_id,
            attempt: body.attempt,
            output_ref: body.output_ref,
            output_text: body.output_text,
            duration_secs: body.duration_secs,
        },
    )
    .await
}

/// POST /api/v1/internal/jobs/{id}/fail
pub async fn report_failure(
    _worker: WorkerAuth,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(body): Json<FailBody>,
) -> AppResult<impl IntoResponse> {
    apply(
        &state,
        WorkerEvent::Failed {
            job_id,
            attempt: body.attempt,
            reason: body.reason,
        },
    )
    .await
}
