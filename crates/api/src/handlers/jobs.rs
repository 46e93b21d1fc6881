//! Handlers for the `/jobs` resource.
//!
//! All endpoints require authentication via [`AuthUser`]. Regular users only
//! see their own jobs; another user's job is reported as not found. Admins
//! can act on any job.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use sonora_core::types::{JobId, Timestamp};
use sonora_db::models::job::{Job, JobListQuery};

use crate::engine::orchestrator::SubmitRequest;
use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// DTOs
// ---------------------------------------------------------------------------

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Deserialize)]
pub struct SubmitJobBody {
    pub capability: String,
    pub model: String,
    pub input_ref: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// Response of `POST /api/v1/jobs`.
#[derive(Debug, Serialize)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub status: &'static str,
    pub queue_saturated: bool,
}

/// Client-facing view of a job.
#[derive(Debug, Serialize)]
pub struct JobView {
    pub job_id: JobId,
    pub user_id: String,
    pub capability: String,
    pub model: String,
    pub input_ref: String,
    pub status: &'static str,
    pub progress: i16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub output_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_text: Option<String>,
    pub parameters: serde_json::Value,
    pub priority: i32,
    pub retry_count: i32,
    pub credits_charged: bool,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub archived_at: Option<Timestamp>,
}

impl From<Job> for JobView {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status().name(),
            output_available: job.output_ref.is_some(),
            user_id: job.user_id,
            capability: job.capability,
            model: job.model_name,
            input_ref: job.input_ref,
            progress: job.progress,
            error: job.error,
            output_text: job.output_text,
            parameters: job.parameters,
            priority: job.priority,
            retry_count: job.retry_count,
            credits_charged: job.credits_charged,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            archived_at: job.archived_at,
        }
    }
}

/// One entry of a job's status history.
#[derive(Debug, Serialize)]
pub struct TransitionView {
    pub from: Option<&'static str>,
    pub to: Option<&'static str>,
    pub reason: Option<String>,
    pub at: Timestamp,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validate and accept a job. Returns 202; processing happens in the
/// background.
pub async fn submit_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<SubmitJobBody>,
) -> AppResult<impl IntoResponse> {
    let submitted = state
        .orchestrator
        .submit(
            &auth.user_id,
            SubmitRequest {
                capability: input.capability,
                model: input.model,
                input_ref: input.input_ref,
                parameters: input.parameters,
            },
        )
        .await?;

    let data = SubmittedJob {
        job_id: submitted.job.id,
        status: submitted.job.status().name(),
        queue_saturated: submitted.queue_saturated,
    };
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data })))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Supports optional `status`, `limit`, `offset` and `include_archived`
/// query parameters.
pub async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<JobListQuery>,
) -> AppResult<impl IntoResponse> {
    let jobs = state.orchestrator.list_jobs(auth.caller(), &params).await?;
    let data: Vec<JobView> = jobs.into_iter().map(JobView::from).collect();
    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.job(auth.caller(), job_id).await?;
    Ok(Json(DataResponse {
        data: JobView::from(job),
    }))
}

/// GET /api/v1/jobs/{id}/transitions
pub async fn list_transitions(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let transitions = state.orchestrator.transitions(auth.caller(), job_id).await?;
    let data: Vec<TransitionView> = transitions
        .into_iter()
        .map(|t| TransitionView {
            from: t.from_status().map(|s| s.name()),
            to: t.to_status().map(|s| s.name()),
            reason: t.reason,
            at: t.created_at,
        })
        .collect();
    Ok(Json(DataResponse { data }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel
///
/// Idempotent: cancelling a finished job returns its current status.
pub async fn cancel_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let job = state.orchestrator.cancel(auth.caller(), job_id).await?;
    Ok(Json(DataResponse {
        data: serde_json::json!({
            "job_id": job.id,
            "status": job.status().name(),
        }),
    }))
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs/{id}/download
///
/// Releases the output reference, debiting the owner's credits on the first
/// successful call.
pub async fn download_job(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
) -> AppResult<impl IntoResponse> {
    let download = state.orchestrator.download(auth.caller(), job_id).await?;
    Ok(Json(DataResponse { data: download }))
}
