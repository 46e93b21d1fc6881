//! Route definitions for the `/jobs` resource.
//!
//! All endpoints require authentication.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                   -> list_jobs
/// POST   /                   -> submit_job
/// GET    /{id}               -> get_job
/// POST   /{id}/cancel        -> cancel_job
/// GET    /{id}/download      -> download_job
/// GET    /{id}/transitions   -> list_transitions
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/download", get(jobs::download_job))
        .route("/{id}/transitions", get(jobs::list_transitions))
}
