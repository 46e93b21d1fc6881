//! Remote worker callbacks, authenticated with the worker token.

use axum::routing::post;
use axum::Router;

use crate::handlers::internal;
use crate::state::AppState;

/// Routes mounted at `/internal`.
///
/// ```text
/// POST   /jobs/{id}/progress   -> report_progress
/// POST   /jobs/{id}/complete   -> report_complete
/// POST   /jobs/{id}/fail       -> report_failure
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{id}/progress", post(internal::report_progress))
        .route("/jobs/{id}/complete", post(internal::report_complete))
        .route("/jobs/{id}/fail", post(internal::report_failure))
}
