//! Admin routes. Every handler extracts [`RequireAdmin`](crate::middleware::rbac::RequireAdmin).

use axum::routing::post;
use axum::Router;

use crate::handlers::admin;
use crate::state::AppState;

/// Routes mounted at `/admin`.
///
/// ```text
/// POST   /accounts/{user_id}/credits   -> grant_credits
/// POST   /jobs/{id}/archive            -> archive_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/accounts/{user_id}/credits", post(admin::grant_credits))
        .route("/jobs/{id}/archive", post(admin::archive_job))
}
