pub mod accounts;
pub mod admin;
pub mod health;
pub mod internal;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                                    list, submit (auth required)
/// /jobs/{id}                               get
/// /jobs/{id}/cancel                        cancel (POST, idempotent)
/// /jobs/{id}/download                      credit-gated download
/// /jobs/{id}/transitions                   status history
///
/// /accounts/me                             balance and paid status
/// /accounts/me/transactions                credit history
///
/// /admin/accounts/{user_id}/credits        grant credits (admin only)
/// /admin/jobs/{id}/archive                 archive a finished job (admin only)
///
/// /internal/jobs/{id}/progress             worker callback (worker token)
/// /internal/jobs/{id}/complete             worker callback (worker token)
/// /internal/jobs/{id}/fail                 worker callback (worker token)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/accounts", accounts::router())
        .nest("/admin", admin::router())
        .nest("/internal", internal::router())
}
