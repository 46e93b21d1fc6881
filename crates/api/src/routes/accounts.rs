use axum::routing::get;
use axum::Router;

use crate::handlers::accounts;
use crate::state::AppState;

/// Routes mounted at `/accounts`.
///
/// ```text
/// GET    /me                 -> get_my_account
/// GET    /me/transactions    -> list_my_transactions
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me", get(accounts::get_my_account))
        .route("/me/transactions", get(accounts::list_my_transactions))
}
