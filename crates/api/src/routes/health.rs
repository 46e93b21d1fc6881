//! Liveness endpoint with a per-capability view of the dispatch queues.

use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` when the store is unreachable.
    pub status: &'static str,
    pub version: &'static str,
    pub db_healthy: bool,
    pub capabilities: Vec<CapabilityHealth>,
}

/// Registered capability with its limits and current queue occupancy.
#[derive(Serialize)]
pub struct CapabilityHealth {
    pub name: String,
    pub models: Vec<String>,
    pub concurrency_limit: usize,
    pub queue_depth_limit: usize,
    /// Jobs waiting for a dispatch slot.
    pub waiting: usize,
    /// Jobs holding a dispatch slot.
    pub in_flight: usize,
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = sonora_db::health_check(&state.pool).await.is_ok();
    let dispatcher = state.orchestrator.dispatcher();

    let capabilities = state
        .orchestrator
        .registry()
        .capabilities()
        .map(|spec| {
            let stats = dispatcher.stats(&spec.name);
            CapabilityHealth {
                name: spec.name.clone(),
                models: spec.model_names().map(str::to_string).collect(),
                concurrency_limit: spec.concurrency_limit,
                queue_depth_limit: spec.queue_depth_limit,
                waiting: stats.waiting,
                in_flight: stats.in_flight,
            }
        })
        .collect();

    Json(HealthResponse {
        status: if db_healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        capabilities,
    })
}

/// Mounted at the root, outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
