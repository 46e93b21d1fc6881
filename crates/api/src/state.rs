use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::orchestrator::Orchestrator;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: sonora_db::DbPool,
    /// Server configuration (read by the auth extractors).
    pub config: Arc<ServerConfig>,
    /// Job intake, cancellation, download and worker callbacks.
    pub orchestrator: Arc<Orchestrator>,
    /// Event bus for platform lifecycle events.
    pub event_bus: Arc<sonora_events::EventBus>,
}
