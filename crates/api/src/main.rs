use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sonora_api::config::{DispatchConfig, ServerConfig};
use sonora_api::engine;
use sonora_api::router::build_app_router;
use sonora_api::state::AppState;
use sonora_workers::{InMemoryStorage, RegistryConfig, WorkerContext};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sonora_api=debug,sonora_workers=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    // --- Configuration ---
    let config = ServerConfig::from_env()?;
    let dispatch_config = DispatchConfig::from_env()?;
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = sonora_db::create_pool(&config.database_url).await?;
    tracing::info!("Database connection pool created");

    sonora_db::health_check(&pool).await?;
    tracing::info!("Database health check passed");

    sonora_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(sonora_events::EventBus::default());

    // --- Capability registry ---
    let (worker_events_tx, worker_events_rx) = sonora_workers::event_channel();
    let worker_ctx = WorkerContext {
        events: worker_events_tx,
        storage: Arc::new(InMemoryStorage::new()),
        callback_base_url: config.public_base_url.clone(),
    };
    let registry = RegistryConfig::load_or_builtin(config.capabilities_file.as_deref())?
        .build_registry(&worker_ctx)?;
    // Only the workers keep senders alive from here on.
    drop(worker_ctx);

    // --- Engine ---
    let orchestrator = engine::build_orchestrator(
        pool.clone(),
        Arc::new(registry),
        Arc::clone(&event_bus),
        dispatch_config,
    );
    let engine_handle = engine::start(Arc::clone(&orchestrator), worker_events_rx).await?;
    tracing::info!("Job engine started");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        orchestrator,
        event_bus,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    engine_handle
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM to initiate graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
