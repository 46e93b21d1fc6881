//! Job execution engine.
//!
//! Contains the background dispatcher that moves queued jobs onto workers
//! within each capability's concurrency limit, the orchestrator that owns
//! intake, cancellation and the credit-gated download, and the handler that
//! applies worker progress reports to job records.

pub mod dispatcher;
pub mod locks;
pub mod orchestrator;
pub mod progress;

use std::sync::Arc;
use std::time::Duration;

use sonora_db::DbPool;
use sonora_events::EventBus;
use sonora_workers::{CapabilityRegistry, WorkerEventReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use dispatcher::Dispatcher;
use locks::JobLocks;
use orchestrator::Orchestrator;

/// Wire the dispatcher and orchestrator around one shared lock table.
pub fn build_orchestrator(
    pool: DbPool,
    registry: Arc<CapabilityRegistry>,
    event_bus: Arc<EventBus>,
    config: DispatchConfig,
) -> Arc<Orchestrator> {
    let locks = Arc::new(JobLocks::new());
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        Arc::clone(&registry),
        Arc::clone(&event_bus),
        Arc::clone(&locks),
        config,
    ));
    Arc::new(Orchestrator::new(pool, registry, dispatcher, event_bus, locks))
}

/// Background tasks of a running engine.
pub struct EngineHandle {
    cancel: CancellationToken,
    dispatcher: JoinHandle<()>,
    worker_events: JoinHandle<()>,
}

/// Recover unfinished jobs, then spawn the dispatcher loop and the worker
/// event handler.
pub async fn start(
    orchestrator: Arc<Orchestrator>,
    worker_events: WorkerEventReceiver,
) -> Result<EngineHandle, sqlx::Error> {
    let cancel = CancellationToken::new();

    orchestrator.dispatcher().recover().await?;

    let dispatcher = tokio::spawn(
        Arc::clone(orchestrator.dispatcher()).run(cancel.child_token()),
    );
    let worker_events = tokio::spawn(
        Arc::clone(&orchestrator).run_worker_events(worker_events, cancel.child_token()),
    );

    Ok(EngineHandle {
        cancel,
        dispatcher,
        worker_events,
    })
}

impl EngineHandle {
    /// Stop both loops, waiting at most `timeout` for each.
    pub async fn shutdown(self, timeout: Duration) {
        self.cancel.cancel();
        if tokio::time::timeout(timeout, self.dispatcher).await.is_err() {
            tracing::warn!("Dispatcher did not stop in time");
        }
        if tokio::time::timeout(timeout, self.worker_events).await.is_err() {
            tracing::warn!("Worker event handler did not stop in time");
        }
    }
}
