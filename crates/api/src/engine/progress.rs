//! Worker lifecycle reports: progress, completion and failure.
//!
//! In-process workers deliver [`WorkerEvent`]s over the shared channel,
//! drained by [`Orchestrator::run_worker_events`]; remote workers post the
//! same events to the internal callback routes. Both paths end in
//! [`Orchestrator::handle_worker_event`].

use std::sync::Arc;

use serde_json::json;
use sonora_core::error::CoreError;
use sonora_core::job_events::{EVENT_JOB_COMPLETED, EVENT_JOB_FAILED};
use sonora_db::models::job::JobOutput;
use sonora_db::repositories::JobRepo;
use sonora_events::PlatformEvent;
use sonora_workers::{WorkerEvent, WorkerEventReceiver};
use tokio_util::sync::CancellationToken;

use super::orchestrator::Orchestrator;
use crate::error::AppResult;

impl Orchestrator {
    /// Apply one worker report under the job's lock.
    ///
    /// Returns whether the report changed the job. Reports for jobs that are
    /// no longer `processing` (cancelled, already finished) and reports from
    /// an attempt that has since been retried are ignored.
    pub async fn handle_worker_event(&self, event: &WorkerEvent) -> Result<bool, sqlx::Error> {
        let job_id = event.job_id();
        let attempt = event.attempt();
        let _guard = self.locks.lock(job_id).await;

        let applied = match event {
            WorkerEvent::Progress { percent, .. } => {
                JobRepo::update_progress(&self.pool, job_id, attempt, (*percent).clamp(0, 100))
                    .await?
            }
            WorkerEvent::Completed {
                output_ref,
                output_text,
                duration_secs,
                ..
            } => {
                let output = JobOutput {
                    output_ref,
                    output_text: output_text.as_deref(),
                    duration_secs: *duration_secs,
                };
                let applied = JobRepo::complete(&self.pool, job_id, attempt, &output).await?;
                if applied {
                    self.dispatcher.release(job_id);
                    self.publish_finished(job_id, EVENT_JOB_COMPLETED, json!({
                        "output_ref": output_ref,
                        "duration_secs": duration_secs,
                    }))
                    .await;
                    tracing::info!(job_id = %job_id, output_ref = %output_ref, "Job completed");
                }
                applied
            }
            WorkerEvent::Failed { reason, .. } => {
                let applied = JobRepo::fail(&self.pool, job_id, attempt, reason).await?;
                if applied {
                    self.dispatcher.release(job_id);
                    self.publish_finished(job_id, EVENT_JOB_FAILED, json!({ "error": reason }))
                        .await;
                    tracing::warn!(job_id = %job_id, error = %reason, "Worker reported failure");
                }
                applied
            }
        };

        if !applied {
            tracing::debug!(job_id = %job_id, attempt, ?event, "Worker report ignored");
        }
        Ok(applied)
    }

    /// Report from a remote worker. Unknown jobs are a 404; stale reports
    /// succeed with `applied = false`.
    pub async fn accept_callback(&self, event: WorkerEvent) -> AppResult<bool> {
        let job_id = event.job_id();
        if JobRepo::find_by_id(&self.pool, job_id).await?.is_none() {
            return Err(CoreError::NotFound {
                entity: "Job",
                id: job_id.to_string(),
            }
            .into());
        }
        Ok(self.handle_worker_event(&event).await?)
    }

    /// Drain the in-process worker channel until cancelled or every sender
    /// is gone.
    pub async fn run_worker_events(
        self: Arc<Self>,
        mut events: WorkerEventReceiver,
        cancel: CancellationToken,
    ) {
        tracing::info!("Worker event handler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Worker event handler shutting down");
                    break;
                }
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Worker event channel closed");
                        break;
                    };
                    if let Err(e) = self.handle_worker_event(&event).await {
                        tracing::error!(job_id = %event.job_id(), error = %e, "Failed to apply worker event");
                    }
                }
            }
        }
    }

    async fn publish_finished(
        &self,
        job_id: sonora_core::types::JobId,
        event_type: &str,
        payload: serde_json::Value,
    ) {
        let user_id = JobRepo::find_by_id(&self.pool, job_id)
            .await
            .ok()
            .flatten()
            .map(|job| job.user_id);

        let mut event = PlatformEvent::new(event_type)
            .with_job(job_id)
            .with_payload(payload);
        if let Some(user_id) = user_id {
            event = event.with_user(user_id);
        }
        self.event_bus.publish(event);
    }
}
