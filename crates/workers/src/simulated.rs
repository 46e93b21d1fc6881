//! In-process worker that fakes inference.
//!
//! Acknowledges immediately, then reports progress in even steps from a
//! spawned task and finishes by uploading a small synthetic artifact to
//! the storage gateway. Speech-to-text jobs also return a synthetic
//! transcript. Used for local development and tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sonora_core::billing::{SECONDS_PER_MINUTE, TEXT_CHARS_PER_MINUTE};
use sonora_core::types::JobId;
use tokio_util::sync::CancellationToken;

use crate::contract::{CapabilityWorker, SubmitAck, WorkerError, WorkerEvent, WorkerEventSender, WorkerJob};
use crate::storage::StorageGateway;

/// Output duration reported when the parameters give no hint.
const DEFAULT_OUTPUT_SECS: i64 = 60;

/// Capability whose results include a transcript.
const TRANSCRIBE_CAPABILITY: &str = "stt";

/// The attempt currently simulated for a job.
struct Running {
    attempt: i32,
    token: CancellationToken,
}

type RunningMap = HashMap<JobId, Running>;

pub struct SimulatedWorker {
    events: WorkerEventSender,
    storage: Arc<dyn StorageGateway>,
    step_delay: Duration,
    steps: u8,
    running: Arc<Mutex<RunningMap>>,
}

impl SimulatedWorker {
    pub fn new(
        events: WorkerEventSender,
        storage: Arc<dyn StorageGateway>,
        step_delay: Duration,
        steps: u8,
    ) -> Self {
        Self {
            events,
            storage,
            step_delay,
            steps: steps.max(1),
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of jobs currently being simulated.
    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }
}

fn lock(running: &Mutex<RunningMap>) -> std::sync::MutexGuard<'_, RunningMap> {
    running.lock().unwrap_or_else(|e| e.into_inner())
}

/// Media length the simulated output pretends to have.
fn simulated_duration_secs(parameters: &serde_json::Value) -> i64 {
    if let Some(secs) = parameters.get("duration_secs").and_then(|v| v.as_i64()) {
        return secs.max(1);
    }
    if let Some(text) = parameters.get("text").and_then(|v| v.as_str()) {
        let chars = text.chars().count() as i64;
        return (chars * SECONDS_PER_MINUTE / TEXT_CHARS_PER_MINUTE).max(1);
    }
    DEFAULT_OUTPUT_SECS
}

#[async_trait]
impl CapabilityWorker for SimulatedWorker {
    fn kind(&self) -> &'static str {
        "simulated"
    }

    async fn submit(&self, job: &WorkerJob) -> Result<SubmitAck, WorkerError> {
        if self.events.is_closed() {
            return Err(WorkerError::Transient("event channel closed".to_string()));
        }

        let worker_ref = format!("sim-{}-{}", job.job_id, job.attempt);
        let token = CancellationToken::new();
        let replaced = lock(&self.running).insert(
            job.job_id,
            Running {
                attempt: job.attempt,
                token: token.clone(),
            },
        );
        // A resubmission supersedes whatever attempt was still running.
        if let Some(previous) = replaced {
            previous.token.cancel();
        }

        let job = job.clone();
        let events = self.events.clone();
        let storage = Arc::clone(&self.storage);
        let running = Arc::clone(&self.running);
        let step_delay = self.step_delay;
        let steps = self.steps;

        tokio::spawn(async move {
            let outcome = run_simulation(&job, &events, storage.as_ref(), &token, step_delay, steps)
                .await;
            {
                let mut running = lock(&running);
                if running.get(&job.job_id).is_some_and(|r| r.attempt == job.attempt) {
                    running.remove(&job.job_id);
                }
            }

            if let Some(event) = outcome {
                if events.send(event).await.is_err() {
                    tracing::warn!(job_id = %job.job_id, "Worker event channel closed");
                }
            }
        });

        Ok(SubmitAck {
            worker_ref: Some(worker_ref),
        })
    }

    async fn abort(&self, job_id: JobId) {
        if let Some(running) = lock(&self.running).remove(&job_id) {
            running.token.cancel();
            tracing::debug!(job_id = %job_id, attempt = running.attempt, "Simulated job aborted");
        }
    }
}

/// Drive one job. Returns the terminal event, or `None` if aborted.
async fn run_simulation(
    job: &WorkerJob,
    events: &WorkerEventSender,
    storage: &dyn StorageGateway,
    token: &CancellationToken,
    step_delay: Duration,
    steps: u8,
) -> Option<WorkerEvent> {
    for step in 1..steps {
        tokio::select! {
            _ = token.cancelled() => return None,
            _ = tokio::time::sleep(step_delay) => {}
        }
        let percent = (i16::from(step) * 100) / i16::from(steps);
        let _ = events
            .send(WorkerEvent::Progress {
                job_id: job.job_id,
                attempt: job.attempt,
                percent,
            })
            .await;
    }

    tokio::select! {
        _ = token.cancelled() => return None,
        _ = tokio::time::sleep(step_delay) => {}
    }

    // Input references are opaque; a missing object is treated as empty input.
    let input_len = storage
        .download(&job.input_ref)
        .await
        .map(|bytes| bytes.len())
        .unwrap_or(0);
    let artifact = format!(
        "{}:{}:{}:{input_len}",
        job.capability, job.model, job.input_ref
    );

    let transcript = (job.capability == TRANSCRIBE_CAPABILITY).then(|| {
        format!("[{}] transcript of {} ({input_len} bytes)", job.model, job.input_ref)
    });

    match storage.upload(artifact.into_bytes()).await {
        Ok(output_ref) => Some(WorkerEvent::Completed {
            job_id: job.job_id,
            attempt: job.attempt,
            output_ref,
            output_text: transcript,
            duration_secs: Some(simulated_duration_secs(&job.parameters)),
        }),
        Err(e) => Some(WorkerEvent::Failed {
            job_id: job.job_id,
            attempt: job.attempt,
            reason: format!("output upload failed: {e}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::event_channel;
    use crate::storage::InMemoryStorage;
    use serde_json::json;

    fn job(parameters: serde_json::Value) -> WorkerJob {
        WorkerJob {
            job_id: JobId::now_v7(),
            attempt: 1,
            capability: "tts".into(),
            model: "aurora-v1".into(),
            input_ref: "mem://in".into(),
            parameters,
        }
    }

    #[test]
    fn duration_prefers_explicit_parameter() {
        assert_eq!(simulated_duration_secs(&json!({ "duration_secs": 90 })), 90);
        assert_eq!(simulated_duration_secs(&json!({ "text": "a".repeat(1800) })), 120);
        assert_eq!(simulated_duration_secs(&json!({})), DEFAULT_OUTPUT_SECS);
    }

    #[tokio::test]
    async fn reports_progress_then_completion() {
        let (tx, mut rx) = event_channel();
        let storage = Arc::new(InMemoryStorage::new());
        let worker = SimulatedWorker::new(tx, storage.clone(), Duration::from_millis(1), 4);
        let job = job(json!({ "duration_secs": 300 }));

        worker.submit(&job).await.unwrap();

        let mut progress = Vec::new();
        let completed = loop {
            match rx.recv().await.unwrap() {
                WorkerEvent::Progress { percent, .. } => progress.push(percent),
                other => break other,
            }
        };

        assert_eq!(progress, vec![25, 50, 75]);
        match completed {
            WorkerEvent::Completed {
                job_id,
                attempt,
                output_ref,
                output_text,
                duration_secs,
            } => {
                assert_eq!(job_id, job.job_id);
                assert_eq!(attempt, 1);
                assert_eq!(output_text, None);
                assert_eq!(duration_secs, Some(300));
                assert!(storage.download(&output_ref).await.is_ok());
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(worker.running_count(), 0);
    }

    #[tokio::test]
    async fn abort_stops_without_terminal_event() {
        let (tx, mut rx) = event_channel();
        let storage = Arc::new(InMemoryStorage::new());
        let worker = SimulatedWorker::new(tx, storage.clone(), Duration::from_secs(60), 2);
        let job = job(json!({}));

        worker.submit(&job).await.unwrap();
        assert_eq!(worker.running_count(), 1);
        worker.abort(job.job_id).await;
        assert_eq!(worker.running_count(), 0);

        drop(worker);
        // The spawned task exits and drops its sender; no event was sent.
        assert!(rx.recv().await.is_none());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn transcription_returns_text() {
        let (tx, mut rx) = event_channel();
        let storage = Arc::new(InMemoryStorage::new());
        let worker = SimulatedWorker::new(tx, storage, Duration::from_millis(1), 1);
        let job = WorkerJob {
            capability: TRANSCRIBE_CAPABILITY.into(),
            ..job(json!({ "duration_secs": 30 }))
        };

        worker.submit(&job).await.unwrap();

        match rx.recv().await.unwrap() {
            WorkerEvent::Completed { output_text, .. } => {
                let text = output_text.unwrap();
                assert!(text.contains("transcript of mem://in"));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn resubmission_supersedes_running_attempt() {
        let (tx, mut rx) = event_channel();
        let storage = Arc::new(InMemoryStorage::new());
        let worker = SimulatedWorker::new(tx, storage, Duration::from_millis(20), 2);
        let first = job(json!({}));
        let second = WorkerJob {
            attempt: 2,
            ..first.clone()
        };

        worker.submit(&first).await.unwrap();
        let ack = worker.submit(&second).await.unwrap();
        assert_eq!(ack.worker_ref, Some(format!("sim-{}-2", first.job_id)));
        assert_eq!(worker.running_count(), 1);

        let mut attempts = Vec::new();
        loop {
            let event = rx.recv().await.unwrap();
            attempts.push(event.attempt());
            if matches!(event, WorkerEvent::Completed { .. }) {
                break;
            }
        }
        assert!(attempts.iter().all(|&a| a == 2), "stale events: {attempts:?}");
        assert_eq!(worker.running_count(), 0);
    }
}
