//! Background job dispatcher.
//!
//! Keeps one in-memory queue per capability, ordered by priority tier and
//! FIFO within a tier, and hands jobs to workers while the capability has a
//! free slot. The database stays authoritative: a queue entry whose row is
//! no longer `queued` (e.g. cancelled while waiting) is simply dropped when
//! it reaches the front.
//!
//! A slot is taken when a job is popped and released only after the row has
//! left `processing`, so the number of `processing` rows per capability
//! never exceeds its concurrency limit.
//!
//! An attempt that is given up on (unacknowledged, transient error, found
//! `processing` at startup) is aborted on its worker before the job is
//! retried, and the store ignores any later report carrying its number.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use sonora_core::backoff::jittered_delay;
use sonora_core::job_events::{
    EVENT_JOB_FAILED, EVENT_JOB_PROCESSING, EVENT_JOB_QUEUED, EVENT_QUEUE_SATURATED,
};
use sonora_core::scheduling::state_machine::can_retry;
use sonora_core::scheduling::JobStatus;
use sonora_core::types::JobId;
use sonora_db::models::job::Job;
use sonora_db::repositories::JobRepo;
use sonora_db::DbPool;
use sonora_events::{EventBus, PlatformEvent};
use sonora_workers::{CapabilityRegistry, CapabilityWorker, WorkerError, WorkerJob};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::DispatchConfig;
use crate::engine::locks::JobLocks;

// ---------------------------------------------------------------------------
// Queues
// ---------------------------------------------------------------------------

/// Queue and in-flight set of one capability.
#[derive(Default)]
struct CapabilityQueue {
    /// Priority tiers, highest first; FIFO within a tier.
    tiers: BTreeMap<Reverse<i32>, VecDeque<JobId>>,
    /// Jobs currently in `tiers`, for de-duplication.
    waiting: HashSet<JobId>,
    /// Jobs holding a dispatch slot.
    in_flight: HashSet<JobId>,
}

impl CapabilityQueue {
    fn push(&mut self, job_id: JobId, priority: i32) -> bool {
        if self.in_flight.contains(&job_id) || !self.waiting.insert(job_id) {
            return false;
        }
        self.tiers
            .entry(Reverse(priority))
            .or_default()
            .push_back(job_id);
        true
    }

    fn pop(&mut self) -> Option<JobId> {
        let (&tier, queue) = self.tiers.iter_mut().next()?;
        let job_id = queue.pop_front();
        if queue.is_empty() {
            self.tiers.remove(&tier);
        }
        let job_id = job_id?;
        self.waiting.remove(&job_id);
        Some(job_id)
    }

    fn remove(&mut self, job_id: JobId) {
        if self.waiting.remove(&job_id) {
            self.tiers.retain(|_, queue| {
                queue.retain(|id| *id != job_id);
                !queue.is_empty()
            });
        }
    }

    fn depth(&self) -> usize {
        self.waiting.len()
    }
}

/// Snapshot of one capability's queue for observability and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub waiting: usize,
    pub in_flight: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    pool: DbPool,
    registry: Arc<CapabilityRegistry>,
    event_bus: Arc<EventBus>,
    locks: Arc<JobLocks>,
    config: DispatchConfig,
    queues: Mutex<HashMap<String, CapabilityQueue>>,
    wakeup: Notify,
}

impl Dispatcher {
    pub fn new(
        pool: DbPool,
        registry: Arc<CapabilityRegistry>,
        event_bus: Arc<EventBus>,
        locks: Arc<JobLocks>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            event_bus,
            locks,
            config,
            queues: Mutex::new(HashMap::new()),
            wakeup: Notify::new(),
        }
    }

    fn queues(&self) -> std::sync::MutexGuard<'_, HashMap<String, CapabilityQueue>> {
        self.queues.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move a freshly created job to `queued` and add it to its capability
    /// queue. Returns whether the queue is saturated.
    ///
    /// A saturated queue still accepts the job.
    pub async fn enqueue(&self, job: &Job) -> Result<bool, sqlx::Error> {
        {
            let _guard = self.locks.lock(job.id).await;
            if !JobRepo::mark_queued(&self.pool, job.id).await? {
                // Cancelled before it could be queued.
                return Ok(false);
            }
        }

        self.event_bus.publish(
            PlatformEvent::new(EVENT_JOB_QUEUED)
                .with_job(job.id)
                .with_user(job.user_id.clone())
                .with_payload(json!({ "capability": job.capability, "priority": job.priority })),
        );

        Ok(self.push(&job.capability, job.id, job.priority))
    }

    /// Re-enqueue every unfinished job found in the store.
    ///
    /// Jobs left `processing` by a previous run lost their attempt with the
    /// process: the attempt is aborted and counted as failed, then the job
    /// is retried or, with no retries left, failed.
    pub async fn recover(&self) -> Result<usize, sqlx::Error> {
        let jobs = JobRepo::list_recoverable(&self.pool).await?;
        let count = jobs.len();
        for job in jobs {
            match job.status() {
                JobStatus::Pending => {
                    let _guard = self.locks.lock(job.id).await;
                    if !JobRepo::mark_queued(&self.pool, job.id).await? {
                        continue;
                    }
                }
                JobStatus::Processing => {
                    if !self.recover_interrupted(&job).await? {
                        continue;
                    }
                }
                _ => {}
            }
            self.push(&job.capability, job.id, job.priority);
        }
        if count > 0 {
            tracing::info!(count, "Recovered unfinished jobs");
        }
        Ok(count)
    }

    /// Settle a job whose attempt was cut off by a restart. Returns whether
    /// it went back to `queued`.
    async fn recover_interrupted(&self, job: &Job) -> Result<bool, sqlx::Error> {
        const REASON: &str = "interrupted by restart";
        let attempt = job.current_attempt();

        if let Some(worker) = self.registry.resolve(&job.capability, &job.model_name) {
            self.abort_attempt(worker.as_ref(), job.id).await;
        }

        if !can_retry(attempt, self.config.max_retries) {
            let message = format!("{REASON} (gave up after {attempt} attempts)");
            self.fail_job(job, attempt, &message).await;
            return Ok(false);
        }

        let _guard = self.locks.lock(job.id).await;
        let requeued = JobRepo::requeue_for_retry(&self.pool, job.id, attempt, REASON).await?;
        if requeued.is_some() {
            tracing::warn!(job_id = %job.id, attempt, "Requeued job interrupted by restart");
        }
        Ok(requeued.is_some())
    }

    /// Ask the worker to stop an attempt, waiting at most the ack timeout.
    async fn abort_attempt(&self, worker: &dyn CapabilityWorker, job_id: JobId) {
        if tokio::time::timeout(self.config.ack_timeout, worker.abort(job_id))
            .await
            .is_err()
        {
            tracing::warn!(job_id = %job_id, worker = worker.kind(), "Abort not delivered in time");
        }
    }

    /// Add a queued job to its in-memory queue and wake the loop.
    fn push(&self, capability: &str, job_id: JobId, priority: i32) -> bool {
        let depth_limit = self
            .registry
            .get(capability)
            .map(|spec| spec.queue_depth_limit)
            .unwrap_or(usize::MAX);

        let depth = {
            let mut queues = self.queues();
            let queue = queues.entry(capability.to_string()).or_default();
            queue.push(job_id, priority);
            queue.depth()
        };
        self.wakeup.notify_one();

        let saturated = depth > depth_limit;
        if saturated {
            tracing::warn!(
                capability,
                depth,
                depth_limit,
                "Capability queue saturated; job accepted anyway",
            );
            self.event_bus.publish(
                PlatformEvent::new(EVENT_QUEUE_SATURATED)
                    .with_job(job_id)
                    .with_payload(json!({
                        "capability": capability,
                        "depth": depth,
                        "limit": depth_limit,
                    })),
            );
        }
        saturated
    }

    /// Release `job_id`'s slot (if any) and drop it from its queue.
    ///
    /// Idempotent. Callers must have already moved the row out of
    /// `processing`.
    pub fn release(&self, job_id: JobId) {
        let released = {
            let mut queues = self.queues();
            let mut released = false;
            for queue in queues.values_mut() {
                released |= queue.in_flight.remove(&job_id);
                queue.remove(job_id);
            }
            released
        };
        if released {
            tracing::debug!(job_id = %job_id, "Dispatch slot released");
            self.wakeup.notify_one();
        }
    }

    pub fn stats(&self, capability: &str) -> QueueStats {
        self.queues()
            .get(capability)
            .map(|queue| QueueStats {
                waiting: queue.depth(),
                in_flight: queue.in_flight.len(),
            })
            .unwrap_or(QueueStats {
                waiting: 0,
                in_flight: 0,
            })
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_retries = self.config.max_retries,
            "Job dispatcher started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Job dispatcher shutting down");
                    break;
                }
                _ = self.wakeup.notified() => self.dispatch_ready(),
                _ = ticker.tick() => self.dispatch_ready(),
            }
        }
    }

    /// Claim a slot for every job that fits and spawn its dispatch task.
    fn dispatch_ready(self: &Arc<Self>) {
        let mut ready = Vec::new();
        {
            let mut queues = self.queues();
            for (capability, queue) in queues.iter_mut() {
                let limit = self
                    .registry
                    .get(capability)
                    .map(|spec| spec.concurrency_limit)
                    .unwrap_or(1);
                while queue.in_flight.len() < limit {
                    let Some(job_id) = queue.pop() else { break };
                    queue.in_flight.insert(job_id);
                    ready.push(job_id);
                }
            }
        }

        for job_id in ready {
            let dispatcher = Arc::clone(self);
            tokio::spawn(async move { dispatcher.dispatch_one(job_id).await });
        }
    }

    /// Move one job to `processing` and submit it to its worker.
    async fn dispatch_one(self: Arc<Self>, job_id: JobId) {
        let claimed = {
            let _guard = self.locks.lock(job_id).await;
            JobRepo::mark_processing(&self.pool, job_id).await
        };

        let job = match claimed {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::debug!(job_id = %job_id, "Job no longer queued; skipping");
                self.release(job_id);
                return;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to claim job");
                self.release(job_id);
                self.schedule_push(job_id, jittered_delay(1, &self.config.backoff));
                return;
            }
        };

        self.event_bus.publish(
            PlatformEvent::new(EVENT_JOB_PROCESSING)
                .with_job(job.id)
                .with_user(job.user_id.clone())
                .with_payload(json!({ "attempt": job.current_attempt() })),
        );

        let Some(worker) = self.registry.resolve(&job.capability, &job.model_name) else {
            let reason = format!(
                "No worker registered for {}/{}",
                job.capability, job.model_name
            );
            self.fail_job(&job, job.current_attempt(), &reason).await;
            return;
        };

        let request = WorkerJob {
            job_id: job.id,
            attempt: job.current_attempt(),
            capability: job.capability.clone(),
            model: job.model_name.clone(),
            input_ref: job.input_ref.clone(),
            parameters: job.parameters.clone(),
        };

        tracing::info!(
            job_id = %job.id,
            capability = %job.capability,
            model = %job.model_name,
            worker = worker.kind(),
            attempt = request.attempt,
            "Submitting job to worker",
        );

        let outcome = match tokio::time::timeout(self.config.ack_timeout, worker.submit(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(WorkerError::Transient(format!(
                "worker did not acknowledge within {} ms",
                self.config.ack_timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(ack) => {
                tracing::debug!(job_id = %job.id, worker_ref = ?ack.worker_ref, "Worker acknowledged job");
                // A cancel may have landed while we waited for the ack.
                let current = JobRepo::find_by_id(&self.pool, job.id).await;
                if let Ok(Some(current)) = current {
                    if current.status() == JobStatus::Cancelled {
                        worker.abort(job.id).await;
                    }
                }
            }
            Err(WorkerError::Transient(reason)) => {
                // The worker may still have taken the job; stop it before
                // the next attempt can be submitted.
                self.abort_attempt(worker.as_ref(), job.id).await;
                self.retry_or_fail(&job, request.attempt, &reason).await;
            }
            Err(WorkerError::Permanent(reason)) => {
                self.fail_job(&job, request.attempt, &reason).await;
            }
        }
    }

    /// Handle a transient submission failure of `attempt`.
    ///
    /// After the k-th failed attempt the job is requeued while
    /// `k < max_retries`, and marked failed otherwise.
    async fn retry_or_fail(self: &Arc<Self>, job: &Job, attempt: i32, reason: &str) {
        if !can_retry(attempt, self.config.max_retries) {
            let message = format!("{reason} (gave up after {attempt} attempts)");
            self.fail_job(job, attempt, &message).await;
            return;
        }

        let requeued = {
            let _guard = self.locks.lock(job.id).await;
            JobRepo::requeue_for_retry(&self.pool, job.id, attempt, reason).await
        };
        self.release(job.id);

        match requeued {
            Ok(Some(_)) => {
                let delay = jittered_delay(attempt as u32, &self.config.backoff);
                tracing::warn!(
                    job_id = %job.id,
                    attempt,
                    max_retries = self.config.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Transient worker failure, retrying",
                );
                self.schedule_push(job.id, delay);
            }
            Ok(None) => {
                tracing::debug!(job_id = %job.id, "Job left processing before retry");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to requeue job");
            }
        }
    }

    /// Push a job back onto its queue after `delay`, if it is still queued.
    fn schedule_push(self: &Arc<Self>, job_id: JobId, delay: Duration) {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match JobRepo::find_by_id(&dispatcher.pool, job_id).await {
                Ok(Some(job)) if job.status() == JobStatus::Queued => {
                    dispatcher.push(&job.capability, job.id, job.priority);
                }
                Ok(_) => {
                    tracing::debug!(job_id = %job_id, "Job no longer queued; not re-enqueued");
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to reload job for retry");
                }
            }
        });
    }

    async fn fail_job(&self, job: &Job, attempt: i32, reason: &str) {
        let failed = {
            let _guard = self.locks.lock(job.id).await;
            JobRepo::fail(&self.pool, job.id, attempt, reason).await
        };
        self.release(job.id);

        match failed {
            Ok(true) => {
                tracing::error!(job_id = %job.id, error = %reason, "Job failed");
                self.event_bus.publish(
                    PlatformEvent::new(EVENT_JOB_FAILED)
                        .with_job(job.id)
                        .with_user(job.user_id.clone())
                        .with_payload(json!({ "error": reason })),
                );
            }
            Ok(false) => {
                tracing::debug!(job_id = %job.id, "Job left processing before failure was recorded");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to mark job as failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn higher_priority_tier_pops_first() {
        let mut queue = CapabilityQueue::default();
        let standard = Uuid::now_v7();
        let premium = Uuid::now_v7();
        queue.push(standard, 0);
        queue.push(premium, 10);

        assert_eq!(queue.pop(), Some(premium));
        assert_eq!(queue.pop(), Some(standard));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn fifo_within_a_tier() {
        let mut queue = CapabilityQueue::default();
        let ids: Vec<JobId> = (0..4).map(|_| Uuid::now_v7()).collect();
        for id in &ids {
            queue.push(*id, 0);
        }
        let popped: Vec<JobId> = std::iter::from_fn(|| queue.pop()).collect();
        assert_eq!(popped, ids);
    }

    #[test]
    fn duplicates_and_in_flight_jobs_are_not_queued() {
        let mut queue = CapabilityQueue::default();
        let id = Uuid::now_v7();
        assert!(queue.push(id, 0));
        assert!(!queue.push(id, 0));
        assert_eq!(queue.depth(), 1);

        let popped = queue.pop().unwrap();
        queue.in_flight.insert(popped);
        assert!(!queue.push(id, 0));
        assert_eq!(queue.depth(), 0);
    }

    #[test]
    fn remove_drops_waiting_job() {
        let mut queue = CapabilityQueue::default();
        let keep = Uuid::now_v7();
        let drop = Uuid::now_v7();
        queue.push(keep, 0);
        queue.push(drop, 0);
        queue.remove(drop);

        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.pop(), Some(keep));
        assert!(queue.tiers.is_empty());
    }
}
