//! The worker contract.
//!
//! A worker accepts a job with [`CapabilityWorker::submit`] and reports the
//! rest of its lifecycle asynchronously as [`WorkerEvent`]s: in-process
//! workers send them over an mpsc channel, remote workers post them to the
//! internal callback endpoints, and both end up in the same handler.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sonora_core::types::JobId;
use tokio::sync::mpsc;

/// Capacity of the channel carrying [`WorkerEvent`]s to the orchestrator.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Sending half handed to in-process workers.
pub type WorkerEventSender = mpsc::Sender<WorkerEvent>;

/// Receiving half drained by the orchestrator.
pub type WorkerEventReceiver = mpsc::Receiver<WorkerEvent>;

/// Create the channel shared by all in-process workers.
pub fn event_channel() -> (WorkerEventSender, WorkerEventReceiver) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Everything a worker needs to process one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerJob {
    pub job_id: JobId,
    /// 1-based dispatch attempt. Every [`WorkerEvent`] for this submission
    /// must echo it.
    pub attempt: i32,
    pub capability: String,
    pub model: String,
    pub input_ref: String,
    pub parameters: serde_json::Value,
}

/// Acknowledgement that a worker has taken a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitAck {
    /// Worker-side reference, if the worker assigns one.
    pub worker_ref: Option<String>,
}

/// Reasons a submission was not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkerError {
    /// Worker busy, unreachable, or timed out. Worth retrying.
    #[error("transient worker error: {0}")]
    Transient(String),

    /// The worker rejected the job. Retrying will not help.
    #[error("permanent worker error: {0}")]
    Permanent(String),
}

impl WorkerError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Asynchronous lifecycle report from a worker.
///
/// `attempt` is the [`WorkerJob::attempt`] the report belongs to; reports
/// from an attempt that has since been retried are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkerEvent {
    Progress {
        job_id: JobId,
        attempt: i32,
        percent: i16,
    },
    Completed {
        job_id: JobId,
        attempt: i32,
        output_ref: String,
        /// Text result, e.g. a transcript.
        #[serde(default)]
        output_text: Option<String>,
        duration_secs: Option<i64>,
    },
    Failed {
        job_id: JobId,
        attempt: i32,
        reason: String,
    },
}

impl WorkerEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            Self::Progress { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::Failed { job_id, .. } => *job_id,
        }
    }

    pub fn attempt(&self) -> i32 {
        match self {
            Self::Progress { attempt, .. }
            | Self::Completed { attempt, .. }
            | Self::Failed { attempt, .. } => *attempt,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// A handle to whatever runs inference for one `(capability, model)` pair.
///
/// Implementations must return from `submit` promptly; the dispatcher
/// enforces an acknowledgement timeout and treats expiry as transient.
#[async_trait]
pub trait CapabilityWorker: Send + Sync {
    /// Short label for logs (`"simulated"`, `"http"`).
    fn kind(&self) -> &'static str;

    /// Hand a job to the worker.
    async fn submit(&self, job: &WorkerJob) -> Result<SubmitAck, WorkerError>;

    /// Best-effort request to stop work on a job. Errors are ignored by
    /// callers; the store is already authoritative.
    async fn abort(&self, job_id: JobId);
}
