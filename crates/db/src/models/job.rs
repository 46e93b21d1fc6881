//! Job entity models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sonora_core::scheduling::{JobStatus, StatusId};
use sonora_core::types::{JobId, Timestamp, UserId};

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: JobId,
    pub user_id: UserId,
    pub capability: String,
    pub model_name: String,
    pub input_ref: String,
    pub output_ref: Option<String>,
    pub parameters: serde_json::Value,
    pub status_id: StatusId,
    pub priority: i32,
    pub progress: i16,
    pub error: Option<String>,
    /// Dispatch attempts that ended in failure, whichever way they failed
    /// (rejected submit, ack timeout, worker-reported failure, restart).
    pub retry_count: i32,
    pub credits_charged: bool,
    pub output_duration_secs: Option<i64>,
    /// Text result, e.g. a speech-to-text transcript.
    pub output_text: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
    pub archived_at: Option<Timestamp>,
}

impl Job {
    /// Decode `status_id`. Unknown IDs cannot be written through the
    /// repository, so they are reported as `Failed`.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_id(self.status_id).unwrap_or(JobStatus::Failed)
    }

    /// 1-based number of the attempt currently (or next) on a worker.
    ///
    /// Worker reports carry this number; a report from any other attempt
    /// is stale.
    pub fn current_attempt(&self) -> i32 {
        self.retry_count + 1
    }
}

/// What a worker produced for a completed job.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobOutput<'a> {
    pub output_ref: &'a str,
    pub output_text: Option<&'a str>,
    pub duration_secs: Option<i64>,
}

/// Input for creating a job row. Built by intake after validation.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub user_id: UserId,
    pub capability: String,
    pub model_name: String,
    pub input_ref: String,
    pub parameters: serde_json::Value,
    pub priority: i32,
}

/// Query parameters for `GET /api/v1/jobs`.
#[derive(Debug, Default, Deserialize)]
pub struct JobListQuery {
    /// Filter by status name (e.g. `queued`, `failed`).
    pub status: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
    /// Include archived jobs. Defaults to false.
    #[serde(default)]
    pub include_archived: bool,
}
