use serde::Serialize;
use sqlx::FromRow;
use sonora_core::scheduling::{JobStatus, StatusId};
use sonora_core::types::{JobId, Timestamp};

/// A row from the `job_transitions` audit table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobTransition {
    pub id: i64,
    pub job_id: JobId,
    /// `None` for the creation row.
    pub from_status_id: Option<StatusId>,
    pub to_status_id: StatusId,
    pub reason: Option<String>,
    pub created_at: Timestamp,
}

impl JobTransition {
    pub fn to_status(&self) -> Option<JobStatus> {
        JobStatus::from_id(self.to_status_id)
    }

    pub fn from_status(&self) -> Option<JobStatus> {
        self.from_status_id.and_then(JobStatus::from_id)
    }
}
