//! Job status, priority tiers, and the job state machine.
//!
//! Lives in `core` so the repository layer, the dispatcher, and the HTTP
//! handlers all agree on the same transition graph.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Priority constants
// ---------------------------------------------------------------------------

/// Priority for jobs submitted by paid accounts. Dispatched first.
pub const PRIORITY_PREMIUM: i32 = 10;

/// Priority for free-tier jobs.
pub const PRIORITY_STANDARD: i32 = 0;

/// Priority tier for a job, captured at intake from the account's paid status.
pub fn priority_for_account(paid_status: bool) -> i32 {
    if paid_status {
        PRIORITY_PREMIUM
    } else {
        PRIORITY_STANDARD
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Status ID type matching the SMALLINT `status_id` column.
pub type StatusId = i16;

/// Background job execution status.
///
/// Discriminants match the seed rows of the `job_statuses` table.
#[repr(i16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending = 1,
    Queued = 2,
    Processing = 3,
    Completed = 4,
    Failed = 5,
    Cancelled = 6,
}

/// Terminal statuses: completed, failed, cancelled.
pub const TERMINAL_STATUSES: [JobStatus; 3] =
    [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled];

impl JobStatus {
    /// Return the database status ID.
    pub fn id(self) -> StatusId {
        self as StatusId
    }

    /// Look up a status by its database ID.
    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(Self::Pending),
            2 => Some(Self::Queued),
            3 => Some(Self::Processing),
            4 => Some(Self::Completed),
            5 => Some(Self::Failed),
            6 => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Parse the lowercase API name (`"pending"`, `"queued"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(Self::Pending),
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Lowercase name used in API responses and event payloads.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        TERMINAL_STATUSES.contains(&self)
    }
}

impl From<JobStatus> for StatusId {
    fn from(value: JobStatus) -> Self {
        value as StatusId
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::JobStatus;

    /// Returns the set of statuses reachable from `from` in one step.
    ///
    /// `Failed -> Queued` is the retry edge; callers must additionally check
    /// the retry budget with [`can_retry`].
    pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
        match from {
            JobStatus::Pending => &[JobStatus::Queued, JobStatus::Cancelled],
            JobStatus::Queued => &[JobStatus::Processing, JobStatus::Cancelled],
            JobStatus::Processing => &[
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ],
            JobStatus::Failed => &[JobStatus::Queued],
            JobStatus::Completed | JobStatus::Cancelled => &[],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// A failed job may go back to the queue while it has retries left.
    pub fn can_retry(retry_count: i32, max_retries: i32) -> bool {
        retry_count < max_retries
    }

    /// Check that a whole observed sequence of statuses is a path through
    /// the graph. Repeated observations of the same status are allowed.
    pub fn is_valid_path(statuses: &[JobStatus]) -> bool {
        statuses
            .windows(2)
            .all(|pair| pair[0] == pair[1] || can_transition(pair[0], pair[1]))
    }
}

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;

    #[test]
    fn status_ids_match_seed_data() {
        assert_eq!(JobStatus::Pending.id(), 1);
        assert_eq!(JobStatus::Queued.id(), 2);
        assert_eq!(JobStatus::Processing.id(), 3);
        assert_eq!(JobStatus::Completed.id(), 4);
        assert_eq!(JobStatus::Failed.id(), 5);
        assert_eq!(JobStatus::Cancelled.id(), 6);
    }

    #[test]
    fn status_id_round_trip_through_lookup() {
        for status in [
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::from_id(status.id()), Some(status));
            assert_eq!(JobStatus::from_name(status.name()), Some(status));
        }
        assert_eq!(JobStatus::from_id(0), None);
        assert_eq!(JobStatus::from_name("running"), None);
    }

    #[test]
    fn pending_to_queued() {
        assert!(can_transition(JobStatus::Pending, JobStatus::Queued));
    }

    #[test]
    fn pending_cannot_skip_to_processing() {
        assert!(!can_transition(JobStatus::Pending, JobStatus::Processing));
    }

    #[test]
    fn queued_to_processing() {
        assert!(can_transition(JobStatus::Queued, JobStatus::Processing));
    }

    #[test]
    fn processing_to_terminal_states() {
        assert!(can_transition(JobStatus::Processing, JobStatus::Completed));
        assert!(can_transition(JobStatus::Processing, JobStatus::Failed));
        assert!(can_transition(JobStatus::Processing, JobStatus::Cancelled));
    }

    #[test]
    fn any_non_terminal_can_be_cancelled() {
        for from in [JobStatus::Pending, JobStatus::Queued, JobStatus::Processing] {
            assert!(can_transition(from, JobStatus::Cancelled), "{from}");
        }
    }

    #[test]
    fn failed_can_only_go_back_to_queue() {
        assert_eq!(valid_transitions(JobStatus::Failed), &[JobStatus::Queued]);
    }

    #[test]
    fn completed_and_cancelled_are_final() {
        assert!(valid_transitions(JobStatus::Completed).is_empty());
        assert!(valid_transitions(JobStatus::Cancelled).is_empty());
    }

    #[test]
    fn retry_budget() {
        assert!(can_retry(0, 3));
        assert!(can_retry(2, 3));
        assert!(!can_retry(3, 3));
        assert!(!can_retry(0, 0));
    }

    #[test]
    fn retry_path_is_valid() {
        use JobStatus::*;
        assert!(is_valid_path(&[
            Pending, Queued, Processing, Failed, Queued, Processing, Completed
        ]));
    }

    #[test]
    fn path_with_skipped_state_is_invalid() {
        use JobStatus::*;
        assert!(!is_valid_path(&[Pending, Processing, Completed]));
    }

    #[test]
    fn path_with_two_terminal_states_is_invalid() {
        use JobStatus::*;
        assert!(!is_valid_path(&[Queued, Processing, Completed, Cancelled]));
    }

    #[test]
    fn repeated_observations_are_allowed() {
        use JobStatus::*;
        assert!(is_valid_path(&[Pending, Pending, Queued, Queued, Cancelled, Cancelled]));
    }

    #[test]
    fn premium_accounts_get_higher_priority() {
        assert!(priority_for_account(true) > priority_for_account(false));
        assert_eq!(priority_for_account(false), PRIORITY_STANDARD);
    }
}
