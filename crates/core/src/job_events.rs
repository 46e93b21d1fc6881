//! Event type names published on the platform event bus for job and
//! ledger lifecycle changes.

/// Job accepted by the dispatcher and waiting for capacity.
pub const EVENT_JOB_QUEUED: &str = "job.queued";

/// Job handed to a worker.
pub const EVENT_JOB_PROCESSING: &str = "job.processing";

/// Job completed successfully.
pub const EVENT_JOB_COMPLETED: &str = "job.completed";

/// Job failed permanently or exhausted its retries.
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// Job was cancelled by its owner or an admin.
pub const EVENT_JOB_CANCELLED: &str = "job.cancelled";

/// A capability queue grew past its configured depth limit.
pub const EVENT_QUEUE_SATURATED: &str = "queue.saturated";

/// Credits were debited for a download.
pub const EVENT_CREDITS_DEBITED: &str = "credits.debited";

/// Credits were added to an account.
pub const EVENT_CREDITS_CREDITED: &str = "credits.credited";
