/// Jobs are keyed by time-ordered UUIDs (v7).
pub type JobId = uuid::Uuid;

/// Users are identified by the opaque subject carried in their access token.
pub type UserId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
