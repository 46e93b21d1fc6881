use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sonora_core::types::{JobId, Timestamp, UserId};
use uuid::Uuid;

/// Reason recorded on download debits.
pub const REASON_DOWNLOAD: &str = "download";

/// A row from the append-only `credit_transactions` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct CreditTransaction {
    pub id: Uuid,
    pub user_id: UserId,
    pub job_id: Option<JobId>,
    /// Positive for credits added, negative for debits.
    pub delta: i64,
    pub reason: String,
    pub created_at: Timestamp,
}

/// DTO for `POST /api/v1/admin/accounts/{user_id}/credits`.
#[derive(Debug, Deserialize)]
pub struct GrantCredits {
    pub minutes: i64,
    pub reason: Option<String>,
}
