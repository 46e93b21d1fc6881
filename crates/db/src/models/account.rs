use serde::Serialize;
use sqlx::FromRow;
use sonora_core::types::{Timestamp, UserId};

/// A row from the `accounts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub user_id: UserId,
    /// Remaining download allowance in minutes. Never negative.
    pub credits_remaining: i64,
    pub paid_status: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
