//! Repository for the `accounts` table.
//!
//! Balances are only changed through [`LedgerRepo`](super::LedgerRepo); this
//! repository only creates and reads rows.

use sqlx::SqliteConnection;
use sonora_core::types::Timestamp;

use crate::models::account::Account;
use crate::DbPool;

const COLUMNS: &str = "user_id, credits_remaining, paid_status, created_at, updated_at";

pub struct AccountRepo;

impl AccountRepo {
    /// Create a zero-balance account for `user_id` if none exists.
    pub async fn ensure(
        conn: &mut SqliteConnection,
        user_id: &str,
        now: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO accounts (user_id, credits_remaining, paid_status, created_at, updated_at) \
             VALUES (?1, 0, 0, ?2, ?2) \
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    pub async fn find(pool: &DbPool, user_id: &str) -> Result<Option<Account>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM accounts WHERE user_id = ?1");
        sqlx::query_as::<_, Account>(&query)
            .bind(user_id)
            .fetch_optional(pool)
            .await
    }
}
