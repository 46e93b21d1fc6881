//! Credit ledger: account balances and the append-only transaction log.
//!
//! Every balance change updates `accounts` and inserts a
//! `credit_transactions` row in the same transaction. Debits use a
//! conditional `UPDATE ... WHERE credits_remaining >= ?` so the balance can
//! never be driven negative, even by concurrent callers.

use chrono::Utc;
use sonora_core::scheduling::JobStatus;
use sonora_core::types::{JobId, Timestamp};
use sqlx::SqliteConnection;
use uuid::Uuid;

use crate::models::credit_transaction::{CreditTransaction, REASON_DOWNLOAD};
use crate::repositories::AccountRepo;
use crate::DbPool;

const COLUMNS: &str = "id, user_id, job_id, delta, reason, created_at";

/// Maximum number of transactions returned by [`LedgerRepo::list_transactions`].
const MAX_LIMIT: i64 = 200;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Invalid credit amount: {0}")]
    InvalidAmount(i64),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Result of [`LedgerRepo::charge_download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The job was charged by this call.
    Charged { transaction_id: Uuid },
    /// The job had already been charged; nothing changed.
    AlreadyCharged,
    /// The job does not exist or is not completed.
    NotChargeable,
    /// The owner's balance is below the cost; nothing changed.
    InsufficientCredits { available: i64 },
}

pub struct LedgerRepo;

impl LedgerRepo {
    /// Current balance in minutes. Unknown users have a balance of zero.
    pub async fn get_balance(pool: &DbPool, user_id: &str) -> Result<i64, sqlx::Error> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT credits_remaining FROM accounts WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    /// Debit `amount` minutes from `user_id`, optionally tied to a job.
    pub async fn debit(
        pool: &DbPool,
        user_id: &str,
        amount: i64,
        job_id: Option<JobId>,
        reason: &str,
    ) -> Result<Uuid, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let now = Utc::now();
        let mut tx = pool.begin().await?;

        if !Self::try_decrement(&mut tx, user_id, amount, now).await? {
            let available = Self::balance_in(&mut tx, user_id).await?;
            tx.rollback().await?;
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            });
        }

        let id = Self::insert_transaction(&mut tx, user_id, job_id, -amount, reason, now).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Add `amount` minutes to `user_id`, creating the account if needed.
    ///
    /// A credit marks the account as paid; paid accounts are dispatched in
    /// the premium priority tier.
    pub async fn credit(
        pool: &DbPool,
        user_id: &str,
        amount: i64,
        reason: &str,
    ) -> Result<Uuid, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        let now = Utc::now();
        let mut tx = pool.begin().await?;

        AccountRepo::ensure(&mut tx, user_id, now).await?;
        sqlx::query(
            "UPDATE accounts \
             SET credits_remaining = credits_remaining + ?2, paid_status = 1, updated_at = ?3 \
             WHERE user_id = ?1",
        )
        .bind(user_id)
        .bind(amount)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let id = Self::insert_transaction(&mut tx, user_id, None, amount, reason, now).await?;
        tx.commit().await?;
        Ok(id)
    }

    /// Charge the owner of a completed job for its download, exactly once.
    ///
    /// The `credits_charged` flag is claimed first with a conditional update,
    /// so of several concurrent callers only one proceeds to the debit. If the
    /// balance is too low the whole transaction rolls back and the flag stays
    /// clear.
    pub async fn charge_download(
        pool: &DbPool,
        job_id: JobId,
        cost: i64,
    ) -> Result<ChargeOutcome, LedgerError> {
        if cost <= 0 {
            return Err(LedgerError::InvalidAmount(cost));
        }

        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let owner: Option<String> = sqlx::query_scalar(
            "UPDATE jobs SET credits_charged = 1, updated_at = ?2 \
             WHERE id = ?1 AND status_id = ?3 AND credits_charged = 0 \
             RETURNING user_id",
        )
        .bind(job_id)
        .bind(now)
        .bind(JobStatus::Completed.id())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            let charged: Option<bool> = sqlx::query_scalar(
                "SELECT credits_charged FROM jobs WHERE id = ?1 AND status_id = ?2",
            )
            .bind(job_id)
            .bind(JobStatus::Completed.id())
            .fetch_optional(&mut *tx)
            .await?;
            tx.rollback().await?;
            return Ok(match charged {
                Some(true) => ChargeOutcome::AlreadyCharged,
                _ => ChargeOutcome::NotChargeable,
            });
        };

        if !Self::try_decrement(&mut tx, &user_id, cost, now).await? {
            let available = Self::balance_in(&mut tx, &user_id).await?;
            tx.rollback().await?;
            return Ok(ChargeOutcome::InsufficientCredits { available });
        }

        let transaction_id = Self::insert_transaction(
            &mut tx,
            &user_id,
            Some(job_id),
            -cost,
            REASON_DOWNLOAD,
            now,
        )
        .await?;
        tx.commit().await?;

        tracing::debug!(job_id = %job_id, user_id = %user_id, cost, "Download charged");
        Ok(ChargeOutcome::Charged { transaction_id })
    }

    /// A user's transactions, newest first.
    pub async fn list_transactions(
        pool: &DbPool,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<CreditTransaction>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM credit_transactions \
             WHERE user_id = ?1 \
             ORDER BY rowid DESC \
             LIMIT ?2"
        );
        sqlx::query_as::<_, CreditTransaction>(&query)
            .bind(user_id)
            .bind(limit.clamp(1, MAX_LIMIT))
            .fetch_all(pool)
            .await
    }

    /// Sum of all deltas for a user. Always equals the current balance.
    pub async fn sum_deltas(pool: &DbPool, user_id: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COALESCE(SUM(delta), 0) FROM credit_transactions WHERE user_id = ?1",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    /// Number of debit transactions recorded against a job (0 or 1).
    pub async fn count_job_debits(pool: &DbPool, job_id: JobId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM credit_transactions WHERE job_id = ?1 AND delta < 0",
        )
        .bind(job_id)
        .fetch_one(pool)
        .await
    }

    // -----------------------------------------------------------------------
    // Helpers (run inside the caller's transaction)
    // -----------------------------------------------------------------------

    async fn try_decrement(
        conn: &mut SqliteConnection,
        user_id: &str,
        amount: i64,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE accounts \
             SET credits_remaining = credits_remaining - ?2, updated_at = ?3 \
             WHERE user_id = ?1 AND credits_remaining >= ?2",
        )
        .bind(user_id)
        .bind(amount)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn balance_in(conn: &mut SqliteConnection, user_id: &str) -> Result<i64, sqlx::Error> {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT credits_remaining FROM accounts WHERE user_id = ?1")
                .bind(user_id)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(balance.unwrap_or(0))
    }

    async fn insert_transaction(
        conn: &mut SqliteConnection,
        user_id: &str,
        job_id: Option<JobId>,
        delta: i64,
        reason: &str,
        now: Timestamp,
    ) -> Result<Uuid, sqlx::Error> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO credit_transactions (id, user_id, job_id, delta, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(id)
        .bind(user_id)
        .bind(job_id)
        .bind(delta)
        .bind(reason)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(id)
    }
}
