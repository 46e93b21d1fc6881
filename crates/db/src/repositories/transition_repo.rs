//! Repository for the `job_transitions` audit table.

use sqlx::SqliteConnection;
use sonora_core::scheduling::JobStatus;
use sonora_core::types::{JobId, Timestamp};

use crate::models::transition::JobTransition;
use crate::DbPool;

pub struct TransitionRepo;

impl TransitionRepo {
    /// Append one transition row. Must run inside the transaction that
    /// changes the job's status.
    pub async fn record(
        conn: &mut SqliteConnection,
        job_id: JobId,
        from: Option<JobStatus>,
        to: JobStatus,
        reason: Option<&str>,
        at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO job_transitions (job_id, from_status_id, to_status_id, reason, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(job_id)
        .bind(from.map(JobStatus::id))
        .bind(to.id())
        .bind(reason)
        .bind(at)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// All transitions of a job in the order they happened.
    pub async fn list_for_job(
        pool: &DbPool,
        job_id: JobId,
    ) -> Result<Vec<JobTransition>, sqlx::Error> {
        sqlx::query_as::<_, JobTransition>(
            "SELECT id, job_id, from_status_id, to_status_id, reason, created_at \
             FROM job_transitions WHERE job_id = ?1 ORDER BY id ASC",
        )
        .bind(job_id)
        .fetch_all(pool)
        .await
    }
}
