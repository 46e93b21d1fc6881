//! Repository for the `jobs` table.
//!
//! Every status change is a conditional `UPDATE ... WHERE status_id = ?`
//! executed as the first statement of its transaction, followed by the
//! matching `job_transitions` row. A change whose precondition no longer
//! holds affects zero rows and is reported back to the caller as `false` /
//! `None` instead of overwriting a newer state.
//!
//! Changes driven by a worker additionally name the attempt they belong to
//! (`retry_count + 1`), so a late report from an abandoned attempt cannot
//! touch the attempt that replaced it.

use chrono::Utc;
use sonora_core::scheduling::JobStatus;
use sonora_core::types::JobId;
use uuid::Uuid;

use crate::models::job::{Job, JobListQuery, JobOutput, NewJob};
use crate::repositories::{AccountRepo, TransitionRepo};
use crate::DbPool;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, user_id, capability, model_name, input_ref, output_ref, parameters, \
    status_id, priority, progress, error, retry_count, credits_charged, \
    output_duration_secs, output_text, created_at, started_at, completed_at, updated_at, archived_at";

/// Maximum page size for job listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for job listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides the job store's read and transition operations.
pub struct JobRepo;

impl JobRepo {
    /// Create a new pending job, creating the owner's account on first use.
    pub async fn create(pool: &DbPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        AccountRepo::ensure(&mut tx, &input.user_id, now).await?;

        let query = format!(
            "INSERT INTO jobs \
                 (id, user_id, capability, model_name, input_ref, parameters, \
                  status_id, priority, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9) \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(&input.user_id)
            .bind(&input.capability)
            .bind(&input.model_name)
            .bind(&input.input_ref)
            .bind(&input.parameters)
            .bind(JobStatus::Pending.id())
            .bind(input.priority)
            .bind(now)
            .fetch_one(&mut *tx)
            .await?;

        TransitionRepo::record(&mut tx, id, None, JobStatus::Pending, Some("submitted"), now)
            .await?;
        tx.commit().await?;
        Ok(job)
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &DbPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = ?1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Non-terminal jobs left behind by a previous run, in dispatch order.
    pub async fn list_recoverable(pool: &DbPool) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status_id IN (?1, ?2, ?3) AND archived_at IS NULL \
             ORDER BY priority DESC, created_at ASC, id ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(JobStatus::Pending.id())
            .bind(JobStatus::Queued.id())
            .bind(JobStatus::Processing.id())
            .fetch_all(pool)
            .await
    }

    /// Move a pending job into its capability queue.
    pub async fn mark_queued(pool: &DbPool, id: JobId) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs SET status_id = ?2, updated_at = ?3 WHERE id = ?1 AND status_id = ?4",
        )
        .bind(id)
        .bind(JobStatus::Queued.id())
        .bind(now)
        .bind(JobStatus::Pending.id())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        TransitionRepo::record(
            &mut tx,
            id,
            Some(JobStatus::Pending),
            JobStatus::Queued,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Claim a queued job for a worker. Sets `started_at` on the first
    /// attempt; progress carries over from earlier attempts.
    ///
    /// Returns `None` if the job is no longer queued (e.g. it was cancelled
    /// while waiting for capacity).
    pub async fn mark_processing(pool: &DbPool, id: JobId) -> Result<Option<Job>, sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs \
             SET status_id = ?2, started_at = COALESCE(started_at, ?3), updated_at = ?3 \
             WHERE id = ?1 AND status_id = ?4 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Processing.id())
            .bind(now)
            .bind(JobStatus::Queued.id())
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        TransitionRepo::record(
            &mut tx,
            id,
            Some(JobStatus::Queued),
            JobStatus::Processing,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    /// Record failed `attempt` and put the job back in the queue.
    ///
    /// The attempt is logged as `processing -> failed -> queued` in one
    /// transaction, so readers never observe the intermediate `failed`.
    /// Progress is kept.
    pub async fn requeue_for_retry(
        pool: &DbPool,
        id: JobId,
        attempt: i32,
        reason: &str,
    ) -> Result<Option<Job>, sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let query = format!(
            "UPDATE jobs \
             SET status_id = ?2, retry_count = retry_count + 1, error = NULL, updated_at = ?3 \
             WHERE id = ?1 AND status_id = ?4 AND retry_count = ?5 \
             RETURNING {COLUMNS}"
        );
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .bind(JobStatus::Queued.id())
            .bind(now)
            .bind(JobStatus::Processing.id())
            .bind(attempt - 1)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        TransitionRepo::record(
            &mut tx,
            id,
            Some(JobStatus::Processing),
            JobStatus::Failed,
            Some(reason),
            now,
        )
        .await?;
        let retry_note = format!("retry {}", job.retry_count);
        TransitionRepo::record(
            &mut tx,
            id,
            Some(JobStatus::Failed),
            JobStatus::Queued,
            Some(&retry_note),
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(Some(job))
    }

    /// Mark a processing job as failed, ending `attempt`.
    ///
    /// The failed attempt is counted in `retry_count` like any other.
    pub async fn fail(
        pool: &DbPool,
        id: JobId,
        attempt: i32,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?2, error = ?3, retry_count = retry_count + 1, \
                 completed_at = ?4, updated_at = ?4 \
             WHERE id = ?1 AND status_id = ?5 AND retry_count = ?6",
        )
        .bind(id)
        .bind(JobStatus::Failed.id())
        .bind(error)
        .bind(now)
        .bind(JobStatus::Processing.id())
        .bind(attempt - 1)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        TransitionRepo::record(
            &mut tx,
            id,
            Some(JobStatus::Processing),
            JobStatus::Failed,
            Some(error),
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Mark a processing job as completed by `attempt`.
    pub async fn complete(
        pool: &DbPool,
        id: JobId,
        attempt: i32,
        output: &JobOutput<'_>,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs \
             SET status_id = ?2, output_ref = ?3, output_text = ?4, output_duration_secs = ?5, \
                 progress = 100, completed_at = ?6, updated_at = ?6 \
             WHERE id = ?1 AND status_id = ?7 AND retry_count = ?8",
        )
        .bind(id)
        .bind(JobStatus::Completed.id())
        .bind(output.output_ref)
        .bind(output.output_text)
        .bind(output.duration_secs)
        .bind(now)
        .bind(JobStatus::Processing.id())
        .bind(attempt - 1)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        TransitionRepo::record(
            &mut tx,
            id,
            Some(JobStatus::Processing),
            JobStatus::Completed,
            None,
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Raise a processing job's progress as reported by `attempt`.
    ///
    /// Lower values, other attempts and jobs not on a worker are ignored;
    /// returns whether the row changed.
    pub async fn update_progress(
        pool: &DbPool,
        id: JobId,
        attempt: i32,
        percent: i16,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET progress = ?2, updated_at = ?3 \
             WHERE id = ?1 AND progress <= ?2 AND status_id = ?4 AND retry_count = ?5",
        )
        .bind(id)
        .bind(percent.clamp(0, 100))
        .bind(Utc::now())
        .bind(JobStatus::Processing.id())
        .bind(attempt - 1)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Cancel a job that is still in `expected` status.
    ///
    /// Returns `false` if the status moved on since the caller read it.
    pub async fn cancel(
        pool: &DbPool,
        id: JobId,
        expected: JobStatus,
        reason: &str,
    ) -> Result<bool, sqlx::Error> {
        if expected.is_terminal() {
            return Ok(false);
        }

        let now = Utc::now();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            "UPDATE jobs SET status_id = ?2, completed_at = ?3, updated_at = ?3 \
             WHERE id = ?1 AND status_id = ?4",
        )
        .bind(id)
        .bind(JobStatus::Cancelled.id())
        .bind(now)
        .bind(expected.id())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        TransitionRepo::record(
            &mut tx,
            id,
            Some(expected),
            JobStatus::Cancelled,
            Some(reason),
            now,
        )
        .await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Archive a terminal job. Jobs are never deleted.
    pub async fn archive(pool: &DbPool, id: JobId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE jobs SET archived_at = ?2, updated_at = ?2 \
             WHERE id = ?1 AND archived_at IS NULL AND status_id IN (?3, ?4, ?5)",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(JobStatus::Completed.id())
        .bind(JobStatus::Failed.id())
        .bind(JobStatus::Cancelled.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List jobs, newest first. When `user_id` is `Some`, only that user's
    /// jobs are returned; `None` is the admin view.
    pub async fn list(
        pool: &DbPool,
        user_id: Option<&str>,
        params: &JobListQuery,
        status: Option<JobStatus>,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        if user_id.is_some() {
            conditions.push(format!("user_id = ?{bind_idx}"));
            bind_idx += 1;
        }

        if status.is_some() {
            conditions.push(format!("status_id = ?{bind_idx}"));
            bind_idx += 1;
        }

        if !params.include_archived {
            conditions.push("archived_at IS NULL".to_string());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             {where_clause} \
             ORDER BY created_at DESC, id DESC \
             LIMIT ?{bind_idx} OFFSET ?{}",
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, Job>(&query);

        if let Some(uid) = user_id {
            q = q.bind(uid);
        }
        if let Some(status) = status {
            q = q.bind(status.id());
        }

        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }
}
