//! Integration tests for the credit ledger.
//!
//! Verifies that:
//! - Balances never go negative and failed debits change nothing
//! - The sum of a user's transaction deltas always equals their balance
//! - A completed job is charged at most once, even under concurrency

use assert_matches::assert_matches;
use serde_json::json;
use sonora_core::scheduling::JobStatus;
use sonora_db::models::job::{JobOutput, NewJob};
use sonora_db::repositories::{AccountRepo, ChargeOutcome, JobRepo, LedgerError, LedgerRepo};
use sonora_db::DbPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn pool() -> DbPool {
    sonora_db::create_memory_pool().await.unwrap()
}

/// Create a job for `user_id` and drive it to `completed`.
async fn completed_job(pool: &DbPool, user_id: &str) -> uuid::Uuid {
    let job = JobRepo::create(
        pool,
        &NewJob {
            user_id: user_id.to_string(),
            capability: "tts".to_string(),
            model_name: "aurora-v1".to_string(),
            input_ref: "mem://in".to_string(),
            parameters: json!({}),
            priority: 0,
        },
    )
    .await
    .unwrap();
    JobRepo::mark_queued(pool, job.id).await.unwrap();
    JobRepo::mark_processing(pool, job.id).await.unwrap();
    let output = JobOutput {
        output_ref: "mem://out",
        duration_secs: Some(300),
        ..Default::default()
    };
    JobRepo::complete(pool, job.id, 1, &output).await.unwrap();
    job.id
}

// ---------------------------------------------------------------------------
// Debit / credit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_user_has_zero_balance() {
    let pool = pool().await;
    assert_eq!(LedgerRepo::get_balance(&pool, "ghost").await.unwrap(), 0);
}

#[tokio::test]
async fn credit_creates_account_and_marks_paid() {
    let pool = pool().await;

    LedgerRepo::credit(&pool, "alice", 30, "purchase").await.unwrap();

    let account = AccountRepo::find(&pool, "alice").await.unwrap().unwrap();
    assert_eq!(account.credits_remaining, 30);
    assert!(account.paid_status);
    assert_eq!(LedgerRepo::sum_deltas(&pool, "alice").await.unwrap(), 30);
}

#[tokio::test]
async fn non_positive_amounts_rejected() {
    let pool = pool().await;
    assert_matches!(
        LedgerRepo::credit(&pool, "alice", 0, "purchase").await,
        Err(LedgerError::InvalidAmount(0))
    );
    assert_matches!(
        LedgerRepo::debit(&pool, "alice", -5, None, "manual").await,
        Err(LedgerError::InvalidAmount(-5))
    );
}

#[tokio::test]
async fn debit_exceeding_balance_changes_nothing() {
    let pool = pool().await;
    LedgerRepo::credit(&pool, "alice", 4, "purchase").await.unwrap();

    let err = LedgerRepo::debit(&pool, "alice", 5, None, "manual")
        .await
        .unwrap_err();
    assert_matches!(
        err,
        LedgerError::InsufficientCredits {
            required: 5,
            available: 4
        }
    );

    assert_eq!(LedgerRepo::get_balance(&pool, "alice").await.unwrap(), 4);
    let transactions = LedgerRepo::list_transactions(&pool, "alice", 50).await.unwrap();
    assert_eq!(transactions.len(), 1);
}

#[tokio::test]
async fn deltas_sum_to_balance() {
    let pool = pool().await;
    LedgerRepo::credit(&pool, "alice", 20, "purchase").await.unwrap();
    LedgerRepo::debit(&pool, "alice", 7, None, "manual").await.unwrap();
    LedgerRepo::credit(&pool, "alice", 3, "bonus").await.unwrap();
    let _ = LedgerRepo::debit(&pool, "alice", 100, None, "manual").await;

    let balance = LedgerRepo::get_balance(&pool, "alice").await.unwrap();
    assert_eq!(balance, 16);
    assert_eq!(LedgerRepo::sum_deltas(&pool, "alice").await.unwrap(), balance);

    let transactions = LedgerRepo::list_transactions(&pool, "alice", 50).await.unwrap();
    assert_eq!(transactions.len(), 3);
    assert_eq!(transactions[0].reason, "bonus");
}

// ---------------------------------------------------------------------------
// Download charge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn charge_download_debits_once() {
    let pool = pool().await;
    LedgerRepo::credit(&pool, "alice", 10, "purchase").await.unwrap();
    let job_id = completed_job(&pool, "alice").await;

    let first = LedgerRepo::charge_download(&pool, job_id, 5).await.unwrap();
    assert_matches!(first, ChargeOutcome::Charged { .. });

    let second = LedgerRepo::charge_download(&pool, job_id, 5).await.unwrap();
    assert_eq!(second, ChargeOutcome::AlreadyCharged);

    assert_eq!(LedgerRepo::get_balance(&pool, "alice").await.unwrap(), 5);
    assert_eq!(LedgerRepo::count_job_debits(&pool, job_id).await.unwrap(), 1);

    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert!(job.credits_charged);
}

#[tokio::test]
async fn charge_download_with_zero_balance_leaves_job_unpaid() {
    let pool = pool().await;
    let job_id = completed_job(&pool, "alice").await;

    let outcome = LedgerRepo::charge_download(&pool, job_id, 5).await.unwrap();
    assert_eq!(outcome, ChargeOutcome::InsufficientCredits { available: 0 });

    assert_eq!(LedgerRepo::get_balance(&pool, "alice").await.unwrap(), 0);
    assert_eq!(LedgerRepo::count_job_debits(&pool, job_id).await.unwrap(), 0);
    let job = JobRepo::find_by_id(&pool, job_id).await.unwrap().unwrap();
    assert!(!job.credits_charged);

    // After a top-up the same job can be charged.
    LedgerRepo::credit(&pool, "alice", 5, "purchase").await.unwrap();
    let retry = LedgerRepo::charge_download(&pool, job_id, 5).await.unwrap();
    assert_matches!(retry, ChargeOutcome::Charged { .. });
    assert_eq!(LedgerRepo::get_balance(&pool, "alice").await.unwrap(), 0);
}

#[tokio::test]
async fn charge_download_rejects_incomplete_jobs() {
    let pool = pool().await;
    LedgerRepo::credit(&pool, "alice", 10, "purchase").await.unwrap();
    let job = JobRepo::create(
        &pool,
        &NewJob {
            user_id: "alice".to_string(),
            capability: "tts".to_string(),
            model_name: "aurora-v1".to_string(),
            input_ref: "mem://in".to_string(),
            parameters: json!({}),
            priority: 0,
        },
    )
    .await
    .unwrap();
    assert_eq!(job.status(), JobStatus::Pending);

    let outcome = LedgerRepo::charge_download(&pool, job.id, 1).await.unwrap();
    assert_eq!(outcome, ChargeOutcome::NotChargeable);

    let missing = LedgerRepo::charge_download(&pool, uuid::Uuid::now_v7(), 1)
        .await
        .unwrap();
    assert_eq!(missing, ChargeOutcome::NotChargeable);
    assert_eq!(LedgerRepo::get_balance(&pool, "alice").await.unwrap(), 10);
}

#[tokio::test]
async fn concurrent_charges_produce_one_debit() {
    let pool = pool().await;
    LedgerRepo::credit(&pool, "alice", 100, "purchase").await.unwrap();
    let job_id = completed_job(&pool, "alice").await;

    let attempts = (0..8).map(|_| {
        let pool = pool.clone();
        async move { LedgerRepo::charge_download(&pool, job_id, 5).await.unwrap() }
    });
    let outcomes = futures::future::join_all(attempts).await;

    let charged = outcomes
        .iter()
        .filter(|o| matches!(o, ChargeOutcome::Charged { .. }))
        .count();
    assert_eq!(charged, 1);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ChargeOutcome::Charged { .. } | ChargeOutcome::AlreadyCharged)));

    assert_eq!(LedgerRepo::get_balance(&pool, "alice").await.unwrap(), 95);
    assert_eq!(LedgerRepo::count_job_debits(&pool, job_id).await.unwrap(), 1);
}
