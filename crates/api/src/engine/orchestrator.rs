//! Job orchestration: intake, status reads, cancellation, and the
//! credit-gated download.
//!
//! HTTP handlers and remote callbacks go through [`Orchestrator`]; it
//! composes the registry, the job store, the dispatcher and the ledger.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use sonora_core::billing::estimated_minutes;
use sonora_core::capability::{validate_input_ref, validate_name};
use sonora_core::error::CoreError;
use sonora_core::job_events::{EVENT_CREDITS_CREDITED, EVENT_CREDITS_DEBITED, EVENT_JOB_CANCELLED};
use sonora_core::scheduling::{priority_for_account, JobStatus};
use sonora_core::types::JobId;
use sonora_db::models::account::Account;
use sonora_db::models::credit_transaction::CreditTransaction;
use sonora_db::models::job::{Job, JobListQuery, NewJob};
use sonora_db::models::transition::JobTransition;
use sonora_db::repositories::{
    AccountRepo, ChargeOutcome, JobRepo, LedgerRepo, TransitionRepo,
};
use sonora_db::DbPool;
use sonora_events::{EventBus, PlatformEvent};
use sonora_workers::CapabilityRegistry;

use crate::engine::dispatcher::Dispatcher;
use crate::engine::locks::JobLocks;
use crate::error::{AppError, AppResult};

/// How often a cancel re-reads the job when its status moved underneath it.
const CANCEL_ATTEMPTS: usize = 3;

/// Who is asking. Non-admin callers only see their own jobs.
#[derive(Debug, Clone, Copy)]
pub struct Caller<'a> {
    pub user_id: &'a str,
    pub is_admin: bool,
}

impl Caller<'_> {
    fn can_access(&self, job: &Job) -> bool {
        self.is_admin || job.user_id == self.user_id
    }
}

/// Validated intake request.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub capability: String,
    pub model: String,
    pub input_ref: String,
    pub parameters: serde_json::Value,
}

/// Result of a successful submission.
#[derive(Debug)]
pub struct Submitted {
    pub job: Job,
    /// The capability's queue was over its depth limit. The job was still
    /// accepted.
    pub queue_saturated: bool,
}

/// Payload released by a successful download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Download {
    pub job_id: JobId,
    pub output_ref: String,
    pub credits_charged_minutes: i64,
}

/// Balance view of an account. Unknown users have a zero balance.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub user_id: String,
    pub credits_remaining: i64,
    pub paid_status: bool,
}

impl AccountView {
    fn from_account(user_id: &str, account: Option<Account>) -> Self {
        match account {
            Some(account) => Self {
                user_id: account.user_id,
                credits_remaining: account.credits_remaining,
                paid_status: account.paid_status,
            },
            None => Self {
                user_id: user_id.to_string(),
                credits_remaining: 0,
                paid_status: false,
            },
        }
    }
}

pub struct Orchestrator {
    pub(crate) pool: DbPool,
    pub(crate) registry: Arc<CapabilityRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) event_bus: Arc<EventBus>,
    pub(crate) locks: Arc<JobLocks>,
}

impl Orchestrator {
    pub fn new(
        pool: DbPool,
        registry: Arc<CapabilityRegistry>,
        dispatcher: Arc<Dispatcher>,
        event_bus: Arc<EventBus>,
        locks: Arc<JobLocks>,
    ) -> Self {
        Self {
            pool,
            registry,
            dispatcher,
            event_bus,
            locks,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Validate a request, create the job and hand it to the dispatcher.
    ///
    /// Nothing is written when validation fails. Never waits on processing.
    pub async fn submit(&self, user_id: &str, request: SubmitRequest) -> AppResult<Submitted> {
        validate_name("capability", &request.capability)?;
        validate_name("model", &request.model)?;
        validate_input_ref(&request.input_ref)?;

        let spec = self.registry.get(&request.capability).ok_or_else(|| {
            CoreError::UnsupportedCapability(format!(
                "Capability \"{}\" is not registered",
                request.capability
            ))
        })?;
        if spec.worker(&request.model).is_none() {
            return Err(CoreError::UnsupportedCapability(format!(
                "Model \"{}\" is not available for capability \"{}\"",
                request.model, request.capability
            ))
            .into());
        }

        let parameters = match request.parameters {
            serde_json::Value::Null => json!({}),
            other => other,
        };
        spec.schema.validate(&parameters)?;

        let paid = AccountRepo::find(&self.pool, user_id)
            .await?
            .is_some_and(|account| account.paid_status);

        let job = JobRepo::create(
            &self.pool,
            &NewJob {
                user_id: user_id.to_string(),
                capability: request.capability,
                model_name: request.model,
                input_ref: request.input_ref,
                parameters,
                priority: priority_for_account(paid),
            },
        )
        .await?;

        tracing::info!(
            job_id = %job.id,
            user_id = %user_id,
            capability = %job.capability,
            model = %job.model_name,
            priority = job.priority,
            "Job submitted",
        );

        let queue_saturated = self.dispatcher.enqueue(&job).await?;
        let job = JobRepo::find_by_id(&self.pool, job.id)
            .await?
            .unwrap_or(job);

        Ok(Submitted {
            job,
            queue_saturated,
        })
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Current state of a job. Pure read.
    pub async fn job(&self, caller: Caller<'_>, job_id: JobId) -> AppResult<Job> {
        self.load_owned(caller, job_id).await
    }

    pub async fn list_jobs(&self, caller: Caller<'_>, query: &JobListQuery) -> AppResult<Vec<Job>> {
        let status = match query.status.as_deref() {
            None | Some("") => None,
            Some(name) => Some(JobStatus::from_name(name).ok_or_else(|| {
                CoreError::Validation(format!("Unknown job status \"{name}\""))
            })?),
        };
        let owner = (!caller.is_admin).then_some(caller.user_id);
        Ok(JobRepo::list(&self.pool, owner, query, status).await?)
    }

    pub async fn transitions(
        &self,
        caller: Caller<'_>,
        job_id: JobId,
    ) -> AppResult<Vec<JobTransition>> {
        self.load_owned(caller, job_id).await?;
        Ok(TransitionRepo::list_for_job(&self.pool, job_id).await?)
    }

    async fn load_owned(&self, caller: Caller<'_>, job_id: JobId) -> AppResult<Job> {
        JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .filter(|job| caller.can_access(job))
            .ok_or_else(|| job_not_found(job_id))
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Cancel a non-terminal job. Cancelling a terminal job is a no-op and
    /// returns it unchanged.
    ///
    /// A job that was already handed to a worker gets a fire-and-forget
    /// abort. Debits are never reversed.
    pub async fn cancel(&self, caller: Caller<'_>, job_id: JobId) -> AppResult<Job> {
        let _guard = self.locks.lock(job_id).await;

        for _ in 0..CANCEL_ATTEMPTS {
            let job = self.load_owned(caller, job_id).await?;
            let status = job.status();
            if status.is_terminal() {
                return Ok(job);
            }

            if !JobRepo::cancel(&self.pool, job_id, status, "cancelled by user").await? {
                continue;
            }

            self.dispatcher.release(job_id);
            if status == JobStatus::Processing {
                if let Some(worker) = self.registry.resolve(&job.capability, &job.model_name) {
                    tokio::spawn(async move { worker.abort(job_id).await });
                }
            }

            tracing::info!(job_id = %job_id, from = status.name(), "Job cancelled");
            self.event_bus.publish(
                PlatformEvent::new(EVENT_JOB_CANCELLED)
                    .with_job(job_id)
                    .with_user(job.user_id.clone())
                    .with_payload(json!({ "from": status.name() })),
            );

            return self.load_owned(caller, job_id).await;
        }

        Err(CoreError::Conflict(format!("Job {job_id} changed state while cancelling")).into())
    }

    // -----------------------------------------------------------------------
    // Download
    // -----------------------------------------------------------------------

    /// Release a completed job's output, charging the owner exactly once.
    pub async fn download(&self, caller: Caller<'_>, job_id: JobId) -> AppResult<Download> {
        let job = self.load_owned(caller, job_id).await?;
        let output_ref = ready_output(&job)?;
        let cost = estimated_minutes(job.output_duration_secs, &job.parameters);
        let released = Download {
            job_id,
            output_ref,
            credits_charged_minutes: cost,
        };

        if job.credits_charged {
            return Ok(released);
        }

        let _guard = self.locks.lock(job_id).await;
        match LedgerRepo::charge_download(&self.pool, job_id, cost).await? {
            ChargeOutcome::Charged { transaction_id } => {
                tracing::info!(
                    job_id = %job_id,
                    user_id = %job.user_id,
                    cost,
                    transaction_id = %transaction_id,
                    "Download charged",
                );
                self.event_bus.publish(
                    PlatformEvent::new(EVENT_CREDITS_DEBITED)
                        .with_job(job_id)
                        .with_user(job.user_id.clone())
                        .with_payload(json!({
                            "minutes": cost,
                            "transaction_id": transaction_id,
                        })),
                );
                Ok(released)
            }
            ChargeOutcome::AlreadyCharged => Ok(released),
            ChargeOutcome::NotChargeable => {
                Err(CoreError::JobNotReady(job_id.to_string()).into())
            }
            ChargeOutcome::InsufficientCredits { available } => {
                tracing::info!(
                    job_id = %job_id,
                    user_id = %job.user_id,
                    required = cost,
                    available,
                    "Download refused: insufficient credits",
                );
                Err(CoreError::InsufficientCredits {
                    required: cost,
                    available,
                }
                .into())
            }
        }
    }

    // -----------------------------------------------------------------------
    // Administration
    // -----------------------------------------------------------------------

    /// Archive a terminal job (admin only at the route level).
    pub async fn archive(&self, job_id: JobId) -> AppResult<Job> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))?;
        if !job.status().is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {job_id} is {} and cannot be archived",
                job.status().name()
            ))
            .into());
        }
        JobRepo::archive(&self.pool, job_id).await?;
        JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or_else(|| job_not_found(job_id))
    }

    // -----------------------------------------------------------------------
    // Accounts
    // -----------------------------------------------------------------------

    pub async fn account(&self, user_id: &str) -> AppResult<AccountView> {
        let account = AccountRepo::find(&self.pool, user_id).await?;
        Ok(AccountView::from_account(user_id, account))
    }

    pub async fn transactions(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> AppResult<Vec<CreditTransaction>> {
        Ok(LedgerRepo::list_transactions(&self.pool, user_id, limit.unwrap_or(50)).await?)
    }

    /// Add credit minutes to an account. The account becomes paid.
    pub async fn grant_credits(
        &self,
        user_id: &str,
        minutes: i64,
        reason: Option<&str>,
    ) -> AppResult<AccountView> {
        if user_id.trim().is_empty() {
            return Err(AppError::BadRequest("user_id must not be empty".into()));
        }
        let reason = reason.filter(|r| !r.trim().is_empty()).unwrap_or("grant");
        let transaction_id = LedgerRepo::credit(&self.pool, user_id, minutes, reason).await?;

        tracing::info!(user_id = %user_id, minutes, reason, "Credits granted");
        self.event_bus.publish(
            PlatformEvent::new(EVENT_CREDITS_CREDITED)
                .with_user(user_id.to_string())
                .with_payload(json!({
                    "minutes": minutes,
                    "reason": reason,
                    "transaction_id": transaction_id,
                })),
        );

        self.account(user_id).await
    }
}

fn job_not_found(job_id: JobId) -> AppError {
    CoreError::NotFound {
        entity: "Job",
        id: job_id.to_string(),
    }
    .into()
}

fn ready_output(job: &Job) -> Result<String, CoreError> {
    match (&job.output_ref, job.status()) {
        (Some(output_ref), JobStatus::Completed) => Ok(output_ref.clone()),
        _ => Err(CoreError::JobNotReady(job.id.to_string())),
    }
}
