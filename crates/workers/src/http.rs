//! Remote worker reached over HTTP.
//!
//! `submit` posts the job to `{endpoint}/jobs`; the worker later reports
//! progress and results to the orchestrator's internal callback endpoints
//! (`{callback_base_url}/api/v1/internal/jobs/{id}/...`), echoing the
//! `attempt` it was submitted with.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use sonora_core::types::JobId;

use crate::contract::{CapabilityWorker, SubmitAck, WorkerError, WorkerJob};

pub struct HttpWorker {
    client: reqwest::Client,
    endpoint: String,
    callback_base_url: String,
}

#[derive(Debug, Default, Deserialize)]
struct AckBody {
    #[serde(default)]
    worker_ref: Option<String>,
}

impl HttpWorker {
    /// * `endpoint` - Base URL of the worker, e.g. `http://tts-worker:9000`.
    /// * `callback_base_url` - Base URL the worker posts callbacks to.
    pub fn new(client: reqwest::Client, endpoint: String, callback_base_url: String) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            callback_base_url: callback_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn callback_url(&self, job_id: JobId) -> String {
        format!("{}/api/v1/internal/jobs/{job_id}", self.callback_base_url)
    }
}

/// Map a non-success response status onto the retry taxonomy.
///
/// Server errors, `429` and `408` are transient; other client errors mean
/// the worker will never accept this job.
pub fn classify_status(status: StatusCode, body: &str) -> WorkerError {
    let message = format!("worker returned HTTP {}: {body}", status.as_u16());
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        WorkerError::Transient(message)
    } else {
        WorkerError::Permanent(message)
    }
}

#[async_trait]
impl CapabilityWorker for HttpWorker {
    fn kind(&self) -> &'static str {
        "http"
    }

    async fn submit(&self, job: &WorkerJob) -> Result<SubmitAck, WorkerError> {
        let body = serde_json::json!({
            "job_id": job.job_id,
            "attempt": job.attempt,
            "capability": job.capability,
            "model": job.model,
            "input_ref": job.input_ref,
            "parameters": job.parameters,
            "callback_url": self.callback_url(job.job_id),
        });

        let response = self
            .client
            .post(format!("{}/jobs", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(|e| WorkerError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        // An empty or non-JSON body is still an acknowledgement.
        let ack = response.json::<AckBody>().await.unwrap_or_default();
        Ok(SubmitAck {
            worker_ref: ack.worker_ref,
        })
    }

    async fn abort(&self, job_id: JobId) {
        let result = self
            .client
            .post(format!("{}/jobs/{job_id}/abort", self.endpoint))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(job_id = %job_id, endpoint = %self.endpoint, "Abort delivered");
            }
            Ok(response) => {
                tracing::warn!(
                    job_id = %job_id,
                    status = response.status().as_u16(),
                    "Worker rejected abort",
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Abort request failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn server_errors_are_transient() {
        assert_matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, "busy"),
            WorkerError::Transient(m) if m.contains("503")
        );
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_transient());
        assert!(classify_status(StatusCode::REQUEST_TIMEOUT, "").is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert_matches!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad sample rate"),
            WorkerError::Permanent(m) if m.contains("bad sample rate")
        );
        assert!(!classify_status(StatusCode::NOT_FOUND, "").is_transient());
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let worker = HttpWorker::new(
            reqwest::Client::new(),
            "http://tts:9000/".into(),
            "http://api:3000/".into(),
        );
        assert_eq!(worker.endpoint(), "http://tts:9000");
        let id = JobId::now_v7();
        assert_eq!(
            worker.callback_url(id),
            format!("http://api:3000/api/v1/internal/jobs/{id}")
        );
    }

    #[tokio::test]
    async fn unreachable_worker_is_transient() {
        let worker = HttpWorker::new(
            reqwest::Client::new(),
            "http://127.0.0.1:1".into(),
            "http://localhost".into(),
        );
        let job = WorkerJob {
            job_id: JobId::now_v7(),
            attempt: 1,
            capability: "tts".into(),
            model: "aurora-v1".into(),
            input_ref: "mem://in".into(),
            parameters: serde_json::json!({}),
        };
        assert_matches!(worker.submit(&job).await, Err(WorkerError::Transient(_)));
    }
}
