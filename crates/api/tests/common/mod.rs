#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use sonora_api::auth::jwt::{generate_access_token, JwtConfig};
use sonora_api::config::{DispatchConfig, ServerConfig};
use sonora_api::engine::orchestrator::Orchestrator;
use sonora_api::engine::{self, EngineHandle};
use sonora_api::router::build_app_router;
use sonora_api::state::AppState;
use sonora_core::backoff::BackoffConfig;
use sonora_core::capability::{ParamKind, ParamRule, ParameterSchema};
use sonora_core::scheduling::JobStatus;
use sonora_core::types::JobId;
use sonora_db::models::job::Job;
use sonora_db::repositories::JobRepo;
use sonora_db::DbPool;
use sonora_events::EventBus;
use sonora_workers::{
    CapabilityRegistry, CapabilityWorker, InMemoryStorage, RegistryConfig, SubmitAck,
    WorkerContext, WorkerError, WorkerEventReceiver, WorkerJob,
};

pub const WORKER_TOKEN: &str = "test-worker-token";
pub const ADMIN_ID: &str = "admin-1";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        jwt: JwtConfig {
            secret: "test-secret-that-is-long-enough-for-hmac".to_string(),
            access_token_expiry_mins: 15,
        },
        worker_callback_token: WORKER_TOKEN.to_string(),
        public_base_url: "http://localhost:3000".to_string(),
        database_url: "sqlite::memory:".to_string(),
        capabilities_file: None,
    }
}

/// Fast retries so retry tests finish in milliseconds.
pub fn test_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        max_retries: 3,
        ack_timeout: Duration::from_millis(300),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            multiplier: 2.0,
            jitter: 0.0,
        },
        poll_interval: Duration::from_millis(20),
    }
}

pub fn user_token(user_id: &str) -> String {
    generate_access_token(user_id, "user", &test_config().jwt).unwrap()
}

pub fn admin_token() -> String {
    generate_access_token(ADMIN_ID, "admin", &test_config().jwt).unwrap()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A running engine plus the HTTP router in front of it.
pub struct TestApp {
    pub router: Router,
    pub pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
    pub event_bus: Arc<EventBus>,
    pub engine: Option<EngineHandle>,
}

impl TestApp {
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(engine) = self.engine.take() {
            engine.shutdown(Duration::from_secs(1)).await;
        }
    }
}

/// Start an engine over `registry` with an in-memory database.
pub async fn spawn_engine(registry: CapabilityRegistry, events: WorkerEventReceiver) -> TestApp {
    let pool = sonora_db::create_memory_pool().await.unwrap();
    spawn_engine_with_pool(pool, registry, events).await
}

pub async fn spawn_engine_with_pool(
    pool: DbPool,
    registry: CapabilityRegistry,
    events: WorkerEventReceiver,
) -> TestApp {
    let config = test_config();
    let event_bus = Arc::new(EventBus::default());
    let orchestrator = engine::build_orchestrator(
        pool.clone(),
        Arc::new(registry),
        Arc::clone(&event_bus),
        test_dispatch_config(),
    );
    let handle = engine::start(Arc::clone(&orchestrator), events)
        .await
        .unwrap();

    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        orchestrator: Arc::clone(&orchestrator),
        event_bus: Arc::clone(&event_bus),
    };

    TestApp {
        router: build_app_router(state, &config),
        pool,
        orchestrator,
        event_bus,
        engine: Some(handle),
    }
}

/// The built-in capabilities with fast simulated workers.
pub async fn build_test_app() -> TestApp {
    let (tx, rx) = sonora_workers::event_channel();
    let mut registry_config = RegistryConfig::builtin();
    for capability in &mut registry_config.capabilities {
        for model in &mut capability.models {
            model.step_delay_ms = 5;
            model.steps = 2;
        }
    }
    let ctx = WorkerContext {
        events: tx,
        storage: Arc::new(InMemoryStorage::new()),
        callback_base_url: "http://localhost:3000".to_string(),
    };
    let registry = registry_config.build_registry(&ctx).unwrap();
    drop(ctx);
    spawn_engine(registry, rx).await
}

/// Registry with a single `tts` capability served by `worker` as model
/// `scripted`.
pub fn scripted_registry(
    worker: Arc<dyn CapabilityWorker>,
    concurrency_limit: usize,
    queue_depth_limit: usize,
) -> CapabilityRegistry {
    CapabilityRegistry::builder()
        .capability("tts", tts_schema(), concurrency_limit, queue_depth_limit)
        .model("tts", "scripted", worker)
        .build()
        .unwrap()
}

pub fn tts_schema() -> ParameterSchema {
    ParameterSchema::new(vec![
        ParamRule {
            name: "text".to_string(),
            required: true,
            kind: ParamKind::Text {
                min_len: 1,
                max_len: 5000,
            },
        },
        ParamRule {
            name: "duration_secs".to_string(),
            required: false,
            kind: ParamKind::Integer {
                min: Some(1),
                max: None,
                allowed: Vec::new(),
            },
        },
    ])
}

// ---------------------------------------------------------------------------
// Scripted worker
// ---------------------------------------------------------------------------

/// What a [`ScriptedWorker`] does with one submission.
#[derive(Debug, Clone)]
pub enum Script {
    Ack,
    Transient,
    Permanent,
    /// Never answer; the dispatcher's ack timeout fires.
    Hang,
}

/// Worker whose submissions follow a script. Once the script runs out it
/// keeps acknowledging. Acknowledged jobs stay `processing` until the test
/// reports an outcome.
#[derive(Default)]
pub struct ScriptedWorker {
    script: Mutex<VecDeque<Script>>,
    pub submits: AtomicUsize,
    pub attempts: Mutex<Vec<i32>>,
    pub aborts: Mutex<Vec<JobId>>,
}

impl ScriptedWorker {
    pub fn new(script: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        })
    }

    /// A worker that acknowledges every submission.
    pub fn acking() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn submit_count(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    /// Attempt numbers of every submission, in order.
    pub fn submitted_attempts(&self) -> Vec<i32> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn aborted(&self) -> Vec<JobId> {
        self.aborts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CapabilityWorker for ScriptedWorker {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn submit(&self, job: &WorkerJob) -> Result<SubmitAck, WorkerError> {
        self.attempts.lock().unwrap().push(job.attempt);
        self.submits.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Script::Ack);
        match step {
            Script::Ack => Ok(SubmitAck { worker_ref: None }),
            Script::Transient => Err(WorkerError::Transient("worker busy".to_string())),
            Script::Permanent => Err(WorkerError::Permanent("model rejected input".to_string())),
            Script::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(SubmitAck { worker_ref: None })
            }
        }
    }

    async fn abort(&self, job_id: JobId) {
        self.aborts.lock().unwrap().push(job_id);
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

/// Poll until the job reaches `status`, panicking after five seconds.
pub async fn wait_for_status(pool: &DbPool, job_id: JobId, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = JobRepo::find_by_id(pool, job_id).await.unwrap().unwrap();
        if job.status() == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {job_id} stuck in {} waiting for {status}",
            job.status()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll until `check` holds, panicking after five seconds.
pub async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get_auth(app: Router, uri: &str, token: &str) -> Response<Body> {
    let request = Request::builder()
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json_auth(app: Router, uri: &str, token: &str, body: Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("Authorization", format!("Bearer {token}"))
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// Submit a TTS job over HTTP and return its id.
pub async fn submit_tts(app: Router, token: &str, model: &str, text: &str) -> JobId {
    let response = post_json_auth(
        app,
        "/api/v1/jobs",
        token,
        serde_json::json!({
            "capability": "tts",
            "model": model,
            "input_ref": "mem://input",
            "parameters": { "text": text },
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    json["data"]["job_id"].as_str().unwrap().parse().unwrap()
}
