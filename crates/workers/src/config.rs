//! Capability registry configuration.
//!
//! The registry is described in TOML:
//!
//! ```toml
//! [[capabilities]]
//! name = "tts"
//! concurrency_limit = 4
//! queue_depth_limit = 200
//!
//! [[capabilities.schema.params]]
//! name = "text"
//! required = true
//! type = "text"
//! min_len = 1
//! max_len = 5000
//!
//! [[capabilities.models]]
//! name = "tacotron2"
//! worker = "http"
//! endpoint = "http://tts-worker:8005"
//! ```
//!
//! Without a file, [`RegistryConfig::builtin`] provides simulated workers
//! for text-to-speech, speech-to-text and noise removal.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use sonora_core::capability::{ParamKind, ParamRule, ParameterSchema};

use crate::contract::{CapabilityWorker, WorkerEventSender};
use crate::http::HttpWorker;
use crate::registry::{CapabilityRegistry, RegistryError};
use crate::simulated::SimulatedWorker;
use crate::storage::StorageGateway;

/// Timeout applied to every request made by HTTP workers.
const HTTP_WORKER_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid registry configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Model \"{0}\" uses the http worker but has no endpoint")]
    MissingEndpoint(String),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// File format
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityConfig {
    pub name: String,
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    #[serde(default = "default_queue_depth_limit")]
    pub queue_depth_limit: usize,
    #[serde(default)]
    pub schema: ParameterSchema,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default)]
    pub worker: WorkerKind,
    /// Base URL of the remote worker. Required for `worker = "http"`.
    pub endpoint: Option<String>,
    /// Delay between simulated progress steps.
    #[serde(default = "default_step_delay_ms")]
    pub step_delay_ms: u64,
    #[serde(default = "default_steps")]
    pub steps: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    #[default]
    Simulated,
    Http,
}

fn default_concurrency_limit() -> usize {
    4
}

fn default_queue_depth_limit() -> usize {
    100
}

fn default_step_delay_ms() -> u64 {
    250
}

fn default_steps() -> u8 {
    4
}

/// Shared resources handed to every worker built from configuration.
#[derive(Clone)]
pub struct WorkerContext {
    /// Channel for in-process worker callbacks.
    pub events: WorkerEventSender,
    pub storage: Arc<dyn StorageGateway>,
    /// Base URL remote workers post their callbacks to.
    pub callback_base_url: String,
}

impl RegistryConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` when given, otherwise use the built-in registry.
    pub fn load_or_builtin(path: Option<&str>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    /// Simulated TTS, STT and noise-removal capabilities.
    pub fn builtin() -> Self {
        let simulated = |name: &str| ModelConfig {
            name: name.to_string(),
            worker: WorkerKind::Simulated,
            endpoint: None,
            step_delay_ms: default_step_delay_ms(),
            steps: default_steps(),
        };
        let duration_rule = ParamRule {
            name: "duration_secs".to_string(),
            required: false,
            kind: ParamKind::Integer {
                min: Some(1),
                max: Some(4 * 60 * 60),
                allowed: Vec::new(),
            },
        };

        Self {
            capabilities: vec![
                CapabilityConfig {
                    name: "tts".to_string(),
                    concurrency_limit: 4,
                    queue_depth_limit: 200,
                    schema: ParameterSchema::new(vec![
                        ParamRule {
                            name: "text".to_string(),
                            required: true,
                            kind: ParamKind::Text {
                                min_len: 1,
                                max_len: 5000,
                            },
                        },
                        ParamRule {
                            name: "voice".to_string(),
                            required: false,
                            kind: ParamKind::Text {
                                min_len: 1,
                                max_len: 64,
                            },
                        },
                    ]),
                    models: vec![simulated("tacotron2"), simulated("fastspeech2")],
                },
                CapabilityConfig {
                    name: "stt".to_string(),
                    concurrency_limit: 2,
                    queue_depth_limit: 100,
                    schema: ParameterSchema::new(vec![
                        ParamRule {
                            name: "language".to_string(),
                            required: false,
                            kind: ParamKind::Choice {
                                options: ["en", "es", "fr", "de", "hi"]
                                    .map(String::from)
                                    .to_vec(),
                            },
                        },
                        duration_rule.clone(),
                    ]),
                    models: vec![simulated("whisper-base")],
                },
                CapabilityConfig {
                    name: "noise_removal".to_string(),
                    concurrency_limit: 2,
                    queue_depth_limit: 100,
                    schema: ParameterSchema::new(vec![
                        ParamRule {
                            name: "sample_rate".to_string(),
                            required: true,
                            kind: ParamKind::Integer {
                                min: None,
                                max: None,
                                allowed: vec![16_000, 44_100, 48_000],
                            },
                        },
                        duration_rule,
                    ]),
                    models: vec![simulated("rnnoise")],
                },
            ],
        }
    }

    /// Instantiate the workers and validate the result.
    pub fn build_registry(&self, ctx: &WorkerContext) -> Result<CapabilityRegistry, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_WORKER_TIMEOUT)
            .build()?;

        let mut builder = CapabilityRegistry::builder();
        for capability in &self.capabilities {
            builder = builder.capability(
                capability.name.clone(),
                capability.schema.clone(),
                capability.concurrency_limit,
                capability.queue_depth_limit,
            );
            for model in &capability.models {
                let worker: Arc<dyn CapabilityWorker> = match model.worker {
                    WorkerKind::Simulated => Arc::new(SimulatedWorker::new(
                        ctx.events.clone(),
                        Arc::clone(&ctx.storage),
                        Duration::from_millis(model.step_delay_ms),
                        model.steps,
                    )),
                    WorkerKind::Http => {
                        let endpoint = model
                            .endpoint
                            .clone()
                            .ok_or_else(|| ConfigError::MissingEndpoint(model.name.clone()))?;
                        Arc::new(HttpWorker::new(
                            client.clone(),
                            endpoint,
                            ctx.callback_base_url.clone(),
                        ))
                    }
                };
                builder = builder.model(capability.name.clone(), model.name.clone(), worker);
            }
        }

        let registry = builder.build()?;
        for spec in registry.capabilities() {
            tracing::info!(
                capability = %spec.name,
                models = ?spec.model_names().collect::<Vec<_>>(),
                concurrency_limit = spec.concurrency_limit,
                queue_depth_limit = spec.queue_depth_limit,
                "Capability registered",
            );
        }
        Ok(registry)
    }
}
