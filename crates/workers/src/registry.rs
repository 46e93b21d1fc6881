//! Capability registry.
//!
//! Maps each capability to its parameter schema, dispatch limits and the
//! worker handles of its models. Built once at startup through
//! [`RegistryBuilder`], which rejects malformed configurations, and
//! read-only afterwards.

use std::collections::BTreeMap;
use std::sync::Arc;

use sonora_core::capability::{validate_name, ParameterSchema};

use crate::contract::CapabilityWorker;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("no capabilities registered")]
    Empty,

    #[error("capability \"{0}\" has no models")]
    NoModels(String),

    #[error("capability \"{0}\" has a zero concurrency limit")]
    ZeroConcurrency(String),

    #[error("capability \"{0}\" has a zero queue depth limit")]
    ZeroQueueDepth(String),

    #[error("duplicate capability \"{0}\"")]
    DuplicateCapability(String),

    #[error("duplicate model \"{model}\" for capability \"{capability}\"")]
    DuplicateModel { capability: String, model: String },

    #[error("model \"{model}\" registered for unknown capability \"{capability}\"")]
    UnknownCapability { capability: String, model: String },

    #[error("invalid name: {0}")]
    InvalidName(String),

    #[error("capability \"{capability}\" has an invalid schema: {reason}")]
    InvalidSchema { capability: String, reason: String },
}

/// One capability and everything needed to accept and dispatch its jobs.
pub struct CapabilitySpec {
    pub name: String,
    pub schema: ParameterSchema,
    /// Maximum jobs of this capability in `processing` at once.
    pub concurrency_limit: usize,
    /// Queue depth above which intake reports saturation.
    pub queue_depth_limit: usize,
    models: BTreeMap<String, Arc<dyn CapabilityWorker>>,
}

impl CapabilitySpec {
    pub fn worker(&self, model: &str) -> Option<Arc<dyn CapabilityWorker>> {
        self.models.get(model).cloned()
    }

    pub fn model_names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for CapabilitySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilitySpec")
            .field("name", &self.name)
            .field("concurrency_limit", &self.concurrency_limit)
            .field("queue_depth_limit", &self.queue_depth_limit)
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Validated, immutable registry.
#[derive(Debug)]
pub struct CapabilityRegistry {
    capabilities: BTreeMap<String, CapabilitySpec>,
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, capability: &str) -> Option<&CapabilitySpec> {
        self.capabilities.get(capability)
    }

    /// Look up the worker for a `(capability, model)` pair.
    pub fn resolve(&self, capability: &str, model: &str) -> Option<Arc<dyn CapabilityWorker>> {
        self.get(capability)?.worker(model)
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &CapabilitySpec> {
        self.capabilities.values()
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RegistryBuilder {
    capabilities: Vec<(String, ParameterSchema, usize, usize)>,
    models: Vec<(String, String, Arc<dyn CapabilityWorker>)>,
}

impl RegistryBuilder {
    /// Declare a capability.
    pub fn capability(
        mut self,
        name: impl Into<String>,
        schema: ParameterSchema,
        concurrency_limit: usize,
        queue_depth_limit: usize,
    ) -> Self {
        self.capabilities
            .push((name.into(), schema, concurrency_limit, queue_depth_limit));
        self
    }

    /// Register a worker handle for one model of a declared capability.
    pub fn model(
        mut self,
        capability: impl Into<String>,
        model: impl Into<String>,
        worker: Arc<dyn CapabilityWorker>,
    ) -> Self {
        self.models.push((capability.into(), model.into(), worker));
        self
    }

    pub fn build(self) -> Result<CapabilityRegistry, RegistryError> {
        if self.capabilities.is_empty() {
            return Err(RegistryError::Empty);
        }

        let mut capabilities = BTreeMap::new();
        for (name, schema, concurrency_limit, queue_depth_limit) in self.capabilities {
            validate_name("capability", &name)
                .map_err(|e| RegistryError::InvalidName(e.to_string()))?;
            if concurrency_limit == 0 {
                return Err(RegistryError::ZeroConcurrency(name));
            }
            if queue_depth_limit == 0 {
                return Err(RegistryError::ZeroQueueDepth(name));
            }
            schema.check().map_err(|reason| RegistryError::InvalidSchema {
                capability: name.clone(),
                reason,
            })?;
            if capabilities.contains_key(&name) {
                return Err(RegistryError::DuplicateCapability(name));
            }
            capabilities.insert(
                name.clone(),
                CapabilitySpec {
                    name,
                    schema,
                    concurrency_limit,
                    queue_depth_limit,
                    models: BTreeMap::new(),
                },
            );
        }

        for (capability, model, worker) in self.models {
            validate_name("model", &model)
                .map_err(|e| RegistryError::InvalidName(e.to_string()))?;
            let Some(spec) = capabilities.get_mut(&capability) else {
                return Err(RegistryError::UnknownCapability { capability, model });
            };
            if spec.models.contains_key(&model) {
                return Err(RegistryError::DuplicateModel { capability, model });
            }
            spec.models.insert(model, worker);
        }

        if let Some(spec) = capabilities.values().find(|spec| spec.models.is_empty()) {
            return Err(RegistryError::NoModels(spec.name.clone()));
        }

        Ok(CapabilityRegistry { capabilities })
    }
}
