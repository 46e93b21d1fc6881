//! Storage gateway contract.
//!
//! Jobs refer to media by opaque references; the orchestrator never reads
//! the bytes itself. Only workers use the gateway.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

/// Scheme prefix of references minted by [`InMemoryStorage`].
const MEMORY_SCHEME: &str = "mem://";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Store `bytes` and return a reference to them.
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, StorageError>;

    async fn download(&self, reference: &str) -> Result<Vec<u8>, StorageError>;

    async fn delete(&self, reference: &str) -> Result<(), StorageError>;
}

/// Process-local object store used by the simulated workers and tests.
#[derive(Default)]
pub struct InMemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // A poisoned map is still structurally valid.
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StorageGateway for InMemoryStorage {
    async fn upload(&self, bytes: Vec<u8>) -> Result<String, StorageError> {
        let reference = format!("{MEMORY_SCHEME}{}", Uuid::now_v7());
        self.lock().insert(reference.clone(), bytes);
        Ok(reference)
    }

    async fn download(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        self.lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }

    async fn delete(&self, reference: &str) -> Result<(), StorageError> {
        self.lock()
            .remove(reference)
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound(reference.to_string()))
    }
}
