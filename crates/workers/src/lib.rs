//! Capability workers: the contract the dispatcher drives, the registry
//! that maps `(capability, model)` pairs to worker handles, and the two
//! built-in transports (in-process simulation and remote HTTP).

pub mod config;
pub mod contract;
pub mod http;
pub mod registry;
pub mod simulated;
pub mod storage;

pub use config::{ConfigError, RegistryConfig, WorkerContext};
pub use contract::{
    event_channel, CapabilityWorker, SubmitAck, WorkerError, WorkerEvent, WorkerEventReceiver,
    WorkerEventSender, WorkerJob,
};
pub use registry::{CapabilityRegistry, CapabilitySpec, RegistryError};
pub use storage::{InMemoryStorage, StorageError, StorageGateway};
