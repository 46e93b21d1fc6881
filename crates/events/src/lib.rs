//! Sonora event bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the envelope for job and ledger lifecycle events.
//!
//! Event names live in [`sonora_core::job_events`].

pub mod bus;

pub use bus::{EventBus, PlatformEvent};
