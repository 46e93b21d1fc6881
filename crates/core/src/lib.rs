//! Domain types and pure logic for the Sonora job orchestrator.
//!
//! This crate has zero internal dependencies so it can be shared by the
//! database layer, the worker adapters, and the API server.

pub mod backoff;
pub mod billing;
pub mod capability;
pub mod error;
pub mod job_events;
pub mod roles;
pub mod scheduling;
pub mod types;
