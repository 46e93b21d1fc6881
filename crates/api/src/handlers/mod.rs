//! Request handlers.
//!
//! Handlers extract the caller, delegate to the
//! [`Orchestrator`](crate::engine::orchestrator::Orchestrator) and wrap the
//! result in a [`DataResponse`](crate::response::DataResponse).

pub mod accounts;
pub mod admin;
pub mod internal;
pub mod jobs;
