//! Repository structs: stateless query namespaces over a [`DbPool`](crate::DbPool).

pub mod account_repo;
pub mod job_repo;
pub mod ledger_repo;
pub mod transition_repo;

pub use account_repo::AccountRepo;
pub use job_repo::JobRepo;
pub use ledger_repo::{ChargeOutcome, LedgerError, LedgerRepo};
pub use transition_repo::TransitionRepo;
