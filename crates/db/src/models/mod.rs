//! Row types and DTOs for each table.

pub mod account;
pub mod credit_transaction;
pub mod job;
pub mod transition;
