//! Authentication: bearer-token validation for clients.

pub mod jwt;
