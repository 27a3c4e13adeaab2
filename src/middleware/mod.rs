//! Middleware for the loan ledger API
//!
//! This module provides request tracing, security headers, and actor
//! identity extraction.

pub mod auth;
mod security;
mod tracing;

pub use auth::{Actor, ACTOR_HEADER};
pub use security::{hsts_header, security_headers};
pub use self::tracing::{request_tracing, REQUEST_ID_HEADER};
