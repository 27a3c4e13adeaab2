//! Loan domain module
//!
//! Contains the loan models, the status graph, and the service that runs the
//! lifecycle operations against a ledger store.

mod model;
mod service;

pub use model::*;
pub use service::LoanService;
