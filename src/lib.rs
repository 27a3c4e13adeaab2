//! Loan Ledger Library
//!
//! Loan status transitions and the investment ledger for a multi-investor
//! lending platform, backed by PostgreSQL, plus the HTTP API that fronts it.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;

pub use error::{ApiError, LedgerError};
pub use loan::LoanService;
pub use store::{LedgerStore, LedgerTx, MemoryLedger, PgLedger};
