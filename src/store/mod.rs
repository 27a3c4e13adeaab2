//! Ledger store: transactional access to loans, investments and history
//!
//! The service layer only talks to these traits. Every method on
//! [`LedgerTx`] runs inside one atomic unit; dropping a transaction without
//! calling [`LedgerTx::commit`] rolls it back, which is what makes deadline
//! expiry and caller cancellation safe.

mod memory;
mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::LedgerError;
use crate::loan::{Investment, Loan, StatusChange, StatusHistoryEntry};

pub use memory::MemoryLedger;
pub use postgres::PgLedger;

/// Source of atomic units against the ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Begin a new transaction.
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError>;
}

/// One open transaction.
///
/// A stored loan is only ever mutated through
/// [`apply_change`](LedgerTx::apply_change), which also writes the audit
/// entry.
#[async_trait]
pub trait LedgerTx: Send {
    /// Insert a newly proposed loan.
    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), LedgerError>;

    /// Plain point read, no lock taken.
    async fn fetch_loan(&mut self, loan_id: Uuid) -> Result<Option<Loan>, LedgerError>;

    /// Point read holding an exclusive row lock until commit or rollback.
    async fn lock_loan(&mut self, loan_id: Uuid) -> Result<Option<Loan>, LedgerError>;

    /// Sum of all investment amounts for the loan (0 if none).
    async fn total_invested(&mut self, loan_id: Uuid) -> Result<i64, LedgerError>;

    async fn insert_investment(&mut self, investment: &Investment) -> Result<(), LedgerError>;

    /// Compare-and-swap the loan from `change.before` to `change.after` and
    /// append the history entry.
    ///
    /// Returns `false` without writing anything when the stored loan no longer
    /// matches `change.before` (status and version).
    async fn apply_change(&mut self, change: &StatusChange) -> Result<bool, LedgerError>;

    /// Investments for the loan, oldest first.
    async fn investments(&mut self, loan_id: Uuid) -> Result<Vec<Investment>, LedgerError>;

    /// History entries for the loan, oldest first.
    async fn history(&mut self, loan_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LedgerError>;

    async fn commit(self: Box<Self>) -> Result<(), LedgerError>;
}
