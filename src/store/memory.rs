//! In-process ledger store
//!
//! Mirrors the PostgreSQL behaviour the service relies on: per-loan
//! exclusive row locks held until the transaction ends, conditional updates
//! evaluated against the committed row under that lock, and writes that stay
//! invisible to other transactions until commit.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx};
use crate::error::LedgerError;
use crate::loan::{store_timestamp, Investment, Loan, StatusChange, StatusHistoryEntry};

#[derive(Default)]
struct Tables {
    loans: HashMap<Uuid, Loan>,
    investments: Vec<Investment>,
    history: Vec<StatusHistoryEntry>,
    next_history_id: i64,
}

type RowLocks = Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>;

/// Ledger store kept in memory, shared by clones
#[derive(Clone, Default)]
pub struct MemoryLedger {
    tables: Arc<RwLock<Tables>>,
    row_locks: RowLocks,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        Ok(Box::new(MemoryTx {
            tables: self.tables.clone(),
            row_locks: self.row_locks.clone(),
            held: HashMap::new(),
            staged_loans: HashMap::new(),
            staged_investments: Vec::new(),
            staged_history: Vec::new(),
        }))
    }
}

struct PendingEntry {
    change: StatusChange,
    recorded_at: chrono::DateTime<Utc>,
}

/// Buffered transaction; dropping it discards the staged writes and releases
/// its row locks
struct MemoryTx {
    tables: Arc<RwLock<Tables>>,
    row_locks: RowLocks,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    staged_loans: HashMap<Uuid, Loan>,
    staged_investments: Vec<Investment>,
    staged_history: Vec<PendingEntry>,
}

impl MemoryTx {
    async fn acquire_row(&mut self, loan_id: Uuid) {
        if self.held.contains_key(&loan_id) {
            return;
        }
        let row = {
            let mut locks = self.row_locks.lock().await;
            // An entry nobody holds or waits on only has the map's reference.
            locks.retain(|_, row| Arc::strong_count(row) > 1);
            locks.entry(loan_id).or_default().clone()
        };
        let guard = row.lock_owned().await;
        self.held.insert(loan_id, guard);
    }

    async fn read_loan(&self, loan_id: Uuid) -> Option<Loan> {
        if let Some(loan) = self.staged_loans.get(&loan_id) {
            return Some(loan.clone());
        }
        self.tables.read().await.loans.get(&loan_id).cloned()
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), LedgerError> {
        if self.read_loan(loan.id).await.is_some() {
            return Err(LedgerError::StoreUnavailable(format!(
                "duplicate loan id {}",
                loan.id
            )));
        }
        self.staged_loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn fetch_loan(&mut self, loan_id: Uuid) -> Result<Option<Loan>, LedgerError> {
        Ok(self.read_loan(loan_id).await)
    }

    async fn lock_loan(&mut self, loan_id: Uuid) -> Result<Option<Loan>, LedgerError> {
        self.acquire_row(loan_id).await;
        Ok(self.read_loan(loan_id).await)
    }

    async fn total_invested(&mut self, loan_id: Uuid) -> Result<i64, LedgerError> {
        let committed: i64 = self
            .tables
            .read()
            .await
            .investments
            .iter()
            .filter(|i| i.loan_id == loan_id)
            .map(|i| i.amount)
            .sum();
        let staged: i64 = self
            .staged_investments
            .iter()
            .filter(|i| i.loan_id == loan_id)
            .map(|i| i.amount)
            .sum();
        Ok(committed + staged)
    }

    async fn insert_investment(&mut self, investment: &Investment) -> Result<(), LedgerError> {
        if self.read_loan(investment.loan_id).await.is_none() {
            return Err(LedgerError::StoreUnavailable(format!(
                "investment references unknown loan {}",
                investment.loan_id
            )));
        }
        self.staged_investments.push(investment.clone());
        Ok(())
    }

    async fn apply_change(&mut self, change: &StatusChange) -> Result<bool, LedgerError> {
        self.acquire_row(change.loan_id).await;

        let Some(current) = self.read_loan(change.loan_id).await else {
            return Ok(false);
        };
        if current.updated_at != change.before.updated_at
            || current.status != change.before.status
        {
            return Ok(false);
        }

        self.staged_loans
            .insert(change.loan_id, change.apply_to(&current));
        self.staged_history.push(PendingEntry {
            change: change.clone(),
            recorded_at: store_timestamp(Utc::now()),
        });
        Ok(true)
    }

    async fn investments(&mut self, loan_id: Uuid) -> Result<Vec<Investment>, LedgerError> {
        let mut investments: Vec<Investment> = self
            .tables
            .read()
            .await
            .investments
            .iter()
            .filter(|i| i.loan_id == loan_id)
            .cloned()
            .collect();
        investments.extend(
            self.staged_investments
                .iter()
                .filter(|i| i.loan_id == loan_id)
                .cloned(),
        );
        Ok(investments)
    }

    async fn history(&mut self, loan_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
        let tables = self.tables.read().await;
        let mut entries: Vec<StatusHistoryEntry> = tables
            .history
            .iter()
            .filter(|e| e.loan_id == loan_id)
            .cloned()
            .collect();
        let mut next_id = tables.next_history_id;
        for pending in self.staged_history.iter().filter(|p| p.change.loan_id == loan_id) {
            next_id += 1;
            entries.push(pending.to_entry(next_id));
        }
        Ok(entries)
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        let MemoryTx {
            tables,
            held,
            staged_loans,
            staged_investments,
            staged_history,
            ..
        } = *self;

        {
            let mut tables = tables.write().await;
            tables.loans.extend(staged_loans);
            tables.investments.extend(staged_investments);
            for pending in staged_history {
                tables.next_history_id += 1;
                let entry = pending.to_entry(tables.next_history_id);
                tables.history.push(entry);
            }
        }

        // Row locks are released only once the writes are visible.
        drop(held);
        Ok(())
    }
}

impl PendingEntry {
    fn to_entry(&self, id: i64) -> StatusHistoryEntry {
        StatusHistoryEntry {
            id,
            loan_id: self.change.loan_id,
            before: self.change.before.clone(),
            after: self.change.after.clone(),
            actor_id: self.change.actor_id.clone(),
            recorded_at: self.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loan::{next_version, LoanSnapshot, LoanStatus};

    fn new_loan() -> Loan {
        let now = store_timestamp(Utc::now());
        Loan {
            id: Uuid::new_v4(),
            borrower_id: "borrower-1".to_string(),
            principal_amount: 1_000,
            interest_rate_bps: 500,
            reason: "equipment".to_string(),
            status: LoanStatus::Proposed,
            agreement_document_ref: None,
            disburse_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn approve(loan: &Loan, actor: &str) -> StatusChange {
        StatusChange::new(
            loan,
            LoanSnapshot {
                status: LoanStatus::Approved,
                updated_at: next_version(loan.updated_at, Utc::now()),
                agreement_document_ref: None,
                disburse_at: None,
            },
            Some(actor.to_string()),
        )
    }

    async fn seed(store: &MemoryLedger, loan: &Loan) {
        let mut tx = store.begin().await.unwrap();
        tx.insert_loan(loan).await.unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = MemoryLedger::new();
        let loan = new_loan();

        let mut writer = store.begin().await.unwrap();
        writer.insert_loan(&loan).await.unwrap();

        let mut reader = store.begin().await.unwrap();
        assert!(reader.fetch_loan(loan.id).await.unwrap().is_none());

        writer.commit().await.unwrap();
        assert!(reader.fetch_loan(loan.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_rollback_on_drop() {
        let store = MemoryLedger::new();
        let loan = new_loan();
        seed(&store, &loan).await;

        {
            let mut tx = store.begin().await.unwrap();
            assert!(tx.apply_change(&approve(&loan, "staff-a")).await.unwrap());
            // dropped without commit
        }

        let mut tx = store.begin().await.unwrap();
        let stored = tx.fetch_loan(loan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, LoanStatus::Proposed);
        assert!(tx.history(loan.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_change_is_rejected_after_concurrent_commit() {
        let store = MemoryLedger::new();
        let loan = new_loan();
        seed(&store, &loan).await;

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        let seen_by_first = first.fetch_loan(loan.id).await.unwrap().unwrap();
        let seen_by_second = second.fetch_loan(loan.id).await.unwrap().unwrap();

        assert!(first
            .apply_change(&approve(&seen_by_first, "staff-a"))
            .await
            .unwrap());
        first.commit().await.unwrap();

        assert!(!second
            .apply_change(&approve(&seen_by_second, "staff-b"))
            .await
            .unwrap());
        second.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let history = tx.history(loan.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].actor_id.as_deref(), Some("staff-a"));
        assert_eq!(history[0].id, 1);
    }

    #[tokio::test]
    async fn test_row_lock_blocks_until_commit() {
        let store = MemoryLedger::new();
        let loan = new_loan();
        seed(&store, &loan).await;

        let mut holder = store.begin().await.unwrap();
        holder.lock_loan(loan.id).await.unwrap();

        let contender_store = store.clone();
        let loan_id = loan.id;
        let contender = tokio::spawn(async move {
            let mut tx = contender_store.begin().await.unwrap();
            tx.lock_loan(loan_id).await.unwrap()
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        holder.commit().await.unwrap();
        let locked = contender.await.unwrap();
        assert!(locked.is_some());
    }

    #[tokio::test]
    async fn test_released_row_locks_are_pruned() {
        let store = MemoryLedger::new();
        let first = new_loan();
        let second = new_loan();
        seed(&store, &first).await;
        seed(&store, &second).await;

        let mut tx = store.begin().await.unwrap();
        tx.lock_loan(first.id).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.lock_loan(second.id).await.unwrap();
        {
            let locks = store.row_locks.lock().await;
            assert_eq!(locks.len(), 1);
            assert!(locks.contains_key(&second.id));
        }
        drop(tx);

        // A rolled-back holder is pruned as well, while a live one is kept.
        let mut holder = store.begin().await.unwrap();
        holder.lock_loan(first.id).await.unwrap();
        let locks = store.row_locks.lock().await;
        assert_eq!(locks.len(), 1);
        assert!(locks.contains_key(&first.id));
    }

    #[tokio::test]
    async fn test_total_invested_includes_staged() {
        let store = MemoryLedger::new();
        let loan = new_loan();
        seed(&store, &loan).await;

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.total_invested(loan.id).await.unwrap(), 0);
        tx.insert_investment(&Investment {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            investor_id: "investor-1".to_string(),
            amount: 250,
            invested_at: store_timestamp(Utc::now()),
        })
        .await
        .unwrap();
        assert_eq!(tx.total_invested(loan.id).await.unwrap(), 250);
        assert_eq!(tx.investments(loan.id).await.unwrap().len(), 1);
    }
}
