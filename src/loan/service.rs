//! Loan service layer - lifecycle operations over the ledger store
//!
//! Status edits use optimistic concurrency: the loan is read without a lock
//! and the write is a compare-and-swap on `updated_at`. Investments and
//! disbursement take the loan's row lock for the whole read-aggregate-write
//! sequence. Every loan mutation goes through [`record_change`], which writes
//! the history entry in the same transaction.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::error::LedgerError;
use crate::loan::{
    next_version, store_timestamp, CreateLoanRequest, DisburseRequest, InvestRequest, Investment,
    InvestmentReceipt, Loan, LoanProjection, LoanSnapshot, LoanStatus, StatusChange,
    StatusHistoryEntry, TransitionRequest,
};
use crate::store::{LedgerStore, LedgerTx};

/// Loan service for managing the loan lifecycle
#[derive(Clone)]
pub struct LoanService {
    store: Arc<dyn LedgerStore>,
    operation_timeout: Duration,
}

impl LoanService {
    /// Create a new loan service instance
    pub fn new(store: Arc<dyn LedgerStore>, operation_timeout: Duration) -> Self {
        Self {
            store,
            operation_timeout,
        }
    }

    /// Propose a new loan on behalf of a borrower
    pub async fn create_loan(
        &self,
        borrower_id: &str,
        request: CreateLoanRequest,
    ) -> Result<Loan, LedgerError> {
        require_actor(borrower_id)?;
        request.validate()?;

        let now = store_timestamp(Utc::now());
        let loan = Loan {
            id: Uuid::new_v4(),
            borrower_id: borrower_id.to_string(),
            principal_amount: request.principal_amount,
            interest_rate_bps: request.interest_rate_bps,
            reason: request.reason,
            status: LoanStatus::Proposed,
            agreement_document_ref: None,
            disburse_at: None,
            created_at: now,
            updated_at: now,
        };

        self.within("create_loan", async {
            let mut tx = self.store.begin().await?;
            tx.insert_loan(&loan).await?;
            tx.commit().await
        })
        .await?;

        tracing::info!(
            loan_id = %loan.id,
            borrower = %loan.borrower_id,
            principal = loan.principal_amount,
            rate_bps = loan.interest_rate_bps,
            "Loan proposed"
        );

        Ok(loan)
    }

    /// Approve or reject a proposed loan on a staff decision
    pub async fn transition_status(
        &self,
        loan_id: Uuid,
        actor_id: &str,
        request: TransitionRequest,
    ) -> Result<Loan, LedgerError> {
        require_actor(actor_id)?;
        let target = request.status;

        self.within("transition_status", async {
            let mut tx = self.store.begin().await?;

            let loan = tx
                .fetch_loan(loan_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(loan_id))?;

            if let Some(expected) = request.expected_version {
                if expected != loan.updated_at {
                    tracing::warn!(
                        loan_id = %loan_id,
                        actor = %actor_id,
                        expected = %expected,
                        current = %loan.updated_at,
                        "Status change based on a stale version"
                    );
                    return Err(LedgerError::Conflict);
                }
            }

            if !loan.status.is_staff_decision(target) {
                tracing::warn!(
                    loan_id = %loan_id,
                    from = %loan.status,
                    to = %target,
                    "Rejected illegal status transition"
                );
                return Err(LedgerError::InvalidTransition {
                    from: loan.status,
                    to: target,
                });
            }

            let after = LoanSnapshot {
                status: target,
                updated_at: next_version(loan.updated_at, Utc::now()),
                ..loan.snapshot()
            };
            let updated = record_change(tx.as_mut(), &loan, after, Some(actor_id)).await?;
            tx.commit().await?;

            tracing::info!(
                loan_id = %loan_id,
                from = %loan.status,
                to = %target,
                actor = %actor_id,
                "Loan status updated"
            );
            Ok::<_, LedgerError>(updated)
        })
        .await
    }

    /// Record an investor's contribution, funding the loan when it saturates
    /// the principal exactly
    pub async fn add_investment(
        &self,
        loan_id: Uuid,
        investor_id: &str,
        request: InvestRequest,
    ) -> Result<InvestmentReceipt, LedgerError> {
        require_actor(investor_id)?;
        request.validate()?;
        let amount = request.amount;

        self.within("add_investment", async {
            let mut tx = self.store.begin().await?;

            // Serializes every contributor to this loan until commit.
            let loan = tx
                .lock_loan(loan_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(loan_id))?;

            if loan.status != LoanStatus::Approved {
                tracing::warn!(loan_id = %loan_id, status = %loan.status, "Loan not open for investment");
                return Err(LedgerError::NotInvestable(loan.status));
            }

            let total_invested = tx.total_invested(loan_id).await?;
            let remaining = loan.principal_amount - total_invested;
            if amount > remaining {
                tracing::warn!(
                    loan_id = %loan_id,
                    investor = %investor_id,
                    amount,
                    remaining,
                    "Investment exceeds remaining capacity"
                );
                return Err(LedgerError::OverInvestment {
                    requested: amount,
                    remaining,
                });
            }

            let investment = Investment {
                id: Uuid::new_v4(),
                loan_id,
                investor_id: investor_id.to_string(),
                amount,
                invested_at: store_timestamp(Utc::now()),
            };
            tx.insert_investment(&investment).await?;

            let loan_status = if amount == remaining {
                let after = LoanSnapshot {
                    status: LoanStatus::Funded,
                    updated_at: next_version(loan.updated_at, Utc::now()),
                    ..loan.snapshot()
                };
                record_change(tx.as_mut(), &loan, after, None).await?.status
            } else {
                loan.status
            };

            tx.commit().await?;

            tracing::info!(
                loan_id = %loan_id,
                investor = %investor_id,
                amount,
                remaining = remaining - amount,
                status = %loan_status,
                "Investment recorded"
            );

            Ok::<_, LedgerError>(InvestmentReceipt {
                investment,
                loan_status,
                remaining_capacity: remaining - amount,
            })
        })
        .await
    }

    /// Finalize a funded loan with its signed agreement reference
    pub async fn disburse(
        &self,
        loan_id: Uuid,
        staff_id: &str,
        request: DisburseRequest,
    ) -> Result<Loan, LedgerError> {
        require_actor(staff_id)?;
        request.validate()?;

        self.within("disburse", async {
            let mut tx = self.store.begin().await?;

            let loan = tx
                .lock_loan(loan_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(loan_id))?;

            if loan.status != LoanStatus::Funded {
                tracing::warn!(loan_id = %loan_id, status = %loan.status, "Loan not ready for disbursement");
                return Err(LedgerError::NotReady(loan.status));
            }

            let after = LoanSnapshot {
                status: LoanStatus::Disbursed,
                updated_at: next_version(loan.updated_at, Utc::now()),
                agreement_document_ref: Some(request.document_ref.clone()),
                disburse_at: Some(request.disburse_at),
            };
            let updated = record_change(tx.as_mut(), &loan, after, Some(staff_id)).await?;
            tx.commit().await?;

            tracing::info!(
                loan_id = %loan_id,
                staff = %staff_id,
                disburse_at = %request.disburse_at,
                "Loan disbursed"
            );
            Ok::<_, LedgerError>(updated)
        })
        .await
    }

    /// Get a loan with its derived attributes
    pub async fn get_loan(&self, loan_id: Uuid) -> Result<LoanProjection, LedgerError> {
        self.within("get_loan", async {
            let mut tx = self.store.begin().await?;
            let loan = tx
                .fetch_loan(loan_id)
                .await?
                .ok_or_else(|| LedgerError::not_found(loan_id))?;
            let total_invested = tx.total_invested(loan_id).await?;
            tx.commit().await?;

            Ok::<_, LedgerError>(LoanProjection::new(loan, total_invested))
        })
        .await
    }

    /// Audit trail of a loan, oldest first
    pub async fn status_history(
        &self,
        loan_id: Uuid,
    ) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
        self.within("status_history", async {
            let mut tx = self.store.begin().await?;
            ensure_exists(tx.as_mut(), loan_id).await?;
            let history = tx.history(loan_id).await?;
            tx.commit().await?;
            Ok::<_, LedgerError>(history)
        })
        .await
    }

    /// Contributions to a loan, oldest first
    pub async fn investments(&self, loan_id: Uuid) -> Result<Vec<Investment>, LedgerError> {
        self.within("investments", async {
            let mut tx = self.store.begin().await?;
            ensure_exists(tx.as_mut(), loan_id).await?;
            let investments = tx.investments(loan_id).await?;
            tx.commit().await?;
            Ok::<_, LedgerError>(investments)
        })
        .await
    }

    /// Run one atomic unit under the operation deadline.
    ///
    /// On expiry the future is dropped, which drops its open transaction and
    /// rolls it back.
    async fn within<T, F>(&self, operation: &'static str, unit: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.operation_timeout, unit).await {
            Ok(result) => {
                if let Err(LedgerError::StoreUnavailable(reason)) = &result {
                    tracing::error!(operation, error = %reason, "Ledger store failure");
                }
                result
            }
            Err(_) => {
                tracing::error!(
                    operation,
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Ledger operation exceeded its deadline and was rolled back"
                );
                Err(LedgerError::StoreUnavailable(format!(
                    "{} exceeded deadline of {}ms",
                    operation,
                    self.operation_timeout.as_millis()
                )))
            }
        }
    }
}

/// Apply a loan mutation together with its history entry.
async fn record_change(
    tx: &mut dyn LedgerTx,
    loan: &Loan,
    after: LoanSnapshot,
    actor_id: Option<&str>,
) -> Result<Loan, LedgerError> {
    let change = StatusChange::new(loan, after, actor_id.map(str::to_string));
    if !tx.apply_change(&change).await? {
        tracing::warn!(loan_id = %loan.id, version = %loan.updated_at, "Loan version changed under us");
        return Err(LedgerError::Conflict);
    }
    Ok(change.apply_to(loan))
}

async fn ensure_exists(tx: &mut dyn LedgerTx, loan_id: Uuid) -> Result<(), LedgerError> {
    match tx.fetch_loan(loan_id).await? {
        Some(_) => Ok(()),
        None => Err(LedgerError::not_found(loan_id)),
    }
}

fn require_actor(actor_id: &str) -> Result<(), LedgerError> {
    if actor_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput("actor id is required".to_string()));
    }
    Ok(())
}
