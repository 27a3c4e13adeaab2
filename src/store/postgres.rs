//! PostgreSQL ledger store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{LedgerStore, LedgerTx};
use crate::error::LedgerError;
use crate::loan::{store_timestamp, Investment, Loan, LoanSnapshot, StatusChange, StatusHistoryEntry};

/// Ledger store backed by a PostgreSQL pool
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn begin(&self) -> Result<Box<dyn LedgerTx>, LedgerError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgLedgerTx { tx }))
    }
}

/// Open PostgreSQL transaction; sqlx rolls it back on drop
struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    loan_id: Uuid,
    before_snapshot: Json<LoanSnapshot>,
    after_snapshot: Json<LoanSnapshot>,
    actor_id: Option<String>,
    recorded_at: DateTime<Utc>,
}

impl From<HistoryRow> for StatusHistoryEntry {
    fn from(row: HistoryRow) -> Self {
        Self {
            id: row.id,
            loan_id: row.loan_id,
            before: row.before_snapshot.0,
            after: row.after_snapshot.0,
            actor_id: row.actor_id,
            recorded_at: row.recorded_at,
        }
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn insert_loan(&mut self, loan: &Loan) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO loans (
                id, borrower_id, principal_amount, interest_rate_bps, reason,
                status, agreement_document_ref, disburse_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(loan.id)
        .bind(&loan.borrower_id)
        .bind(loan.principal_amount)
        .bind(loan.interest_rate_bps)
        .bind(&loan.reason)
        .bind(loan.status)
        .bind(&loan.agreement_document_ref)
        .bind(loan.disburse_at)
        .bind(loan.created_at)
        .bind(loan.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn fetch_loan(&mut self, loan_id: Uuid) -> Result<Option<Loan>, LedgerError> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(loan)
    }

    async fn lock_loan(&mut self, loan_id: Uuid) -> Result<Option<Loan>, LedgerError> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?;

        Ok(loan)
    }

    async fn total_invested(&mut self, loan_id: Uuid) -> Result<i64, LedgerError> {
        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COALESCE(SUM(amount), 0)::BIGINT FROM loan_investments WHERE loan_id = $1",
        )
        .bind(loan_id)
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(total)
    }

    async fn insert_investment(&mut self, investment: &Investment) -> Result<(), LedgerError> {
        sqlx::query(
            r#"
            INSERT INTO loan_investments (id, loan_id, investor_id, amount, invested_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(investment.id)
        .bind(investment.loan_id)
        .bind(&investment.investor_id)
        .bind(investment.amount)
        .bind(investment.invested_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn apply_change(&mut self, change: &StatusChange) -> Result<bool, LedgerError> {
        // The row lock taken by UPDATE makes a concurrent writer wait, then
        // re-evaluate the version predicate against the committed row.
        let updated = sqlx::query(
            r#"
            UPDATE loans
            SET status = $1, updated_at = $2, agreement_document_ref = $3, disburse_at = $4
            WHERE id = $5 AND updated_at = $6 AND status = $7
            "#,
        )
        .bind(change.after.status)
        .bind(change.after.updated_at)
        .bind(&change.after.agreement_document_ref)
        .bind(change.after.disburse_at)
        .bind(change.loan_id)
        .bind(change.before.updated_at)
        .bind(change.before.status)
        .execute(&mut *self.tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO loan_status_history (
                loan_id, before_snapshot, after_snapshot, actor_id, recorded_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(change.loan_id)
        .bind(Json(&change.before))
        .bind(Json(&change.after))
        .bind(&change.actor_id)
        .bind(store_timestamp(Utc::now()))
        .execute(&mut *self.tx)
        .await?;

        Ok(true)
    }

    async fn investments(&mut self, loan_id: Uuid) -> Result<Vec<Investment>, LedgerError> {
        let investments = sqlx::query_as::<_, Investment>(
            "SELECT * FROM loan_investments WHERE loan_id = $1 ORDER BY invested_at, id",
        )
        .bind(loan_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(investments)
    }

    async fn history(&mut self, loan_id: Uuid) -> Result<Vec<StatusHistoryEntry>, LedgerError> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT id, loan_id, before_snapshot, after_snapshot, actor_id, recorded_at
            FROM loan_status_history
            WHERE loan_id = $1
            ORDER BY id
            "#,
        )
        .bind(loan_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(StatusHistoryEntry::from).collect())
    }

    async fn commit(self: Box<Self>) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }
}
