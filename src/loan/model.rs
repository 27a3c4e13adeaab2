//! Loan models and data structures for the loan ledger

use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: i128 = 10_000;

/// Loan lifecycle status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum LoanStatus {
    Proposed,
    Approved,
    Rejected,
    Funded,
    Disbursed,
}

impl LoanStatus {
    pub const ALL: [LoanStatus; 5] = [
        LoanStatus::Proposed,
        LoanStatus::Approved,
        LoanStatus::Rejected,
        LoanStatus::Funded,
        LoanStatus::Disbursed,
    ];

    /// Statuses reachable from `self` in one step.
    pub fn allowed_targets(self) -> &'static [LoanStatus] {
        match self {
            LoanStatus::Proposed => &[LoanStatus::Approved, LoanStatus::Rejected],
            LoanStatus::Approved => &[LoanStatus::Funded],
            LoanStatus::Funded => &[LoanStatus::Disbursed],
            LoanStatus::Rejected | LoanStatus::Disbursed => &[],
        }
    }

    /// Check whether `self -> target` is an edge of the lifecycle graph
    pub fn can_transition_to(self, target: LoanStatus) -> bool {
        self.allowed_targets().contains(&target)
    }

    /// Edges a staff member may take directly. Funding happens through
    /// investments and disbursement through the disbursement finalizer.
    pub fn is_staff_decision(self, target: LoanStatus) -> bool {
        self == LoanStatus::Proposed && self.can_transition_to(target)
    }

    pub fn is_terminal(self) -> bool {
        self.allowed_targets().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LoanStatus::Proposed => "proposed",
            LoanStatus::Approved => "approved",
            LoanStatus::Rejected => "rejected",
            LoanStatus::Funded => "funded",
            LoanStatus::Disbursed => "disbursed",
        }
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Loan {
    pub id: Uuid,
    pub borrower_id: String,
    pub principal_amount: i64, // minor currency units
    pub interest_rate_bps: i32,
    pub reason: String,
    pub status: LoanStatus,
    pub agreement_document_ref: Option<String>,
    pub disburse_at: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version token
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// The audit-relevant part of the loan at this instant.
    pub fn snapshot(&self) -> LoanSnapshot {
        LoanSnapshot {
            status: self.status,
            updated_at: self.updated_at,
            agreement_document_ref: self.agreement_document_ref.clone(),
            disburse_at: self.disburse_at,
        }
    }

    /// Interest earned over the loan term, in minor units (truncated).
    pub fn expected_return(&self) -> i64 {
        let value = i128::from(self.principal_amount) * i128::from(self.interest_rate_bps)
            / BPS_DENOMINATOR;
        i64::try_from(value).unwrap_or(i64::MAX)
    }
}

/// Status-bearing fields of a loan captured before or after a change
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct LoanSnapshot {
    pub status: LoanStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_document_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disburse_at: Option<NaiveDate>,
}

/// One investor's contribution to one loan
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Investment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub investor_id: String,
    pub amount: i64,
    pub invested_at: DateTime<Utc>,
}

/// Append-only audit record
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StatusHistoryEntry {
    pub id: i64,
    pub loan_id: Uuid,
    pub before: LoanSnapshot,
    pub after: LoanSnapshot,
    /// `None` for system-triggered transitions
    pub actor_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// A single loan mutation as handed to the store.
///
/// The store applies it as a compare-and-swap on `before` and appends the
/// matching history entry in the same transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub loan_id: Uuid,
    pub before: LoanSnapshot,
    pub after: LoanSnapshot,
    pub actor_id: Option<String>,
}

impl StatusChange {
    pub fn new(loan: &Loan, after: LoanSnapshot, actor_id: Option<String>) -> Self {
        Self {
            loan_id: loan.id,
            before: loan.snapshot(),
            after,
            actor_id,
        }
    }

    /// The loan as it reads once this change is applied.
    pub fn apply_to(&self, loan: &Loan) -> Loan {
        Loan {
            status: self.after.status,
            updated_at: self.after.updated_at,
            agreement_document_ref: self.after.agreement_document_ref.clone(),
            disburse_at: self.after.disburse_at,
            ..loan.clone()
        }
    }
}

/// Truncate to the store's timestamp resolution.
pub fn store_timestamp(at: DateTime<Utc>) -> DateTime<Utc> {
    at.trunc_subsecs(6)
}

/// Next version token: `now`, but always strictly after `previous`.
pub fn next_version(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = store_timestamp(now);
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}

/// Loan as returned to readers, with derived attributes
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct LoanProjection {
    #[serde(flatten)]
    pub loan: Loan,
    pub expected_return: i64,
    pub total_invested: i64,
    pub remaining_capacity: i64,
}

impl LoanProjection {
    pub fn new(loan: Loan, total_invested: i64) -> Self {
        Self {
            expected_return: loan.expected_return(),
            remaining_capacity: loan.principal_amount - total_invested,
            total_invested,
            loan,
        }
    }
}

/// Result of a successful contribution
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct InvestmentReceipt {
    pub investment: Investment,
    pub loan_status: LoanStatus,
    pub remaining_capacity: i64,
}

/// Request to propose a new loan
///
/// The rate may be given as `interest_rate_bps` or as a percentage in
/// `interest_rate` (at most two decimals, so `12.5` is 1250 bps).
#[derive(Debug, Deserialize, Validate, Clone)]
#[serde(try_from = "CreateLoanBody")]
pub struct CreateLoanRequest {
    #[validate(range(min = 1, message = "principal_amount must be positive"))]
    pub principal_amount: i64,
    #[validate(range(min = 0, message = "interest_rate_bps must not be negative"))]
    pub interest_rate_bps: i32,
    #[validate(custom = "not_blank")]
    pub reason: String,
}

#[derive(Deserialize)]
struct CreateLoanBody {
    principal_amount: i64,
    interest_rate_bps: Option<i32>,
    interest_rate: Option<f64>,
    reason: String,
}

impl TryFrom<CreateLoanBody> for CreateLoanRequest {
    type Error = String;

    fn try_from(body: CreateLoanBody) -> Result<Self, Self::Error> {
        let interest_rate_bps = match (body.interest_rate_bps, body.interest_rate) {
            (Some(bps), None) => bps,
            (None, Some(percent)) => percent_to_bps(percent)?,
            (Some(_), Some(_)) => {
                return Err("give either interest_rate or interest_rate_bps, not both".to_string())
            }
            (None, None) => return Err("interest_rate_bps is required".to_string()),
        };

        Ok(Self {
            principal_amount: body.principal_amount,
            interest_rate_bps,
            reason: body.reason,
        })
    }
}

/// Convert a percentage with up to two decimals to basis points.
fn percent_to_bps(percent: f64) -> Result<i32, String> {
    let scaled = percent * 100.0;
    let rounded = scaled.round();
    if !scaled.is_finite() || (scaled - rounded).abs() > 1e-6 {
        return Err(format!(
            "interest_rate {} must have at most two decimal places",
            percent
        ));
    }
    if rounded < i32::MIN as f64 || rounded > i32::MAX as f64 {
        return Err(format!("interest_rate {} is out of range", percent));
    }
    Ok(rounded as i32)
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be blank".into());
        return Err(err);
    }
    Ok(())
}

/// Request to move a loan along the status graph
#[derive(Debug, Deserialize, Clone)]
pub struct TransitionRequest {
    pub status: LoanStatus,
    /// The `updated_at` the caller last observed
    pub expected_version: Option<DateTime<Utc>>,
}

/// Request to contribute funds to an approved loan
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct InvestRequest {
    #[validate(range(min = 1, message = "amount must be positive"))]
    pub amount: i64,
}

/// Request to finalize disbursement of a funded loan
#[derive(Debug, Deserialize, Validate, Clone)]
pub struct DisburseRequest {
    #[validate(custom = "not_blank")]
    pub document_ref: String,
    pub disburse_at: NaiveDate,
}
