//! Loan-related API handlers

use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    Json,
};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::loan::{
    CreateLoanRequest, DisburseRequest, InvestRequest, Investment, InvestmentReceipt, Loan,
    LoanProjection, LoanService, StatusHistoryEntry, TransitionRequest,
};
use crate::middleware::Actor;
use crate::models::ApiResponse;

/// Loan id taken from the `:id` path segment
pub struct LoanId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for LoanId
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(id) = Path::<Uuid>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ApiError::BadRequest(format!("invalid loan id: {}", rejection)))?;
        Ok(LoanId(id))
    }
}

/// Borrower proposes a new loan
pub async fn create_loan(
    State(service): State<Arc<LoanService>>,
    actor: Actor,
    Json(request): Json<CreateLoanRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Loan>>)> {
    let loan = service.create_loan(actor.id(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

/// Staff approves or rejects a proposed loan
pub async fn update_loan_status(
    State(service): State<Arc<LoanService>>,
    actor: Actor,
    LoanId(id): LoanId,
    Json(request): Json<TransitionRequest>,
) -> ApiResult<Json<ApiResponse<Loan>>> {
    let loan = service.transition_status(id, actor.id(), request).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// Investor contributes to an approved loan
pub async fn invest_in_loan(
    State(service): State<Arc<LoanService>>,
    actor: Actor,
    LoanId(id): LoanId,
    Json(request): Json<InvestRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<InvestmentReceipt>>)> {
    let receipt = service.add_investment(id, actor.id(), request).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(receipt))))
}

/// Staff disburses a funded loan
///
/// The agreement document is uploaded elsewhere; only its reference is
/// recorded here.
pub async fn disburse_loan(
    State(service): State<Arc<LoanService>>,
    actor: Actor,
    LoanId(id): LoanId,
    Json(request): Json<DisburseRequest>,
) -> ApiResult<Json<ApiResponse<Loan>>> {
    let loan = service.disburse(id, actor.id(), request).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// Get a single loan with derived attributes
pub async fn get_loan(
    State(service): State<Arc<LoanService>>,
    LoanId(id): LoanId,
) -> ApiResult<Json<ApiResponse<LoanProjection>>> {
    let loan = service.get_loan(id).await?;
    Ok(Json(ApiResponse::ok(loan)))
}

/// Status audit trail of a loan
pub async fn get_loan_history(
    State(service): State<Arc<LoanService>>,
    LoanId(id): LoanId,
) -> ApiResult<Json<ApiResponse<Vec<StatusHistoryEntry>>>> {
    let history = service.status_history(id).await?;
    Ok(Json(ApiResponse::ok(history)))
}

/// Contributions recorded against a loan
pub async fn list_loan_investments(
    State(service): State<Arc<LoanService>>,
    LoanId(id): LoanId,
) -> ApiResult<Json<ApiResponse<Vec<Investment>>>> {
    let investments = service.investments(id).await?;
    Ok(Json(ApiResponse::ok(investments)))
}
