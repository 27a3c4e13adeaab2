//! Error types for the loan ledger
//!
//! `LedgerError` is the failure taxonomy of the ledger operations. `ApiError`
//! wraps it for HTTP responses with status code mapping and a JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::loan::LoanStatus;

/// Failure of a single ledger operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Loan not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: LoanStatus, to: LoanStatus },

    #[error("Loan was modified concurrently; re-read and retry")]
    Conflict,

    #[error("Loan is not open for investment (status: {0})")]
    NotInvestable(LoanStatus),

    #[error("Investment of {requested} exceeds remaining capacity of {remaining}")]
    OverInvestment { requested: i64, remaining: i64 },

    #[error("Loan is not ready for disbursement (status: {0})")]
    NotReady(LoanStatus),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ledger store unavailable: {0}")]
    StoreUnavailable(String),
}

impl LedgerError {
    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::Conflict => "VERSION_CONFLICT",
            LedgerError::NotInvestable(_) => "NOT_INVESTABLE",
            LedgerError::OverInvestment { .. } => "OVER_INVESTMENT",
            LedgerError::NotReady(_) => "NOT_READY",
            LedgerError::InvalidInput(_) => "INVALID_INPUT",
            LedgerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    /// Whether the caller may retry the same command
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Conflict | LedgerError::StoreUnavailable(_))
    }

    pub fn not_found(loan_id: impl std::fmt::Display) -> Self {
        LedgerError::NotFound(loan_id.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        LedgerError::StoreUnavailable(err.to_string())
    }
}

/// API error type with HTTP status code mapping
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

/// JSON error response body
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

/// Error details in the response
#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

impl ApiError {
    /// Get the error code string
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Ledger(err) => err.error_code(),
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Ledger(err) => match err {
                LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
                LedgerError::InvalidTransition { .. } | LedgerError::Conflict => {
                    StatusCode::CONFLICT
                }
                LedgerError::NotInvestable(_)
                | LedgerError::OverInvestment { .. }
                | LedgerError::NotReady(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                LedgerError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Ledger(err) if err.is_retryable())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();
        let message = self.to_string();

        // Log server errors
        if status.is_server_error() {
            tracing::error!(error = %message, code = %error_code, "Server error occurred");
        } else {
            tracing::debug!(error = %message, code = %error_code, "Client error occurred");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: error_code.to_string(),
                message,
                retryable: self.is_retryable(),
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(err: validator::ValidationErrors) -> Self {
        LedgerError::InvalidInput(err.to_string())
    }
}

/// Result type alias using ApiError
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(LedgerError::Conflict.error_code(), "VERSION_CONFLICT");
        assert_eq!(
            LedgerError::OverInvestment {
                requested: 700,
                remaining: 600
            }
            .error_code(),
            "OVER_INVESTMENT"
        );
        assert_eq!(
            ApiError::Unauthorized("test".to_string()).error_code(),
            "UNAUTHORIZED"
        );
        assert_eq!(
            ApiError::from(LedgerError::NotReady(LoanStatus::Approved)).error_code(),
            "NOT_READY"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::from(LedgerError::not_found("x")).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(LedgerError::Conflict).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(LedgerError::NotInvestable(LoanStatus::Funded)).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::from(LedgerError::StoreUnavailable("down".to_string())).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::BadRequest("test".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(LedgerError::Conflict.is_retryable());
        assert!(LedgerError::StoreUnavailable("io".to_string()).is_retryable());
        assert!(!LedgerError::InvalidTransition {
            from: LoanStatus::Rejected,
            to: LoanStatus::Approved
        }
        .is_retryable());
        assert!(!LedgerError::NotFound("x".to_string()).is_retryable());
    }

    #[test]
    fn test_sqlx_errors_map_to_store_unavailable() {
        let err: LedgerError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, LedgerError::StoreUnavailable(_)));
    }
}
