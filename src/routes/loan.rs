//! Loan route definitions

use axum::{
    routing::{get, patch, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/v1/loans", post(create_loan))
        .route("/v1/loans/:id", get(get_loan))
        .route("/v1/loans/:id/status", patch(update_loan_status))
        .route(
            "/v1/loans/:id/investments",
            post(invest_in_loan).get(list_loan_investments),
        )
        .route("/v1/loans/:id/disburse", post(disburse_loan))
        .route("/v1/loans/:id/history", get(get_loan_history))
}
