//! Route definitions for the loan ledger API

mod loan;

use axum::{routing::get, Router};

use crate::handlers::{health_check, root};
use crate::middleware;
use crate::state::AppState;

pub use loan::loan_routes;

/// Full application router with middleware applied
pub fn app_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .merge(loan_routes())
        .with_state(app_state)
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
