//! Service health handlers

use axum::{extract::State, http::StatusCode, Json};

use crate::db;
use crate::models::HealthResponse;
use crate::state::AppState;

pub async fn root() -> &'static str {
    "Loan Ledger API Server"
}

/// Health check endpoint
pub async fn health_check(
    State(app_state): State<AppState>,
) -> (StatusCode, Json<HealthResponse>) {
    let (db_status, latency_ms) = match &app_state.db_pool {
        Some(pool) => match db::check_health(pool).await {
            Ok(latency) => ("connected".to_string(), Some(latency.as_millis() as u64)),
            Err(e) => (format!("error: {}", e), None),
        },
        None => ("in-memory".to_string(), None),
    };

    let (code, status) = if db_status.starts_with("error") {
        (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
    } else {
        (StatusCode::OK, "healthy")
    };

    (
        code,
        Json(HealthResponse {
            status: status.to_string(),
            database: db_status,
            database_latency_ms: latency_ms,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
