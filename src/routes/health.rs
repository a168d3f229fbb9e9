//! Health and readiness endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::models::StorageTier;
use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Readiness check response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize)]
pub struct ReadinessChecks {
    pub store: CheckStatus,
    pub scheduler: CheckStatus,
}

#[derive(Debug, Serialize)]
pub struct CheckStatus {
    pub healthy: bool,
    pub message: String,
}

/// GET /health
///
/// Basic health check - returns 200 if the server is running
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// GET /ready
///
/// Readiness check - verifies the store is reachable and jobs are scheduled
pub async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let store_check = match state.store.tier_usage(StorageTier::Hot).await {
        Ok(bytes) => CheckStatus {
            healthy: true,
            message: format!("Hot tier reachable ({} bytes)", bytes),
        },
        Err(e) => CheckStatus {
            healthy: false,
            message: e.safe_summary(),
        },
    };

    let jobs = state.scheduler.status();
    let scheduler_check = CheckStatus {
        healthy: !jobs.is_empty(),
        message: format!("{} jobs scheduled", jobs.len()),
    };

    let all_healthy = store_check.healthy && scheduler_check.healthy;
    let status = if all_healthy { "ready" } else { "not_ready" };
    let code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(ReadinessResponse {
            status,
            checks: ReadinessChecks {
                store: store_check,
                scheduler: scheduler_check,
            },
        }),
    )
}
