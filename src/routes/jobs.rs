//! Scheduler status, history, and manual trigger endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::{LifecycleError, Result};
use crate::models::{JobType, OperationResult, ScheduledJob};
use crate::state::AppState;

/// Response for the job list endpoint
#[derive(Debug, Serialize)]
pub struct JobsResponse {
    pub jobs: Vec<ScheduledJob>,
}

/// Response for the job history endpoint
#[derive(Debug, Serialize)]
pub struct JobHistoryResponse {
    pub job_type: JobType,
    /// Oldest first, bounded by the history ring capacity
    pub results: Vec<OperationResult>,
}

/// Response acknowledging a manual trigger
#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub job_type: JobType,
    pub status: &'static str,
}

fn parse_job_type(raw: &str) -> Result<JobType> {
    raw.parse().map_err(LifecycleError::InvalidQuery)
}

/// GET /api/v1/jobs
///
/// Current state of every scheduled job. Read-only; never blocks on
/// running operations.
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobsResponse> {
    Json(JobsResponse {
        jobs: state.scheduler.status(),
    })
}

/// GET /api/v1/jobs/:job_type/history
///
/// Recent run results for one job type.
pub async fn job_history(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<Json<JobHistoryResponse>> {
    let job_type = parse_job_type(&job_type)?;
    Ok(Json(JobHistoryResponse {
        job_type,
        results: state.scheduler.history(job_type),
    }))
}

/// POST /api/v1/jobs/:job_type/trigger
///
/// Mark a job due immediately. The scheduler loop picks it up; destructive
/// jobs still serialize on the exclusion lock, so a trigger during a
/// conflicting run queues rather than interleaving.
pub async fn trigger_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<(StatusCode, Json<TriggerResponse>)> {
    let job_type = parse_job_type(&job_type)?;
    state.scheduler.trigger(job_type);
    Ok((
        StatusCode::ACCEPTED,
        Json(TriggerResponse {
            job_type,
            status: "triggered",
        }),
    ))
}
