//! Retention policy CRUD endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::{LifecycleError, Result};
use crate::models::RetentionPolicy;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PoliciesResponse {
    pub policies: Vec<RetentionPolicy>,
}

/// GET /api/v1/policies
pub async fn list_policies(State(state): State<AppState>) -> Json<PoliciesResponse> {
    Json(PoliciesResponse {
        policies: state.policies.list(),
    })
}

/// GET /api/v1/policies/:name
pub async fn get_policy(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RetentionPolicy>> {
    let policy = state
        .policies
        .get(&name)
        .ok_or_else(|| LifecycleError::NotFound(format!("policy '{}'", name)))?;
    Ok(Json(policy))
}

/// POST /api/v1/policies
///
/// Create a policy. Policy mutation counts as a destructive operation and
/// serializes against running cleanup/archival/backup via the scheduler.
pub async fn create_policy(
    State(state): State<AppState>,
    Json(policy): Json<RetentionPolicy>,
) -> Result<(StatusCode, Json<RetentionPolicy>)> {
    state.scheduler.add_policy(policy.clone()).await?;
    Ok((StatusCode::CREATED, Json(policy)))
}

/// PUT /api/v1/policies/:name
pub async fn update_policy(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(policy): Json<RetentionPolicy>,
) -> Result<Json<RetentionPolicy>> {
    if policy.name != name {
        return Err(LifecycleError::InvalidPolicy(
            "policy name in body does not match path".to_string(),
        ));
    }
    state.scheduler.update_policy(policy.clone()).await?;
    Ok(Json(policy))
}

/// DELETE /api/v1/policies/:name
pub async fn delete_policy(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode> {
    state.scheduler.remove_policy(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}
