//! Backup listing and restore endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::Result;
use crate::models::{BackupManifest, JobType};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct BackupsResponse {
    pub backups: Vec<BackupManifest>,
}

#[derive(Debug, Serialize)]
pub struct BackupTriggeredResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct RestoreResponse {
    pub backup_id: String,
    pub status: &'static str,
}

/// GET /api/v1/backups
///
/// All known backups, newest first.
pub async fn list_backups(State(state): State<AppState>) -> Result<Json<BackupsResponse>> {
    Ok(Json(BackupsResponse {
        backups: state.backup.list()?,
    }))
}

/// POST /api/v1/backups
///
/// Trigger a backup via the scheduler; serialized against other
/// destructive operations.
pub async fn create_backup(
    State(state): State<AppState>,
) -> (StatusCode, Json<BackupTriggeredResponse>) {
    state.scheduler.trigger(JobType::Backup);
    (
        StatusCode::ACCEPTED,
        Json(BackupTriggeredResponse {
            status: "triggered",
        }),
    )
}

/// POST /api/v1/backups/:backup_id/restore
///
/// Restore a snapshot. All validation (manifest, checksums, entry paths)
/// happens before any live state changes; the call queues on the
/// destructive exclusion lock so it never interleaves with cleanup,
/// archival, or backup runs.
pub async fn restore_backup(
    State(state): State<AppState>,
    Path(backup_id): Path<String>,
) -> Result<Json<RestoreResponse>> {
    state.scheduler.restore(&backup_id).await?;
    Ok(Json(RestoreResponse {
        backup_id,
        status: "restored",
    }))
}
