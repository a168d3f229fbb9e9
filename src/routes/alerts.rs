//! Alert listing endpoints

use axum::{
    extract::{Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::models::Alert;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AlertsQuery {
    /// When true, only unresolved alerts are returned
    #[serde(default)]
    pub open: bool,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<Alert>,
}

/// GET /api/v1/alerts
///
/// All alerts, newest last. `?open=true` filters to unresolved ones.
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertsQuery>,
) -> Json<AlertsResponse> {
    let alerts = if params.open {
        state.monitor.open_alerts()
    } else {
        state.monitor.alerts()
    };
    Json(AlertsResponse { alerts })
}
