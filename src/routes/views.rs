//! Materialized view query endpoint

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;
use std::collections::HashMap;

use crate::error::Result;
use crate::services::views::ViewRow;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ViewResponse {
    pub view: String,
    pub rows: Vec<ViewRow>,
}

/// GET /api/v1/views/:view
///
/// Query a materialized rollup view. The view name and every filter key
/// are validated against allow-lists; unknown names or keys are rejected
/// with 400 before any query runs.
pub async fn query_view(
    State(state): State<AppState>,
    Path(view): Path<String>,
    Query(filters): Query<HashMap<String, String>>,
) -> Result<Json<ViewResponse>> {
    let rows = state.views.query(&view, &filters)?;
    Ok(Json(ViewResponse { view, rows }))
}
