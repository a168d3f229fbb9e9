//! Materialized rollup views over the warm tier

use crate::error::{LifecycleError, Result};
use crate::history::HistoryRing;
use crate::models::{OperationResult, StorageTier, TimeRange};
use crate::store::{FilterValue, QueryFilter, TimeSeriesStore};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Known views and their bucket widths in seconds. Both the view names and
/// the filter keys below are the entire vocabulary accepted from callers;
/// anything else is rejected before any query is constructed.
const ALLOWED_VIEWS: [(&str, i64); 2] = [("rollup_hourly", 3_600), ("rollup_daily", 86_400)];

const ALLOWED_FILTER_KEYS: [&str; 4] = ["series", "entity", "min_value", "max_value"];

/// One materialized rollup row
#[derive(Debug, Clone, Serialize)]
pub struct ViewRow {
    pub series: String,
    pub entity: String,
    pub bucket_start: DateTime<Utc>,
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

/// Runs scheduled rollup queries over the warm tier and serves allow-listed
/// ad-hoc queries against the cached rollups.
pub struct ViewManager {
    store: Arc<dyn TimeSeriesStore>,
    cache: RwLock<HashMap<String, Vec<ViewRow>>>,
    history: HistoryRing,
}

impl ViewManager {
    pub fn new(store: Arc<dyn TimeSeriesStore>, history_capacity: usize) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
            history: HistoryRing::new(history_capacity),
        }
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Recompute one view from the warm tier. Unknown names fail with
    /// `InvalidQuery` before any store access.
    pub async fn refresh(&self, view_name: &str) -> Result<usize> {
        let bucket_secs = bucket_for_view(view_name)?;

        let mut rows = Vec::new();
        let now = Utc::now();
        for series in self.store.series(StorageTier::Warm).await? {
            let source = self
                .store
                .query(StorageTier::Warm, TimeRange::until(now), &series, &[])
                .await?;
            rows.extend(rollup(&series, &source, bucket_secs));
        }

        debug!(view = view_name, rows = rows.len(), "View refreshed");
        let count = rows.len();
        self.cache.write().insert(view_name.to_string(), rows);
        Ok(count)
    }

    /// Scheduled entry point: refresh every known view.
    pub async fn run(&self) -> Result<usize> {
        let started_at = Utc::now();
        let mut total = 0;
        for (view_name, _) in ALLOWED_VIEWS {
            match self.refresh(view_name).await {
                Ok(count) => total += count,
                Err(e) => {
                    self.history
                        .push(OperationResult::failure(started_at, total as u64, e.safe_summary()));
                    return Err(e);
                }
            }
        }
        info!(rows = total, "All views refreshed");
        self.history
            .push(OperationResult::success(started_at, total as u64));
        Ok(total)
    }

    /// Query a view with allow-listed filters.
    ///
    /// Every filter key must be in the allow-list and every value is carried
    /// as a bound `QueryFilter`, never interpolated; an unknown view name or
    /// key fails with `InvalidQuery` and issues no query anywhere.
    pub fn query(
        &self,
        view_name: &str,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<ViewRow>> {
        bucket_for_view(view_name)?;
        let bound = bind_filters(filters)?;

        let cache = self.cache.read();
        let rows = cache.get(view_name).cloned().unwrap_or_default();
        Ok(rows
            .into_iter()
            .filter(|row| bound.iter().all(|f| matches_view_row(f, row)))
            .collect())
    }
}

fn bucket_for_view(view_name: &str) -> Result<i64> {
    ALLOWED_VIEWS
        .iter()
        .find(|(name, _)| *name == view_name)
        .map(|(_, secs)| *secs)
        .ok_or_else(|| LifecycleError::InvalidQuery(format!("unknown view '{}'", view_name)))
}

/// Validate filter keys against the allow-list and convert values into
/// bound parameters.
fn bind_filters(filters: &HashMap<String, String>) -> Result<Vec<QueryFilter>> {
    let mut bound = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        if !ALLOWED_FILTER_KEYS.contains(&key.as_str()) {
            return Err(LifecycleError::InvalidQuery(format!(
                "unknown filter key '{}'",
                key
            )));
        }
        let filter = match key.as_str() {
            "min_value" | "max_value" => {
                let number: f64 = value.parse().map_err(|_| {
                    LifecycleError::InvalidQuery(format!(
                        "filter '{}' expects a numeric value",
                        key
                    ))
                })?;
                QueryFilter::number(key, number)
            }
            _ => QueryFilter::text(key, value),
        };
        bound.push(filter);
    }
    Ok(bound)
}

fn matches_view_row(filter: &QueryFilter, row: &ViewRow) -> bool {
    match (filter.key.as_str(), &filter.value) {
        ("series", FilterValue::Text(v)) => row.series == *v,
        ("entity", FilterValue::Text(v)) => row.entity == *v,
        ("min_value", FilterValue::Number(v)) => row.mean >= *v,
        ("max_value", FilterValue::Number(v)) => row.mean <= *v,
        _ => false,
    }
}

fn rollup(series: &str, rows: &[crate::models::EventRow], bucket_secs: i64) -> Vec<ViewRow> {
    let mut buckets: BTreeMap<(i64, String), Vec<f64>> = BTreeMap::new();
    for row in rows {
        let secs = row.recorded_at.timestamp();
        let bucket = secs - secs.rem_euclid(bucket_secs);
        buckets
            .entry((bucket, row.entity.clone()))
            .or_default()
            .push(row.value);
    }
    buckets
        .into_iter()
        .map(|((bucket, entity), values)| {
            let count = values.len() as u64;
            let sum: f64 = values.iter().sum();
            ViewRow {
                series: series.to_string(),
                entity,
                bucket_start: Utc.timestamp_opt(bucket, 0).single().unwrap_or_else(Utc::now),
                count,
                mean: sum / count as f64,
                min: values.iter().cloned().fold(f64::INFINITY, f64::min),
                max: values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                sum,
            }
        })
        .collect()
}
