//! Opaque store interfaces consumed by the lifecycle engine
//!
//! The engine treats both the time-series store and object storage as
//! external collaborators behind these traits. Production deployments use
//! the PostgreSQL/TimescaleDB backend; the in-memory backends serve
//! standalone mode and tests.

pub mod fs_object;
pub mod memory;
pub mod postgres;

use crate::error::Result;
use crate::models::{EventRow, StorageTier, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// A filter value carried as a bound parameter, never interpolated into
/// query text.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Number(f64),
}

/// One bound filter predicate. The key must already be validated against
/// an allow-list before a `QueryFilter` is constructed from user input.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    pub key: String,
    pub value: FilterValue,
}

impl QueryFilter {
    pub fn text(key: &str, value: &str) -> Self {
        Self {
            key: key.to_string(),
            value: FilterValue::Text(value.to_string()),
        }
    }

    pub fn number(key: &str, value: f64) -> Self {
        Self {
            key: key.to_string(),
            value: FilterValue::Number(value),
        }
    }

    /// Whether a row matches this predicate.
    pub fn matches(&self, row: &EventRow) -> bool {
        match (self.key.as_str(), &self.value) {
            ("entity", FilterValue::Text(v)) => row.entity == *v,
            ("series", FilterValue::Text(v)) => row.series == *v,
            ("min_value", FilterValue::Number(v)) => row.value >= *v,
            ("max_value", FilterValue::Number(v)) => row.value <= *v,
            _ => false,
        }
    }
}

/// Read/write/delete interface over the tiered time-series store.
///
/// Deletes are range predicates, never per-row calls, so one cleanup run
/// issues a bounded number of store operations.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Rows of `selector` within `range` on the given tier, ascending by time.
    async fn query(
        &self,
        tier: StorageTier,
        range: TimeRange,
        selector: &str,
        filters: &[QueryFilter],
    ) -> Result<Vec<EventRow>>;

    /// Write rows to a tier; returns the number written.
    async fn write(&self, tier: StorageTier, rows: &[EventRow]) -> Result<usize>;

    /// Delete all rows of `selector` within `range`; returns rows removed.
    async fn delete(&self, tier: StorageTier, range: TimeRange, selector: &str) -> Result<u64>;

    /// Approximate bytes used by a tier.
    async fn tier_usage(&self, tier: StorageTier) -> Result<u64>;

    /// Timestamp of the oldest row of `selector` on a tier.
    async fn earliest(&self, tier: StorageTier, selector: &str)
        -> Result<Option<DateTime<Utc>>>;

    /// Distinct series names present on a tier.
    async fn series(&self, tier: StorageTier) -> Result<Vec<String>>;
}

/// Opaque blob interface over object storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Vec<u8>>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn delete(&self, key: &str) -> Result<()>;
}
