//! In-memory store backends for standalone mode and tests

use crate::error::{LifecycleError, Result};
use crate::models::{EventRow, StorageTier, TimeRange};
use crate::store::{ObjectStore, QueryFilter, TimeSeriesStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Approximate on-disk footprint of one row; used for tier usage estimates.
const ROW_FOOTPRINT_BYTES: u64 = 64;

/// In-memory tiered time-series store.
///
/// Rows are kept per tier, sorted on read. `fail_writes` lets tests inject
/// a write failure to exercise the write-then-delete invariant.
#[derive(Default)]
pub struct MemoryStore {
    tiers: RwLock<HashMap<StorageTier, Vec<EventRow>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent `write` calls fail with a transient store error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Total row count on a tier, for test assertions.
    pub fn row_count(&self, tier: StorageTier) -> usize {
        self.tiers.read().get(&tier).map_or(0, |rows| rows.len())
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryStore {
    async fn query(
        &self,
        tier: StorageTier,
        range: TimeRange,
        selector: &str,
        filters: &[QueryFilter],
    ) -> Result<Vec<EventRow>> {
        let tiers = self.tiers.read();
        let mut rows: Vec<EventRow> = tiers
            .get(&tier)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.series == selector)
                    .filter(|row| range.contains(row.recorded_at))
                    .filter(|row| filters.iter().all(|f| f.matches(row)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by_key(|row| row.recorded_at);
        Ok(rows)
    }

    async fn write(&self, tier: StorageTier, rows: &[EventRow]) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LifecycleError::TransientStore(
                "write rejected by store".to_string(),
            ));
        }
        let mut tiers = self.tiers.write();
        tiers
            .entry(tier)
            .or_default()
            .extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn delete(&self, tier: StorageTier, range: TimeRange, selector: &str) -> Result<u64> {
        let mut tiers = self.tiers.write();
        let Some(rows) = tiers.get_mut(&tier) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|row| row.series != selector || !range.contains(row.recorded_at));
        Ok((before - rows.len()) as u64)
    }

    async fn tier_usage(&self, tier: StorageTier) -> Result<u64> {
        let tiers = self.tiers.read();
        Ok(tiers.get(&tier).map_or(0, |rows| rows.len() as u64) * ROW_FOOTPRINT_BYTES)
    }

    async fn earliest(
        &self,
        tier: StorageTier,
        selector: &str,
    ) -> Result<Option<DateTime<Utc>>> {
        let tiers = self.tiers.read();
        Ok(tiers.get(&tier).and_then(|rows| {
            rows.iter()
                .filter(|row| row.series == selector)
                .map(|row| row.recorded_at)
                .min()
        }))
    }

    async fn series(&self, tier: StorageTier) -> Result<Vec<String>> {
        let tiers = self.tiers.read();
        let mut names: Vec<String> = tiers
            .get(&tier)
            .map(|rows| rows.iter().map(|row| row.series.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make subsequent `put` calls fail, for upload-failure tests.
    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn blob_count(&self) -> usize {
        self.blobs.read().len()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(LifecycleError::TransientStore(
                "upload rejected by object store".to_string(),
            ));
        }
        self.blobs.write().insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| LifecycleError::NotFound(format!("object '{}'", key)))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .blobs
            .read()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.blobs.write().remove(key);
        Ok(())
    }
}
