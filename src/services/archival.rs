//! Cold-tier archival: columnar export to object storage

use crate::cancel::CancelFlag;
use crate::error::{LifecycleError, Result};
use crate::history::HistoryRing;
use crate::models::{EventRow, OperationResult, RetentionAction, StorageTier, TimeRange};
use crate::policy::PolicyStore;
use crate::services::compression::{Algorithm, CompressionService};
use crate::store::{ObjectStore, TimeSeriesStore};
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Columnar representation of an archived batch: parallel column vectors
/// instead of row structs, so downstream tooling can scan one column
/// without decoding the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnarBatch {
    pub series: String,
    pub timestamps: Vec<i64>,
    pub entities: Vec<String>,
    pub values: Vec<f64>,
}

impl ColumnarBatch {
    pub fn from_rows(series: &str, rows: &[EventRow]) -> Self {
        Self {
            series: series.to_string(),
            timestamps: rows.iter().map(|r| r.recorded_at.timestamp()).collect(),
            entities: rows.iter().map(|r| r.entity.clone()).collect(),
            values: rows.iter().map(|r| r.value).collect(),
        }
    }

    pub fn to_rows(&self) -> Vec<EventRow> {
        self.timestamps
            .iter()
            .zip(&self.entities)
            .zip(&self.values)
            .map(|((&ts, entity), &value)| EventRow {
                series: self.series.clone(),
                entity: entity.clone(),
                value,
                recorded_at: Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Outcome of one archival run
#[derive(Debug, Clone, Default)]
pub struct ArchivalStats {
    pub rows_archived: u64,
    pub objects_written: u64,
    pub compressed_bytes: u64,
}

/// Exports time windows of data to object storage as compressed columnar
/// batches, then deletes the source rows. Upload failures never delete
/// source rows (same write-then-delete discipline as the tier engine).
pub struct ArchivalService {
    store: Arc<dyn TimeSeriesStore>,
    objects: Arc<dyn ObjectStore>,
    compression: Arc<CompressionService>,
    policies: Arc<PolicyStore>,
    history: HistoryRing,
}

impl ArchivalService {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        objects: Arc<dyn ObjectStore>,
        compression: Arc<CompressionService>,
        policies: Arc<PolicyStore>,
        history_capacity: usize,
    ) -> Self {
        Self {
            store,
            objects,
            compression,
            policies,
            history: HistoryRing::new(history_capacity),
        }
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Scheduled entry point: archive every enabled archive policy's rows
    /// past its retention cutoff.
    pub async fn run(&self, cancel: &CancelFlag) -> Result<ArchivalStats> {
        let started_at = Utc::now();
        let mut stats = ArchivalStats::default();
        let now = Utc::now();

        let mut outcome = Ok(());
        for policy in self.policies.enabled() {
            if policy.action != RetentionAction::Archive {
                continue;
            }
            if cancel.is_cancelled() {
                outcome = Err(LifecycleError::ResourceBusy("archival cancelled".into()));
                break;
            }
            let range = TimeRange::until(now - policy.retention());
            if let Err(e) = self
                .archive(&policy.dataset_selector, StorageTier::Hot, range, &mut stats)
                .await
            {
                outcome = Err(e);
                break;
            }
        }

        match outcome {
            Ok(()) => {
                self.history
                    .push(OperationResult::success(started_at, stats.rows_archived));
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "Archival run failed");
                self.history.push(OperationResult::failure(
                    started_at,
                    stats.rows_archived,
                    e.safe_summary(),
                ));
                Err(e)
            }
        }
    }

    /// Archive one selector's rows within `range` from the given tier.
    ///
    /// The compressed batch is staged in a scoped temporary directory that
    /// is removed on every exit path, then uploaded under a deterministic
    /// key; only after a successful upload are the source rows deleted.
    pub async fn archive(
        &self,
        selector: &str,
        tier: StorageTier,
        range: TimeRange,
        stats: &mut ArchivalStats,
    ) -> Result<()> {
        let rows = self.store.query(tier, range, selector, &[]).await?;
        if rows.is_empty() {
            return Ok(());
        }

        let batch = ColumnarBatch::from_rows(selector, &rows);
        let serialized = serde_json::to_vec(&batch)?;
        let compressed = self
            .compression
            .compress(serialized, Some(Algorithm::Zstd))
            .await?;

        // Staging dir cleans itself up on success, failure, or cancellation
        // via Drop.
        let staging = TempDir::new()?;
        let staged_path = staging.path().join("batch.col.zst");
        let mut staged = std::fs::File::create(&staged_path)?;
        staged.write_all(&compressed.bytes)?;
        staged.sync_all()?;

        let key = archive_key(selector, range);
        let payload = std::fs::read(&staged_path)?;
        let payload_len = payload.len() as u64;
        self.objects.put(&key, payload).await?;

        // Source rows only go away after the upload has landed.
        let deleted = self.store.delete(tier, range, selector).await?;

        info!(
            selector,
            key = %key,
            rows = deleted,
            compressed_bytes = payload_len,
            ratio = compressed.ratio,
            "Archived batch to object storage"
        );
        stats.rows_archived += deleted;
        stats.objects_written += 1;
        stats.compressed_bytes += payload_len;
        Ok(())
    }

    /// Read an archived batch back from object storage.
    pub async fn retrieve(&self, key: &str) -> Result<ColumnarBatch> {
        let bytes = self.objects.get(key).await?;
        let serialized = self.compression.decompress(bytes, Algorithm::Zstd).await?;
        let batch: ColumnarBatch = serde_json::from_slice(&serialized)?;
        debug!(key, rows = batch.len(), "Retrieved archived batch");
        Ok(batch)
    }
}

/// Deterministic object key for a dataset and time range.
fn archive_key(selector: &str, range: TimeRange) -> String {
    let start = range.start.map_or_else(|| "epoch".to_string(), |s| s.timestamp().to_string());
    format!(
        "archive/{}/{}-{}.col.zst",
        selector,
        start,
        range.end.timestamp()
    )
}
