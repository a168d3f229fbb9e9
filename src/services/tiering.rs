//! Tier transition engine: hot-to-warm downsampling and retention deletes

use crate::cancel::CancelFlag;
use crate::error::{LifecycleError, Result};
use crate::history::HistoryRing;
use crate::models::{
    EventRow, OperationResult, RetentionAction, RetentionPolicy, StatKind, StorageTier,
    TierWindow, TimeRange,
};
use crate::policy::PolicyStore;
use crate::store::TimeSeriesStore;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one cleanup run across all enabled policies
#[derive(Debug, Clone, Default)]
pub struct CleanupStats {
    pub rows_downsampled: u64,
    pub aggregates_written: u64,
    pub rows_deleted: u64,
    pub policies_evaluated: u64,
}

impl CleanupStats {
    pub fn items_processed(&self) -> u64 {
        self.rows_downsampled + self.rows_deleted
    }
}

/// Moves data hot-to-warm (downsample) and deletes rows past retention,
/// guided by the policy store.
///
/// The core correctness invariant is write-then-delete: aggregated rows are
/// durably written to the warm tier before any source row is removed. A
/// failed aggregate write leaves the sources untouched and fails the run
/// for retry on the next cycle.
pub struct TierEngine {
    store: Arc<dyn TimeSeriesStore>,
    policies: Arc<PolicyStore>,
    warm_retention: Duration,
    bucket_width: Duration,
    chunk: Duration,
    history: HistoryRing,
}

impl TierEngine {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        policies: Arc<PolicyStore>,
        warm_retention: Duration,
        bucket_width: Duration,
        chunk: Duration,
        history_capacity: usize,
    ) -> Self {
        Self {
            store,
            policies,
            warm_retention,
            bucket_width,
            chunk,
            history: HistoryRing::new(history_capacity),
        }
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Evaluate every enabled downsample/delete policy once.
    pub async fn run(&self, cancel: &CancelFlag) -> Result<CleanupStats> {
        let started_at = Utc::now();
        let mut stats = CleanupStats::default();

        let result = self.run_inner(cancel, started_at, &mut stats).await;
        match result {
            Ok(()) => {
                info!(
                    downsampled = stats.rows_downsampled,
                    deleted = stats.rows_deleted,
                    policies = stats.policies_evaluated,
                    "Cleanup run complete"
                );
                self.history
                    .push(OperationResult::success(started_at, stats.items_processed()));
                Ok(stats)
            }
            Err(e) => {
                warn!(error = %e, "Cleanup run failed");
                self.history.push(OperationResult::failure(
                    started_at,
                    stats.items_processed(),
                    e.safe_summary(),
                ));
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        cancel: &CancelFlag,
        now: DateTime<Utc>,
        stats: &mut CleanupStats,
    ) -> Result<()> {
        for policy in self.policies.enabled() {
            if cancel.is_cancelled() {
                return Err(LifecycleError::ResourceBusy("cleanup cancelled".into()));
            }
            match policy.action {
                RetentionAction::Downsample => {
                    self.downsample_policy(&policy, cancel, now, stats).await?;
                }
                RetentionAction::Delete => {
                    self.delete_policy(&policy, now, stats).await?;
                }
                // Archive policies are handled by the archival service
                RetentionAction::Archive => continue,
            }
            stats.policies_evaluated += 1;
        }
        Ok(())
    }

    /// Downsample one policy's eligible window, oldest sub-range first so a
    /// crash mid-run leaves a resumable, monotonic frontier.
    async fn downsample_policy(
        &self,
        policy: &RetentionPolicy,
        cancel: &CancelFlag,
        now: DateTime<Utc>,
        stats: &mut CleanupStats,
    ) -> Result<()> {
        let stat_kind = policy.stat_kind.ok_or_else(|| {
            LifecycleError::InvalidPolicy(format!(
                "policy '{}' has no statistic kind",
                policy.name
            ))
        })?;
        let window = TierWindow::compute(policy, self.warm_retention, now);
        let range = window.downsample_range();

        // Start at the oldest eligible row rather than the nominal warm
        // cutoff, so empty history doesn't produce empty chunk scans.
        let earliest = self
            .store
            .earliest(StorageTier::Hot, &policy.dataset_selector)
            .await?;
        let Some(earliest) = earliest else {
            return Ok(());
        };
        let mut chunk_start = earliest.max(window.warm_cutoff);

        while chunk_start < range.end {
            if cancel.is_cancelled() {
                return Err(LifecycleError::ResourceBusy("cleanup cancelled".into()));
            }
            let chunk_end = (chunk_start + self.chunk).min(range.end);
            let chunk_range = TimeRange::bounded(chunk_start, chunk_end);

            let rows = self
                .store
                .query(StorageTier::Hot, chunk_range, &policy.dataset_selector, &[])
                .await?;
            if !rows.is_empty() {
                let aggregates = aggregate_rows(&rows, stat_kind, self.bucket_width);
                let written = aggregates.len() as u64;

                // Write-then-delete: the delete below only runs after this
                // write has succeeded.
                self.store.write(StorageTier::Warm, &aggregates).await?;
                let deleted = self
                    .store
                    .delete(StorageTier::Hot, chunk_range, &policy.dataset_selector)
                    .await?;

                debug!(
                    policy = %policy.name,
                    chunk_start = %chunk_start,
                    rows = rows.len(),
                    aggregates = written,
                    "Downsampled chunk"
                );
                stats.rows_downsampled += deleted;
                stats.aggregates_written += written;
            }
            chunk_start = chunk_end;
        }
        Ok(())
    }

    /// Delete-only policy: one bounded range predicate per run.
    async fn delete_policy(
        &self,
        policy: &RetentionPolicy,
        now: DateTime<Utc>,
        stats: &mut CleanupStats,
    ) -> Result<()> {
        let cutoff = now - policy.retention();
        let deleted = self
            .store
            .delete(
                StorageTier::Hot,
                TimeRange::until(cutoff),
                &policy.dataset_selector,
            )
            .await?;
        if deleted > 0 {
            info!(policy = %policy.name, deleted, "Deleted rows past retention");
        }
        stats.rows_deleted += deleted;
        Ok(())
    }
}

/// Group rows by (entity, time bucket) and reduce each group with the
/// aggregate matching the declared statistic kind. Mean is never applied to
/// a sum-typed series because the kind is fixed per policy.
fn aggregate_rows(rows: &[EventRow], stat_kind: StatKind, bucket_width: Duration) -> Vec<EventRow> {
    let mut buckets: BTreeMap<(i64, String), Vec<f64>> = BTreeMap::new();
    for row in rows {
        let bucket = bucket_start(row.recorded_at, bucket_width);
        buckets
            .entry((bucket, row.entity.clone()))
            .or_default()
            .push(row.value);
    }

    buckets
        .into_iter()
        .map(|((bucket_secs, entity), values)| {
            let value = match stat_kind {
                StatKind::Mean => values.iter().sum::<f64>() / values.len() as f64,
                StatKind::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
                StatKind::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                StatKind::Sum => values.iter().sum(),
            };
            EventRow {
                series: rows[0].series.clone(),
                entity,
                value,
                recorded_at: Utc.timestamp_opt(bucket_secs, 0).single().unwrap_or_else(Utc::now),
            }
        })
        .collect()
}

fn bucket_start(instant: DateTime<Utc>, width: Duration) -> i64 {
    let width_secs = width.num_seconds().max(1);
    let secs = instant.timestamp();
    secs - secs.rem_euclid(width_secs)
}
