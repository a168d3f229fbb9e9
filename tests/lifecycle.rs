//! End-to-end lifecycle flows exercised through the scheduler

use chrono::{Duration, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use tierkeeper::config::EngineConfig;
use tierkeeper::models::{
    EventRow, JobState, JobType, RetentionAction, RetentionPolicy, StatKind, StorageTier,
    TimeRange,
};
use tierkeeper::policy::PolicyStore;
use tierkeeper::scheduler::Scheduler;
use tierkeeper::services::archival::ArchivalService;
use tierkeeper::services::backup::BackupService;
use tierkeeper::services::compression::CompressionService;
use tierkeeper::services::monitor::StorageMonitor;
use tierkeeper::services::tiering::TierEngine;
use tierkeeper::services::views::ViewManager;
use tierkeeper::store::memory::{MemoryObjectStore, MemoryStore};
use tierkeeper::store::TimeSeriesStore;

struct Stack {
    scheduler: Arc<Scheduler>,
    store: Arc<MemoryStore>,
    objects: Arc<MemoryObjectStore>,
    policies: Arc<PolicyStore>,
    _dir: TempDir,
}

fn build_stack() -> Stack {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.data_dir = dir.path().to_path_buf();

    let store = MemoryStore::new();
    let objects = MemoryObjectStore::new();
    let policies = Arc::new(PolicyStore::open(config.policies_path()).unwrap());
    let compression = Arc::new(CompressionService::new(config.worker_slots, 10));

    let tiering = Arc::new(TierEngine::new(
        Arc::clone(&store) as Arc<dyn TimeSeriesStore>,
        Arc::clone(&policies),
        config.warm_retention,
        config.bucket_width,
        config.cleanup_chunk,
        config.history_capacity,
    ));
    let archival = Arc::new(ArchivalService::new(
        Arc::clone(&store) as Arc<dyn TimeSeriesStore>,
        Arc::clone(&objects) as _,
        Arc::clone(&compression),
        Arc::clone(&policies),
        config.history_capacity,
    ));
    let backup = Arc::new(BackupService::new(
        Arc::clone(&store) as Arc<dyn TimeSeriesStore>,
        Arc::clone(&policies),
        Arc::clone(&compression),
        config.backups_dir(),
        config.config_dir(),
        config.history_capacity,
    ));
    let monitor = Arc::new(StorageMonitor::new(
        Arc::clone(&store) as Arc<dyn TimeSeriesStore>,
        config.warn_threshold_bytes,
        config.critical_threshold_bytes,
        config.history_capacity,
    ));
    let views = Arc::new(ViewManager::new(
        Arc::clone(&store) as Arc<dyn TimeSeriesStore>,
        config.history_capacity,
    ));

    let scheduler = Scheduler::new(
        config, tiering, archival, backup, monitor, views, policies.clone(),
    )
    .unwrap();

    Stack {
        scheduler,
        store,
        objects,
        policies,
        _dir: dir,
    }
}

fn raw_row(entity: &str, value: f64, age: Duration) -> EventRow {
    EventRow {
        series: "events".to_string(),
        entity: entity.to_string(),
        value,
        recorded_at: Utc::now() - age,
    }
}

fn downsample_policy() -> RetentionPolicy {
    RetentionPolicy {
        name: "raw-7d".to_string(),
        dataset_selector: "events".to_string(),
        retention_seconds: 7 * 86_400,
        action: RetentionAction::Downsample,
        stat_kind: Some(StatKind::Mean),
        enabled: true,
    }
}

/// A week-old raw dataset is downsampled into hourly warm aggregates and
/// removed from the hot tier.
#[tokio::test]
async fn downsample_flow_moves_raw_data_to_warm_aggregates() {
    let stack = build_stack();
    stack.scheduler.add_policy(downsample_policy()).await.unwrap();

    // Two entities, two hourly buckets, all past the 7-day cutoff
    let eight_days = Duration::days(8);
    stack
        .store
        .write(
            StorageTier::Hot,
            &[
                raw_row("host-1", 10.0, eight_days),
                raw_row("host-1", 20.0, eight_days),
                raw_row("host-1", 30.0, eight_days + Duration::hours(2)),
                raw_row("host-2", 5.0, eight_days),
            ],
        )
        .await
        .unwrap();
    // A fresh row that must survive untouched
    stack
        .store
        .write(StorageTier::Hot, &[raw_row("host-1", 99.0, Duration::hours(1))])
        .await
        .unwrap();

    let state = stack.scheduler.execute(JobType::Cleanup).await;
    assert_eq!(state, JobState::Succeeded);

    // Aged raw rows are gone; the fresh one survives
    let hot = stack
        .store
        .query(StorageTier::Hot, TimeRange::until(Utc::now()), "events", &[])
        .await
        .unwrap();
    assert_eq!(hot.len(), 1);
    assert!((hot[0].value - 99.0).abs() < f64::EPSILON);

    // One aggregate per (bucket, entity): three in total
    let warm = stack
        .store
        .query(StorageTier::Warm, TimeRange::until(Utc::now()), "events", &[])
        .await
        .unwrap();
    assert_eq!(warm.len(), 3);

    // The mean of the two co-bucketed host-1 rows
    let merged = warm
        .iter()
        .find(|r| r.entity == "host-1" && (r.value - 15.0).abs() < f64::EPSILON);
    assert!(merged.is_some());

    // The run is visible in history
    let history = stack.scheduler.history(JobType::Cleanup);
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].items_processed, 4);
}

/// Backup followed by restore onto a mutated system brings the mutated
/// series and policy set back to the snapshot exactly.
#[tokio::test]
async fn backup_restore_round_trip_recovers_snapshot_state() {
    let stack = build_stack();
    stack.scheduler.add_policy(downsample_policy()).await.unwrap();
    stack
        .store
        .write(
            StorageTier::Hot,
            &[
                raw_row("host-1", 1.0, Duration::hours(1)),
                raw_row("host-2", 2.0, Duration::hours(2)),
            ],
        )
        .await
        .unwrap();
    stack
        .store
        .write(StorageTier::Warm, &[raw_row("host-1", 3.0, Duration::days(10))])
        .await
        .unwrap();

    let state = stack.scheduler.execute(JobType::Backup).await;
    assert_eq!(state, JobState::Succeeded);

    // Mutate everything the snapshot covers
    stack.scheduler.remove_policy("raw-7d").await.unwrap();
    stack
        .store
        .write(StorageTier::Hot, &[raw_row("host-3", 42.0, Duration::minutes(5))])
        .await
        .unwrap();

    assert!(stack.policies.list().is_empty());
    assert_eq!(stack.store.row_count(StorageTier::Hot), 3);

    // Restore the only backup
    let backup_id = {
        let listed = stack_backup_list(&stack);
        assert_eq!(listed.len(), 1);
        listed[0].backup_id.clone()
    };
    stack.scheduler.restore(&backup_id).await.unwrap();

    // Policy set and snapshot rows are back; the post-snapshot row in the
    // restored series is gone because restore replaces, not appends
    assert_eq!(stack.policies.list().len(), 1);
    assert_eq!(stack.store.row_count(StorageTier::Hot), 2);
    assert_eq!(stack.store.row_count(StorageTier::Warm), 1);

    // Restoring again changes nothing (identity on an untouched system)
    stack.scheduler.restore(&backup_id).await.unwrap();
    assert_eq!(stack.store.row_count(StorageTier::Hot), 2);
    assert_eq!(stack.store.row_count(StorageTier::Warm), 1);
}

fn stack_backup_list(stack: &Stack) -> Vec<tierkeeper::models::BackupManifest> {
    // The backups dir is scanned rather than cached, so a plain rebuild of
    // the service sees the same manifests the scheduler produced.
    let config = {
        let mut c = EngineConfig::default();
        c.data_dir = stack._dir.path().to_path_buf();
        c
    };
    let service = BackupService::new(
        Arc::clone(&stack.store) as Arc<dyn TimeSeriesStore>,
        Arc::clone(&stack.policies),
        Arc::new(CompressionService::new(2, 10)),
        config.backups_dir(),
        config.config_dir(),
        10,
    );
    service.list().unwrap()
}

/// Concurrent destructive operations run to completion without interleaved
/// effects: cleanup and archival both apply exactly once.
#[tokio::test]
async fn concurrent_destructive_operations_apply_exactly_once() {
    let stack = build_stack();
    stack.scheduler.add_policy(downsample_policy()).await.unwrap();
    stack
        .scheduler
        .add_policy(RetentionPolicy {
            name: "archive-logs-30d".to_string(),
            dataset_selector: "logs".to_string(),
            retention_seconds: 30 * 86_400,
            action: RetentionAction::Archive,
            stat_kind: None,
            enabled: true,
        })
        .await
        .unwrap();

    stack
        .store
        .write(
            StorageTier::Hot,
            &[
                raw_row("host-1", 10.0, Duration::days(8)),
                raw_row("host-1", 20.0, Duration::days(8)),
            ],
        )
        .await
        .unwrap();
    stack
        .store
        .write(
            StorageTier::Hot,
            &[EventRow {
                series: "logs".to_string(),
                entity: "host-1".to_string(),
                value: 1.0,
                recorded_at: Utc::now() - Duration::days(40),
            }],
        )
        .await
        .unwrap();

    let cleanup = {
        let scheduler = Arc::clone(&stack.scheduler);
        tokio::spawn(async move { scheduler.execute(JobType::Cleanup).await })
    };
    let archival = {
        let scheduler = Arc::clone(&stack.scheduler);
        tokio::spawn(async move { scheduler.execute(JobType::Archival).await })
    };

    assert_eq!(cleanup.await.unwrap(), JobState::Succeeded);
    assert_eq!(archival.await.unwrap(), JobState::Succeeded);

    // Cleanup: both raw rows merged into one warm aggregate, exactly once
    let warm = stack
        .store
        .query(StorageTier::Warm, TimeRange::until(Utc::now()), "events", &[])
        .await
        .unwrap();
    assert_eq!(warm.len(), 1);
    assert!((warm[0].value - 15.0).abs() < f64::EPSILON);

    // Archival: one object written, the log row gone from the hot tier
    assert_eq!(stack.objects.blob_count(), 1);
    let logs = stack
        .store
        .query(StorageTier::Hot, TimeRange::until(Utc::now()), "logs", &[])
        .await
        .unwrap();
    assert!(logs.is_empty());

    // Both runs recorded exactly one history entry each
    assert_eq!(stack.scheduler.history(JobType::Cleanup).len(), 1);
    assert_eq!(stack.scheduler.history(JobType::Archival).len(), 1);
}

/// The monitor raises and later resolves a threshold alert as usage crosses
/// and then recedes below the warning threshold.
#[tokio::test]
async fn monitor_alert_lifecycle_across_threshold() {
    let dir = TempDir::new().unwrap();
    let mut config = EngineConfig::default();
    config.data_dir = dir.path().to_path_buf();
    // Tiny thresholds so a handful of rows breaches them
    config.warn_threshold_bytes = 128;
    config.critical_threshold_bytes = 1024 * 1024;

    let store = MemoryStore::new();
    let monitor = StorageMonitor::new(
        Arc::clone(&store) as Arc<dyn TimeSeriesStore>,
        config.warn_threshold_bytes,
        config.critical_threshold_bytes,
        config.history_capacity,
    );

    // Below threshold: no alerts
    monitor.run().await.unwrap();
    assert!(monitor.open_alerts().is_empty());

    // Push usage over the warning threshold
    let rows: Vec<EventRow> = (0..10)
        .map(|n| raw_row("host-1", n as f64, Duration::minutes(n)))
        .collect();
    store.write(StorageTier::Hot, &rows).await.unwrap();
    monitor.run().await.unwrap();
    let open = monitor.open_alerts();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].tier, Some(StorageTier::Hot));

    // Usage recedes: the alert resolves but stays in the full list
    store
        .delete(StorageTier::Hot, TimeRange::until(Utc::now()), "events")
        .await
        .unwrap();
    monitor.run().await.unwrap();
    assert!(monitor.open_alerts().is_empty());
    assert_eq!(monitor.alerts().len(), 1);
    assert!(monitor.alerts()[0].resolved_at.is_some());
}
