//! Time-driven scheduler coordinating all lifecycle jobs

use crate::cancel::CancelFlag;
use crate::config::EngineConfig;
use crate::error::{LifecycleError, Result};
use crate::history::HistoryRing;
use crate::models::{
    AlertSeverity, JobState, JobType, OperationResult, ScheduledJob,
};
use crate::policy::PolicyStore;
use crate::services::archival::ArchivalService;
use crate::services::backup::BackupService;
use crate::services::monitor::StorageMonitor;
use crate::services::tiering::TierEngine;
use crate::services::views::ViewManager;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Persisted schedule state: last successful run per job type.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ScheduleState {
    last_runs: HashMap<JobType, DateTime<Utc>>,
}

/// The single coordinating component.
///
/// Owns one time-driven loop that sleeps until the minimum `next_due_at`,
/// dispatches due jobs, and serializes destructive operations through a
/// shared exclusion lock. Job records are mutated only by this scheduler.
pub struct Scheduler {
    jobs: RwLock<HashMap<JobType, ScheduledJob>>,
    tiering: Arc<TierEngine>,
    archival: Arc<ArchivalService>,
    backup: Arc<BackupService>,
    monitor: Arc<StorageMonitor>,
    views: Arc<ViewManager>,
    policies: Arc<PolicyStore>,
    /// Destructive operations (cleanup, archival, backup, restore, policy
    /// mutation) never run concurrently; read-only paths never take this.
    destructive: Mutex<()>,
    wake: Notify,
    config: EngineConfig,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EngineConfig,
        tiering: Arc<TierEngine>,
        archival: Arc<ArchivalService>,
        backup: Arc<BackupService>,
        monitor: Arc<StorageMonitor>,
        views: Arc<ViewManager>,
        policies: Arc<PolicyStore>,
    ) -> Result<Arc<Self>> {
        let state = load_schedule_state(&config)?;
        let now = Utc::now();
        let mut jobs = HashMap::new();
        for job_type in JobType::ALL {
            let interval = interval_for(&config, job_type);
            let mut job = ScheduledJob::new(job_type, interval, now);
            // Recompute due times deterministically from persisted last
            // runs so a restart doesn't reset the cadence.
            if let Some(last_run) = state.last_runs.get(&job_type) {
                job.last_run = Some(*last_run);
                job.next_due_at = *last_run + interval;
            } else {
                job.next_due_at = now;
            }
            jobs.insert(job_type, job);
        }

        Ok(Arc::new(Self {
            jobs: RwLock::new(jobs),
            tiering,
            archival,
            backup,
            monitor,
            views,
            policies,
            destructive: Mutex::new(()),
            wake: Notify::new(),
            config,
        }))
    }

    /// Run the scheduling loop until the process exits.
    ///
    /// The loop itself never performs blocking work; it computes the
    /// minimum due time, sleeps until then (or until a manual trigger),
    /// and awaits dispatched jobs.
    pub async fn run_loop(self: Arc<Self>) {
        info!("Scheduler loop started");
        loop {
            let now = Utc::now();
            let due: Vec<JobType> = {
                let mut jobs = self.jobs.write();
                let mut due = Vec::new();
                for job in jobs.values_mut() {
                    if job.is_due(now) && job.state != JobState::Running {
                        job.state = JobState::Due;
                        due.push(job.job_type);
                    }
                }
                due
            };

            if due.is_empty() {
                let next_due = self
                    .jobs
                    .read()
                    .values()
                    .map(|job| job.next_due_at)
                    .min()
                    .unwrap_or_else(|| now + Duration::seconds(60));
                let wait = (next_due - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::ZERO);
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.wake.notified() => {
                        debug!("Scheduler woken by trigger");
                    }
                }
                continue;
            }

            // Non-destructive jobs run concurrently with each other;
            // destructive ones serialize on the exclusion lock inside
            // execute().
            let runs = due
                .into_iter()
                .map(|job_type| {
                    let scheduler = Arc::clone(&self);
                    async move { scheduler.execute(job_type).await }
                })
                .collect::<Vec<_>>();
            futures::future::join_all(runs).await;
        }
    }

    /// Manual run-now: mark the job due and wake the loop. A trigger that
    /// lands while the job is mid-run queues a follow-up run instead of
    /// being swallowed by that run's completion bookkeeping.
    pub fn trigger(&self, job_type: JobType) {
        {
            let mut jobs = self.jobs.write();
            if let Some(job) = jobs.get_mut(&job_type) {
                if job.state == JobState::Running {
                    job.trigger_pending = true;
                } else {
                    job.next_due_at = Utc::now();
                    job.state = JobState::Due;
                }
            }
        }
        self.wake.notify_one();
    }

    /// Execute one job immediately with full bookkeeping: timeout,
    /// cooperative cancellation, bounded retry backoff, history.
    pub async fn execute(self: &Arc<Self>, job_type: JobType) -> JobState {
        let started_at = Utc::now();
        self.set_state(job_type, JobState::Running);

        let ring = self.history_ring(job_type);
        let last_before = ring.last().map(|r| r.started_at);
        let outcome = self.dispatch_with_timeout(job_type).await;

        let final_state = match outcome {
            Ok(items) => {
                self.complete(job_type, OperationResult::success(started_at, items));
                JobState::Succeeded
            }
            Err(e) => {
                let attempts = self.bump_attempts(job_type);
                let result =
                    OperationResult::failure(started_at, 0, e.safe_summary());
                // A worker that was aborted mid-run (or that committed
                // before the cancel landed) never records its own failure;
                // every failed run still has to show up in history.
                let worker_recorded_failure = ring
                    .last()
                    .is_some_and(|r| Some(r.started_at) != last_before && !r.success);
                if !worker_recorded_failure {
                    ring.push(result.clone());
                }
                if attempts >= self.config.max_attempts {
                    // Fatal for this cycle: raise an alert and fall back to
                    // the regular cadence. The loop itself keeps running.
                    error!(
                        job = job_type.as_str(),
                        attempts,
                        error = %e,
                        "Job exhausted retry budget"
                    );
                    self.monitor.raise(
                        AlertSeverity::Critical,
                        format!(
                            "job '{}' failed {} consecutive attempts: {}",
                            job_type.as_str(),
                            attempts,
                            e.safe_summary()
                        ),
                    );
                    self.fail(job_type, result, None);
                } else {
                    let backoff = backoff_delay(&self.config, attempts);
                    warn!(
                        job = job_type.as_str(),
                        attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Job failed, retrying with backoff"
                    );
                    self.fail(job_type, result, Some(backoff));
                }
                JobState::Failed
            }
        };
        if let Err(e) = self.persist_schedule() {
            warn!(error = %e, "Failed to persist schedule state");
        }
        final_state
    }

    /// Dispatch a job to a worker task and await it under the configured
    /// timeout. On timeout the job is cancelled cooperatively and given a
    /// short grace period to unwind before being aborted.
    async fn dispatch_with_timeout(self: &Arc<Self>, job_type: JobType) -> Result<u64> {
        let cancel = CancelFlag::new();
        let scheduler = Arc::clone(self);
        let worker_cancel = cancel.clone();
        let mut handle =
            tokio::spawn(async move { scheduler.run_job(job_type, worker_cancel).await });

        match timeout(self.config.job_timeout, &mut handle).await {
            Ok(joined) => joined
                .map_err(|e| LifecycleError::Internal(format!("job panicked: {}", e)))?,
            Err(_) => {
                cancel.cancel();
                match timeout(self.config.cancel_grace, &mut handle).await {
                    Ok(_) => {}
                    Err(_) => handle.abort(),
                }
                Err(LifecycleError::Internal(format!(
                    "job '{}' exceeded its timeout and was cancelled",
                    job_type.as_str()
                )))
            }
        }
    }

    async fn run_job(self: Arc<Self>, job_type: JobType, cancel: CancelFlag) -> Result<u64> {
        if job_type.is_destructive() {
            let _guard = self.destructive.lock().await;
            self.run_job_inner(job_type, cancel).await
        } else {
            self.run_job_inner(job_type, cancel).await
        }
    }

    async fn run_job_inner(&self, job_type: JobType, cancel: CancelFlag) -> Result<u64> {
        match job_type {
            JobType::Cleanup => {
                let stats = self.tiering.run(&cancel).await?;
                Ok(stats.items_processed())
            }
            JobType::Archival => {
                let stats = self.archival.run(&cancel).await?;
                Ok(stats.rows_archived)
            }
            JobType::Backup => {
                let manifest = self.backup.backup().await?;
                Ok(manifest.entries.len() as u64)
            }
            JobType::Monitor => {
                let created = self.monitor.run().await?;
                Ok(created.len() as u64)
            }
            JobType::ViewRefresh => {
                let rows = self.views.run().await?;
                Ok(rows as u64)
            }
        }
    }

    /// Restore is destructive but not scheduled; it queues on the same
    /// exclusion lock so it never interleaves with cleanup or backup.
    pub async fn restore(&self, backup_id: &str) -> Result<()> {
        let _guard = self.destructive.lock().await;
        self.backup.restore(backup_id).await
    }

    /// Policy mutations are destructive operations too.
    pub async fn add_policy(&self, policy: crate::models::RetentionPolicy) -> Result<()> {
        let _guard = self.destructive.lock().await;
        self.policies.add(policy)
    }

    pub async fn update_policy(&self, policy: crate::models::RetentionPolicy) -> Result<()> {
        let _guard = self.destructive.lock().await;
        self.policies.update(policy)
    }

    pub async fn remove_policy(&self, name: &str) -> Result<()> {
        let _guard = self.destructive.lock().await;
        self.policies.remove(name)
    }

    /// Read-only status of every scheduled job; never takes the lock.
    pub fn status(&self) -> Vec<ScheduledJob> {
        let jobs = self.jobs.read();
        let mut list: Vec<ScheduledJob> = jobs.values().cloned().collect();
        list.sort_by_key(|job| job.job_type.as_str());
        list
    }

    /// Recent results for one job type, oldest first.
    pub fn history(&self, job_type: JobType) -> Vec<OperationResult> {
        self.history_ring(job_type).snapshot()
    }

    fn history_ring(&self, job_type: JobType) -> &HistoryRing {
        match job_type {
            JobType::Cleanup => self.tiering.history(),
            JobType::Archival => self.archival.history(),
            JobType::Backup => self.backup.history(),
            JobType::Monitor => self.monitor.history(),
            JobType::ViewRefresh => self.views.history(),
        }
    }

    fn set_state(&self, job_type: JobType, state: JobState) {
        if let Some(job) = self.jobs.write().get_mut(&job_type) {
            job.state = state;
        }
    }

    fn complete(&self, job_type: JobType, result: OperationResult) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(&job_type) {
            job.state = JobState::Succeeded;
            job.last_run = Some(result.started_at);
            job.next_due_at = result.started_at + job.interval();
            job.last_result = Some(result);
            job.attempts = 0;
            if std::mem::take(&mut job.trigger_pending) {
                job.next_due_at = Utc::now();
            }
        }
    }

    fn fail(&self, job_type: JobType, result: OperationResult, backoff: Option<std::time::Duration>) {
        let mut jobs = self.jobs.write();
        if let Some(job) = jobs.get_mut(&job_type) {
            job.state = JobState::Failed;
            job.last_run = Some(result.started_at);
            job.next_due_at = match backoff {
                Some(delay) => {
                    Utc::now() + Duration::from_std(delay).unwrap_or(Duration::seconds(1))
                }
                None => {
                    // Retry budget exhausted: back to the regular cadence
                    // with a fresh attempt counter next cycle.
                    job.attempts = 0;
                    result.started_at + job.interval()
                }
            };
            job.last_result = Some(result);
            if std::mem::take(&mut job.trigger_pending) {
                job.next_due_at = Utc::now();
            }
        }
    }

    fn bump_attempts(&self, job_type: JobType) -> u32 {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(&job_type) {
            Some(job) => {
                job.attempts += 1;
                job.attempts
            }
            None => 1,
        }
    }

    fn persist_schedule(&self) -> Result<()> {
        let state = ScheduleState {
            last_runs: self
                .jobs
                .read()
                .values()
                .filter_map(|job| job.last_run.map(|t| (job.job_type, t)))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&state)?;
        let path = self.config.schedule_path();
        let parent = path
            .parent()
            .ok_or_else(|| LifecycleError::Internal("schedule path has no parent".into()))?;
        std::fs::create_dir_all(parent)?;
        let mut temp = NamedTempFile::new_in(parent)?;
        temp.write_all(&json)?;
        temp.persist(&path)
            .map_err(|e| LifecycleError::Internal(e.to_string()))?;
        Ok(())
    }
}

fn interval_for(config: &EngineConfig, job_type: JobType) -> Duration {
    match job_type {
        JobType::Cleanup => config.cleanup_interval,
        JobType::Archival => config.archival_interval,
        JobType::Backup => config.backup_interval,
        JobType::Monitor => config.monitor_interval,
        JobType::ViewRefresh => config.view_refresh_interval,
    }
}

/// Bounded exponential backoff: base * 2^(attempts-1), capped.
fn backoff_delay(config: &EngineConfig, attempts: u32) -> std::time::Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = config.backoff_base.saturating_mul(1u32 << exponent);
    delay.min(config.backoff_cap)
}

fn load_schedule_state(config: &EngineConfig) -> Result<ScheduleState> {
    match std::fs::read(config.schedule_path()) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ScheduleState::default()),
        Err(e) => Err(e.into()),
    }
}
