//! Core domain models for the lifecycle engine

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage tier a row or metric belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageTier {
    /// Raw, full-resolution recent data
    Hot,
    /// Downsampled aggregates
    Warm,
    /// Archived to object storage
    Cold,
}

impl StorageTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Hot => "hot",
            StorageTier::Warm => "warm",
            StorageTier::Cold => "cold",
        }
    }
}

/// Declared statistic kind of a series; selects the downsampling aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatKind {
    Mean,
    Min,
    Max,
    Sum,
}

/// What a retention policy does to rows past its cutoff
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionAction {
    Delete,
    Downsample,
    Archive,
}

/// A named retention policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Unique policy name
    pub name: String,
    /// Dataset/series selector this policy applies to
    pub dataset_selector: String,
    /// How long raw rows are retained, in seconds
    pub retention_seconds: i64,
    /// Action taken on rows older than the retention cutoff
    pub action: RetentionAction,
    /// Statistic kind; required for downsample policies
    pub stat_kind: Option<StatKind>,
    /// Disabled policies are kept for audit but never evaluated
    pub enabled: bool,
}

impl RetentionPolicy {
    pub fn retention(&self) -> Duration {
        Duration::seconds(self.retention_seconds)
    }
}

/// A single time-series event row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    /// Dataset/series this row belongs to
    pub series: String,
    /// Entity (host, device, ...) the value was measured for
    pub entity: String,
    pub value: f64,
    pub recorded_at: DateTime<Utc>,
}

/// Half-open time range `[start, end)`; `start = None` means unbounded below
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn bounded(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end,
        }
    }

    pub fn until(end: DateTime<Utc>) -> Self {
        Self { start: None, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant < self.end && self.start.map_or(true, |s| instant >= s)
    }
}

/// Tier cutoffs derived from a policy at evaluation time; never persisted.
///
/// Rows in `[warm_cutoff, hot_cutoff)` are downsampling candidates; rows in
/// `[-inf, warm_cutoff)` are cold-tier candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierWindow {
    pub hot_cutoff: DateTime<Utc>,
    pub warm_cutoff: DateTime<Utc>,
}

impl TierWindow {
    /// Compute the window for a policy. `warm_retention` is the engine-level
    /// duration aggregates stay in the warm tier; the warm cutoff is clamped
    /// so it never passes the hot cutoff.
    pub fn compute(
        policy: &RetentionPolicy,
        warm_retention: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let hot_cutoff = now - policy.retention();
        let warm_cutoff = (now - warm_retention).min(hot_cutoff);
        Self {
            hot_cutoff,
            warm_cutoff,
        }
    }

    /// Candidate range for hot-to-warm downsampling
    pub fn downsample_range(&self) -> TimeRange {
        TimeRange::bounded(self.warm_cutoff, self.hot_cutoff)
    }
}

/// Outcome of one component run, appended to that component's history ring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResult {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub items_processed: u64,
    /// Sanitized category + message; always present on failure
    pub error_summary: Option<String>,
}

impl OperationResult {
    pub fn success(started_at: DateTime<Utc>, items_processed: u64) -> Self {
        Self {
            started_at,
            duration_ms: elapsed_ms(started_at),
            success: true,
            items_processed,
            error_summary: None,
        }
    }

    pub fn failure(started_at: DateTime<Utc>, items_processed: u64, summary: String) -> Self {
        Self {
            started_at,
            duration_ms: elapsed_ms(started_at),
            success: false,
            items_processed,
            error_summary: Some(summary),
        }
    }
}

fn elapsed_ms(started_at: DateTime<Utc>) -> u64 {
    (Utc::now() - started_at).num_milliseconds().max(0) as u64
}

/// Point-in-time storage usage for one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub tier: StorageTier,
    pub bytes_used: u64,
    /// Bytes per hour against the previous measurement; 0 on the first tick
    pub growth_rate: f64,
    pub measured_at: DateTime<Utc>,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// A threshold breach or job failure. Never deleted, only resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub severity: AlertSeverity,
    pub message: String,
    /// Tier the alert concerns; absent for non-tier alerts (job failures)
    pub tier: Option<StorageTier>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(severity: AlertSeverity, tier: Option<StorageTier>, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            severity,
            message,
            tier,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.resolved_at.is_none()
    }
}

/// One entry inside a backup artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub path: String,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Manifest created atomically with a backup artifact.
///
/// An artifact without a valid matching manifest is corrupt and unusable
/// for restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    pub backup_id: String,
    pub created_at: DateTime<Utc>,
    pub included_policies: Vec<RetentionPolicy>,
    pub entries: Vec<BackupEntry>,
    /// SHA-256 of the packed artifact
    pub checksum: String,
    pub size_bytes: u64,
}

/// Scheduled job types dispatched by the scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Tier transitions: downsample and delete per retention policy
    Cleanup,
    /// Cold-tier export to object storage
    Archival,
    /// Full-system snapshot
    Backup,
    /// Storage usage measurement and alerting
    Monitor,
    /// Materialized rollup refresh
    ViewRefresh,
}

impl JobType {
    pub const ALL: [JobType; 5] = [
        JobType::Cleanup,
        JobType::Archival,
        JobType::Backup,
        JobType::Monitor,
        JobType::ViewRefresh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Cleanup => "cleanup",
            JobType::Archival => "archival",
            JobType::Backup => "backup",
            JobType::Monitor => "monitor",
            JobType::ViewRefresh => "view_refresh",
        }
    }

    /// Destructive jobs serialize against each other via the exclusion lock
    pub fn is_destructive(&self) -> bool {
        matches!(self, JobType::Cleanup | JobType::Archival | JobType::Backup)
    }
}

impl std::str::FromStr for JobType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "cleanup" => Ok(JobType::Cleanup),
            "archival" => Ok(JobType::Archival),
            "backup" => Ok(JobType::Backup),
            "monitor" => Ok(JobType::Monitor),
            "view_refresh" => Ok(JobType::ViewRefresh),
            other => Err(format!("unknown job type '{}'", other)),
        }
    }
}

/// Per-job-type scheduler state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Idle,
    Due,
    Running,
    Succeeded,
    Failed,
}

/// A job record owned exclusively by the scheduler loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub job_type: JobType,
    pub interval_seconds: i64,
    pub next_due_at: DateTime<Utc>,
    pub state: JobState,
    pub last_run: Option<DateTime<Utc>>,
    pub last_result: Option<OperationResult>,
    /// Consecutive failed attempts in the current cycle
    pub attempts: u32,
    /// Run-now requested while the job was already running
    #[serde(skip)]
    pub trigger_pending: bool,
}

impl ScheduledJob {
    pub fn new(job_type: JobType, interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            job_type,
            interval_seconds: interval.num_seconds(),
            next_due_at: now + interval,
            state: JobState::Idle,
            last_run: None,
            last_result: None,
            attempts: 0,
            trigger_pending: false,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_seconds)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due_at <= now
    }
}
