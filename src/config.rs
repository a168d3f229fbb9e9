//! Engine configuration, read from environment variables with defaults

use chrono::Duration;
use std::path::PathBuf;

/// Configuration for the lifecycle engine and its scheduler.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory for persisted state (policies, schedule, backups)
    pub data_dir: PathBuf,
    /// How long aggregates stay in the warm tier before cold transition
    pub warm_retention: Duration,
    /// Downsampling bucket width
    pub bucket_width: Duration,
    /// Sub-range chunk processed per store call during cleanup
    pub cleanup_chunk: Duration,
    /// Capacity of each per-component history ring
    pub history_capacity: usize,
    /// Maximum concurrently dispatched worker jobs
    pub worker_slots: usize,
    /// Per-job execution timeout
    pub job_timeout: std::time::Duration,
    /// Grace period a cancelled job gets to unwind before it is aborted
    pub cancel_grace: std::time::Duration,
    /// Maximum attempts before a job is marked fatal for the cycle
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff
    pub backoff_base: std::time::Duration,
    /// Upper bound on a single backoff delay
    pub backoff_cap: std::time::Duration,
    /// Per-tier warning threshold in bytes
    pub warn_threshold_bytes: u64,
    /// Per-tier critical threshold in bytes
    pub critical_threshold_bytes: u64,
    /// Scheduled intervals per job type
    pub cleanup_interval: Duration,
    pub archival_interval: Duration,
    pub backup_interval: Duration,
    pub monitor_interval: Duration,
    pub view_refresh_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./tierkeeper-data"),
            warm_retention: Duration::days(90),
            bucket_width: Duration::hours(1),
            cleanup_chunk: Duration::days(1),
            history_capacity: 100,
            worker_slots: 4,
            job_timeout: std::time::Duration::from_secs(600),
            cancel_grace: std::time::Duration::from_secs(5),
            max_attempts: 3,
            backoff_base: std::time::Duration::from_millis(500),
            backoff_cap: std::time::Duration::from_secs(30),
            warn_threshold_bytes: 8 * 1024 * 1024 * 1024,
            critical_threshold_bytes: 10 * 1024 * 1024 * 1024,
            cleanup_interval: Duration::hours(6),
            archival_interval: Duration::hours(24),
            backup_interval: Duration::hours(24),
            monitor_interval: Duration::minutes(5),
            view_refresh_interval: Duration::minutes(15),
        }
    }
}

impl EngineConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            data_dir: env_var("TIERKEEPER_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            warm_retention: env_duration_secs("TIERKEEPER_WARM_RETENTION_SECS")
                .unwrap_or(defaults.warm_retention),
            bucket_width: env_duration_secs("TIERKEEPER_BUCKET_SECS")
                .unwrap_or(defaults.bucket_width),
            cleanup_chunk: env_duration_secs("TIERKEEPER_CLEANUP_CHUNK_SECS")
                .unwrap_or(defaults.cleanup_chunk),
            history_capacity: env_parse("TIERKEEPER_HISTORY_CAPACITY")
                .unwrap_or(defaults.history_capacity),
            worker_slots: env_parse("TIERKEEPER_WORKER_SLOTS").unwrap_or(defaults.worker_slots),
            job_timeout: env_parse("TIERKEEPER_JOB_TIMEOUT_SECS")
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.job_timeout),
            cancel_grace: defaults.cancel_grace,
            max_attempts: env_parse("TIERKEEPER_MAX_ATTEMPTS").unwrap_or(defaults.max_attempts),
            backoff_base: defaults.backoff_base,
            backoff_cap: defaults.backoff_cap,
            warn_threshold_bytes: env_parse("TIERKEEPER_WARN_THRESHOLD_BYTES")
                .unwrap_or(defaults.warn_threshold_bytes),
            critical_threshold_bytes: env_parse("TIERKEEPER_CRITICAL_THRESHOLD_BYTES")
                .unwrap_or(defaults.critical_threshold_bytes),
            cleanup_interval: env_duration_secs("TIERKEEPER_CLEANUP_INTERVAL_SECS")
                .unwrap_or(defaults.cleanup_interval),
            archival_interval: env_duration_secs("TIERKEEPER_ARCHIVAL_INTERVAL_SECS")
                .unwrap_or(defaults.archival_interval),
            backup_interval: env_duration_secs("TIERKEEPER_BACKUP_INTERVAL_SECS")
                .unwrap_or(defaults.backup_interval),
            monitor_interval: env_duration_secs("TIERKEEPER_MONITOR_INTERVAL_SECS")
                .unwrap_or(defaults.monitor_interval),
            view_refresh_interval: env_duration_secs("TIERKEEPER_VIEW_REFRESH_INTERVAL_SECS")
                .unwrap_or(defaults.view_refresh_interval),
        }
    }

    pub fn policies_path(&self) -> PathBuf {
        self.data_dir.join("policies.json")
    }

    pub fn schedule_path(&self) -> PathBuf {
        self.data_dir.join("schedule.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    /// Live configuration directory; the only restore target.
    pub fn config_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key).and_then(|v| v.parse().ok())
}

fn env_duration_secs(key: &str) -> Option<Duration> {
    env_parse::<i64>(key).map(Duration::seconds)
}
