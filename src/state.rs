//! Application state shared across handlers

use crate::policy::PolicyStore;
use crate::scheduler::Scheduler;
use crate::services::backup::BackupService;
use crate::services::monitor::StorageMonitor;
use crate::services::views::ViewManager;
use crate::store::TimeSeriesStore;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Time-series store, used directly only by readiness checks
    pub store: Arc<dyn TimeSeriesStore>,
    /// The coordinating scheduler; all mutation goes through it
    pub scheduler: Arc<Scheduler>,
    /// Retention policies (read paths; writes go through the scheduler)
    pub policies: Arc<PolicyStore>,
    /// Storage monitor, for alert listing
    pub monitor: Arc<StorageMonitor>,
    /// Materialized views, for allow-listed queries
    pub views: Arc<ViewManager>,
    /// Backup service, for manifest listing
    pub backup: Arc<BackupService>,
}
