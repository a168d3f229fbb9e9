//! Storage usage monitoring and threshold alerting

use crate::error::Result;
use crate::history::HistoryRing;
use crate::models::{Alert, AlertSeverity, OperationResult, StorageMetrics, StorageTier};
use crate::store::TimeSeriesStore;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Measures per-tier storage usage and raises/resolves alerts against
/// configured thresholds.
///
/// Alerts are an audit trail: they are resolved when a tier recovers,
/// never deleted. `check` is idempotent; re-running it with unchanged
/// metrics creates no duplicate alerts.
pub struct StorageMonitor {
    store: Arc<dyn TimeSeriesStore>,
    warn_threshold: u64,
    critical_threshold: u64,
    alerts: RwLock<Vec<Alert>>,
    previous: RwLock<HashMap<StorageTier, StorageMetrics>>,
    history: HistoryRing,
}

impl StorageMonitor {
    pub fn new(
        store: Arc<dyn TimeSeriesStore>,
        warn_threshold: u64,
        critical_threshold: u64,
        history_capacity: usize,
    ) -> Self {
        Self {
            store,
            warn_threshold,
            critical_threshold,
            alerts: RwLock::new(Vec::new()),
            previous: RwLock::new(HashMap::new()),
            history: HistoryRing::new(history_capacity),
        }
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Measure current usage for every tier, computing the growth rate
    /// against the previous measurement.
    pub async fn measure(&self) -> Result<Vec<StorageMetrics>> {
        let now = Utc::now();
        let mut metrics = Vec::with_capacity(3);
        for tier in [StorageTier::Hot, StorageTier::Warm, StorageTier::Cold] {
            let bytes_used = self.store.tier_usage(tier).await?;
            let growth_rate = {
                let previous = self.previous.read();
                previous.get(&tier).map_or(0.0, |prev| {
                    let hours = (now - prev.measured_at).num_seconds() as f64 / 3600.0;
                    if hours > 0.0 {
                        (bytes_used as f64 - prev.bytes_used as f64) / hours
                    } else {
                        0.0
                    }
                })
            };
            let metric = StorageMetrics {
                tier,
                bytes_used,
                growth_rate,
                measured_at: now,
            };
            self.previous.write().insert(tier, metric.clone());
            metrics.push(metric);
        }
        Ok(metrics)
    }

    /// Compare metrics to thresholds; create alerts for fresh breaches and
    /// resolve open alerts for recovered tiers. Returns the alerts created
    /// by this call.
    pub fn check(&self, metrics: &[StorageMetrics]) -> Vec<Alert> {
        let mut created = Vec::new();
        let mut alerts = self.alerts.write();

        for metric in metrics {
            let breach = if metric.bytes_used >= self.critical_threshold {
                Some(AlertSeverity::Critical)
            } else if metric.bytes_used >= self.warn_threshold {
                Some(AlertSeverity::Warning)
            } else {
                None
            };

            let open = alerts
                .iter_mut()
                .find(|a| a.tier == Some(metric.tier) && a.is_open());

            match (breach, open) {
                (Some(severity), Some(existing)) if existing.severity == severity => {
                    // Unchanged breach, nothing to do
                }
                (Some(severity), open) => {
                    // Fresh breach, or severity changed: resolve the stale
                    // alert and open a new one at the right level.
                    if let Some(existing) = open {
                        existing.resolved_at = Some(Utc::now());
                    }
                    let alert = Alert::new(
                        severity,
                        Some(metric.tier),
                        format!(
                            "{} tier usage {} bytes crossed {:?} threshold",
                            metric.tier.as_str(),
                            metric.bytes_used,
                            severity
                        ),
                    );
                    warn!(
                        tier = metric.tier.as_str(),
                        bytes_used = metric.bytes_used,
                        severity = ?severity,
                        "Storage threshold breached"
                    );
                    created.push(alert.clone());
                    alerts.push(alert);
                }
                (None, Some(existing)) => {
                    info!(tier = metric.tier.as_str(), "Storage usage recovered");
                    existing.resolved_at = Some(Utc::now());
                }
                (None, None) => {}
            }
        }
        created
    }

    /// Scheduled entry point: measure then check.
    pub async fn run(&self) -> Result<Vec<Alert>> {
        let started_at = Utc::now();
        match self.measure().await {
            Ok(metrics) => {
                let created = self.check(&metrics);
                self.history
                    .push(OperationResult::success(started_at, metrics.len() as u64));
                Ok(created)
            }
            Err(e) => {
                self.history
                    .push(OperationResult::failure(started_at, 0, e.safe_summary()));
                Err(e)
            }
        }
    }

    /// Raise a non-tier alert (scheduler job failures land here).
    pub fn raise(&self, severity: AlertSeverity, message: String) -> Alert {
        let alert = Alert::new(severity, None, message);
        self.alerts.write().push(alert.clone());
        alert
    }

    /// Snapshot of all alerts, open and resolved.
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.read().clone()
    }

    /// Open (unresolved) alerts only.
    pub fn open_alerts(&self) -> Vec<Alert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| a.is_open())
            .cloned()
            .collect()
    }
}
