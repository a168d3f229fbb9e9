//! TierKeeper - Time-series data lifecycle engine

mod cancel;
mod config;
mod error;
mod history;
mod models;
mod policy;
mod routes;
mod scheduler;
mod services;
mod state;
mod store;

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::EngineConfig;
use crate::policy::PolicyStore;
use crate::routes::{alerts, backups, health, jobs, policies, views};
use crate::scheduler::Scheduler;
use crate::services::archival::ArchivalService;
use crate::services::backup::BackupService;
use crate::services::compression::CompressionService;
use crate::services::monitor::StorageMonitor;
use crate::services::tiering::TierEngine;
use crate::services::views::ViewManager;
use crate::state::AppState;
use crate::store::fs_object::FsObjectStore;
use crate::store::memory::MemoryStore;
use crate::store::postgres::PostgresStore;
use crate::store::{ObjectStore, TimeSeriesStore};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tierkeeper=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()
        .expect("Invalid LISTEN_ADDR");

    let config = EngineConfig::from_env();
    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(error = %e, "Failed to create data directory");
        std::process::exit(1);
    }

    // Pick the time-series store: PostgreSQL/TimescaleDB when configured,
    // otherwise an in-memory store suitable for development only.
    let store: Arc<dyn TimeSeriesStore> = match std::env::var("DATABASE_URL") {
        Ok(database_url) => match PostgresStore::connect(&database_url).await {
            Ok(store) => {
                info!(
                    "Database: {}",
                    database_url.split('@').last().unwrap_or("***")
                );
                Arc::new(store)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to database");
                std::process::exit(1);
            }
        },
        Err(_) => {
            warn!("DATABASE_URL not set, using in-memory store (data is not durable)");
            MemoryStore::new()
        }
    };

    let objects: Arc<dyn ObjectStore> =
        Arc::new(FsObjectStore::new(config.data_dir.join("cold")));

    let policy_store = match PolicyStore::open(config.policies_path()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(error = %e, "Failed to load retention policies");
            std::process::exit(1);
        }
    };

    let compression = Arc::new(CompressionService::new(
        config.worker_slots,
        config.history_capacity,
    ));
    let tiering = Arc::new(TierEngine::new(
        Arc::clone(&store),
        Arc::clone(&policy_store),
        config.warm_retention,
        config.bucket_width,
        config.cleanup_chunk,
        config.history_capacity,
    ));
    let archival = Arc::new(ArchivalService::new(
        Arc::clone(&store),
        Arc::clone(&objects),
        Arc::clone(&compression),
        Arc::clone(&policy_store),
        config.history_capacity,
    ));
    let backup = Arc::new(BackupService::new(
        Arc::clone(&store),
        Arc::clone(&policy_store),
        Arc::clone(&compression),
        config.backups_dir(),
        config.config_dir(),
        config.history_capacity,
    ));
    let monitor = Arc::new(StorageMonitor::new(
        Arc::clone(&store),
        config.warn_threshold_bytes,
        config.critical_threshold_bytes,
        config.history_capacity,
    ));
    let view_manager = Arc::new(ViewManager::new(
        Arc::clone(&store),
        config.history_capacity,
    ));

    let scheduler = match Scheduler::new(
        config,
        Arc::clone(&tiering),
        Arc::clone(&archival),
        Arc::clone(&backup),
        Arc::clone(&monitor),
        Arc::clone(&view_manager),
        Arc::clone(&policy_store),
    ) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!(error = %e, "Failed to initialize scheduler");
            std::process::exit(1);
        }
    };

    // The scheduler loop owns all job dispatch
    let loop_scheduler = Arc::clone(&scheduler);
    tokio::spawn(async move {
        loop_scheduler.run_loop().await;
    });

    let state = AppState {
        store,
        scheduler,
        policies: policy_store,
        monitor,
        views: view_manager,
        backup,
    };

    // Build router
    let app = Router::new()
        // Health probes
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        // Scheduler
        .route("/api/v1/jobs", get(jobs::list_jobs))
        .route("/api/v1/jobs/:job_type/history", get(jobs::job_history))
        .route("/api/v1/jobs/:job_type/trigger", post(jobs::trigger_job))
        // Retention policies
        .route("/api/v1/policies", get(policies::list_policies))
        .route("/api/v1/policies", post(policies::create_policy))
        .route("/api/v1/policies/:name", get(policies::get_policy))
        .route("/api/v1/policies/:name", put(policies::update_policy))
        .route("/api/v1/policies/:name", delete(policies::delete_policy))
        // Alerts
        .route("/api/v1/alerts", get(alerts::list_alerts))
        // Materialized views
        .route("/api/v1/views/:view", get(views::query_view))
        // Backups
        .route("/api/v1/backups", get(backups::list_backups))
        .route("/api/v1/backups", post(backups::create_backup))
        .route(
            "/api/v1/backups/:backup_id/restore",
            post(backups::restore_backup),
        )
        // State and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!(
        "TierKeeper v{} starting on {}",
        env!("CARGO_PKG_VERSION"),
        listen_addr
    );

    let listener = tokio::net::TcpListener::bind(listen_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
