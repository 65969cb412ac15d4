//! ShipDeck: fulfillment-floor metrics, computed once per day and cached.
//!
//! The library half exposes the calendar/SLA engine, the aggregator, and the
//! cached dashboard service; the binary half (`run`) wires them to the
//! fulfillment API and keeps the cache fresh on a cron schedule.

pub mod aggregator;
mod backfill;
pub mod cache;
pub mod calendar;
pub mod error;
pub mod fulfillment;
pub mod kv;
mod latency;
mod scheduler;
pub mod services;
pub mod sla;
pub mod state;
pub mod types;

use std::sync::Arc;

use tokio::sync::watch;

use crate::fulfillment::client::FulfillApiClient;
use crate::fulfillment::Sources;
use crate::services::dashboard::{self, DashboardResult};
use crate::state::AppState;
use crate::types::RefreshTrigger;

/// Daemon entry point: load config, open the cache store, take a startup
/// snapshot, then run the invalidation scheduler until ctrl-c.
pub async fn run() -> Result<(), String> {
    let data_dir = state::shipdeck_dir()?;

    let config = match state::load_config() {
        Ok(config) => Some(config),
        Err(e) => {
            log::warn!("{} Continuing with defaults.", e);
            None
        }
    };

    let store: Arc<dyn kv::KvStore> = match kv::SqliteStore::open() {
        Ok(store) => Arc::new(store),
        Err(e) => {
            log::warn!("Cache store unavailable ({}); metrics will not survive a restart", e);
            Arc::new(kv::MemoryStore::new())
        }
    };
    let cache = cache::MetricsCache::new(store);

    let effective = config.clone().unwrap_or_default();
    let client = Arc::new(
        FulfillApiClient::from_config(&effective)
            .map_err(|e| format!("Failed to build API client: {}", e))?,
    );
    let sources = Sources {
        orders: client.clone(),
        pack_errors: client.clone(),
        fill_rate: client,
    };

    let state = Arc::new(AppState::new(config, cache, sources, data_dir));

    // Prime the cache before the scheduler takes over. A cold start with the
    // API down still comes up; the dashboard just reports it.
    match dashboard::load_dashboard(&state, RefreshTrigger::Startup, false).await {
        DashboardResult::Success { data, freshness, .. } => {
            log::info!(
                "Startup dashboard ready: {} day(s), freshness {:?}",
                data.days.len(),
                freshness
            );
        }
        DashboardResult::Empty { message } => log::warn!("Startup dashboard empty: {}", message),
        DashboardResult::Error { message, .. } => {
            log::error!("Startup dashboard failed: {}", message)
        }
    }

    backfill::maybe_spawn(state.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler_state = state.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler::run_invalidation_loop(scheduler_state, shutdown_rx).await;
    });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {}", e))?;
    log::info!("Shutdown signal received");

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;

    for op in latency::get_rollups().operations {
        log::info!(
            "Latency {}: p50 {}ms, p95 {}ms, max {}ms over {} sample(s), {} over budget",
            op.operation,
            op.p50_ms,
            op.p95_ms,
            op.max_ms,
            op.sample_count,
            op.budget_violations
        );
    }

    Ok(())
}
