// Dashboard service — read-side policy for the metrics window.
// Same-day cache hit, recompute on miss or force, stale fallback on failure.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDate, Utc};

use crate::aggregator;
use crate::error::{ConnectionStatus, FetchError};
use crate::latency::{CACHED_READ_BUDGET_MS, REFRESH_BUDGET_MS};
use crate::sla;
use crate::state::{self, AppState};
use crate::types::{
    Config, DailyMetric, DashboardData, DataFreshness, RefreshState, RefreshTrigger, SkipSummary,
};

/// Result type for dashboard data loading
#[derive(Debug, serde::Serialize)]
#[allow(clippy::large_enum_variant)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum DashboardResult {
    Success {
        data: DashboardData,
        freshness: DataFreshness,
        connection: ConnectionStatus,
    },
    Empty {
        message: String,
    },
    Error {
        message: String,
        connection: ConnectionStatus,
    },
}

/// Why a recompute produced nothing to serve.
#[derive(Debug)]
enum RecomputeFailure {
    Fetch(FetchError),
    NoRecords,
}

impl RecomputeFailure {
    fn message(&self) -> String {
        match self {
            RecomputeFailure::Fetch(err) => err.to_string(),
            RecomputeFailure::NoRecords => "Order fetch returned no records".to_string(),
        }
    }
}

struct RecomputeOutcome {
    days: Vec<DailyMetric>,
    skipped: SkipSummary,
    orders_processed: u32,
    current_fill_rate: f64,
}

/// Load the dashboard snapshot, recomputing when today's window is absent or
/// `force` is set.
pub async fn load_dashboard(
    state: &AppState,
    trigger: RefreshTrigger,
    force: bool,
) -> DashboardResult {
    load_dashboard_at(state, trigger, force, Utc::now()).await
}

/// Same as [`load_dashboard`] with an injected clock.
pub async fn load_dashboard_at(
    state: &AppState,
    trigger: RefreshTrigger,
    force: bool,
    now: DateTime<Utc>,
) -> DashboardResult {
    let started = Instant::now();
    let today = sla::eastern_date(now);

    if !force {
        if let Some(window) = state.cache.read_window(today) {
            state.set_refresh_state(RefreshState::CachedToday);
            let fill_rate = state.cache.read_fill_rate(today).unwrap_or(0.0);
            let data = snapshot_from(window.days, window.skipped, fill_rate, window.computed_at);

            let elapsed_ms = started.elapsed().as_millis();
            crate::latency::record_latency("dashboard_load", elapsed_ms, CACHED_READ_BUDGET_MS);
            if elapsed_ms > CACHED_READ_BUDGET_MS {
                log::warn!(
                    "dashboard_load exceeded latency budget: {}ms > {}ms",
                    elapsed_ms,
                    CACHED_READ_BUDGET_MS
                );
            } else {
                log::debug!("dashboard_load served {} from cache in {}ms", today, elapsed_ms);
            }
            return DashboardResult::Success {
                data,
                freshness: DataFreshness::Cached,
                connection: ConnectionStatus::Ok,
            };
        }
    }

    state.set_refresh_state(RefreshState::Recomputing);
    let record = state::create_refresh_record(trigger);
    let record_id = record.id.clone();
    state.add_refresh_record(record);

    let config = state.config_snapshot();
    let result = match recompute(state, &config, today, now).await {
        Ok(outcome) => {
            state.set_refresh_state(RefreshState::CachedToday);
            state.update_refresh_record(&record_id, |r| {
                r.finished_at = Some(Utc::now());
                r.duration_secs = Some(started.elapsed().as_secs());
                r.success = true;
                r.freshness = Some(DataFreshness::Fresh);
                r.days_computed = outcome.days.len() as u32;
                r.orders_processed = outcome.orders_processed;
                r.orders_skipped = outcome.skipped.total();
            });
            log::info!(
                "Computed {} window days from {} orders ({} skipped)",
                outcome.days.len(),
                outcome.orders_processed,
                outcome.skipped.total()
            );
            DashboardResult::Success {
                data: snapshot_from(
                    outcome.days,
                    outcome.skipped,
                    outcome.current_fill_rate,
                    Utc::now(),
                ),
                freshness: DataFreshness::Fresh,
                connection: ConnectionStatus::Ok,
            }
        }
        Err(failure) => {
            let message = failure.message();
            state.update_refresh_record(&record_id, |r| {
                r.finished_at = Some(Utc::now());
                r.duration_secs = Some(started.elapsed().as_secs());
                r.success = false;
                r.error_message = Some(message.clone());
            });
            serve_fallback(state, failure, &message)
        }
    };

    let elapsed_ms = started.elapsed().as_millis();
    crate::latency::record_latency("metrics_refresh", elapsed_ms, REFRESH_BUDGET_MS);
    if elapsed_ms > REFRESH_BUDGET_MS {
        log::warn!(
            "metrics_refresh exceeded latency budget: {}ms > {}ms",
            elapsed_ms,
            REFRESH_BUDGET_MS
        );
    } else {
        log::debug!("metrics_refresh completed in {}ms", elapsed_ms);
    }
    result
}

/// Emergency path: serve the most recent cached window regardless of age, or
/// report empty/error when nothing was ever cached.
fn serve_fallback(state: &AppState, failure: RecomputeFailure, message: &str) -> DashboardResult {
    match state.cache.read_latest_window() {
        Some((date, window)) => {
            state.set_refresh_state(RefreshState::Stale);
            crate::latency::increment_degraded("metrics_refresh");
            log::warn!("Refresh failed ({}), serving window cached on {}", message, date);
            let fill_rate = state.cache.read_fill_rate(date).unwrap_or(0.0);
            let connection = match &failure {
                RecomputeFailure::Fetch(err) => ConnectionStatus::degraded_from(err),
                RecomputeFailure::NoRecords => ConnectionStatus::Degraded {
                    message: "Order fetch returned no records, using cached data".to_string(),
                    can_retry: true,
                },
            };
            DashboardResult::Success {
                data: snapshot_from(window.days, window.skipped, fill_rate, window.computed_at),
                freshness: DataFreshness::Stale,
                connection,
            }
        }
        None => {
            state.set_refresh_state(RefreshState::NoCache);
            match failure {
                RecomputeFailure::NoRecords => DashboardResult::Empty {
                    message: "No fulfillment orders in the lookback window yet.".to_string(),
                },
                RecomputeFailure::Fetch(err) => {
                    log::error!("Refresh failed with no cached fallback: {}", err);
                    DashboardResult::Error {
                        message: format!("Could not load fulfillment data: {}", err),
                        connection: ConnectionStatus::Offline {
                            message: err.recovery_suggestion(),
                        },
                    }
                }
            }
        }
    }
}

/// Fetch, aggregate, and cache one full window.
async fn recompute(
    state: &AppState,
    config: &Config,
    today: NaiveDate,
    now: DateTime<Utc>,
) -> Result<RecomputeOutcome, RecomputeFailure> {
    state.recomputations.fetch_add(1, Ordering::SeqCst);

    let fetch_timeout = Duration::from_secs(config.metrics.fetch_timeout_secs);
    let threshold = now - chrono::Duration::days(config.metrics.lookback_days);

    let orders = tokio::time::timeout(
        fetch_timeout,
        state
            .sources
            .orders
            .fetch_orders(threshold, config.metrics.order_fetch_limit),
    )
    .await
    .map_err(|_| RecomputeFailure::Fetch(FetchError::Timeout(config.metrics.fetch_timeout_secs)))?
    .map_err(RecomputeFailure::Fetch)?;

    if orders.is_empty() {
        return Err(RecomputeFailure::NoRecords);
    }
    log::info!("Fetched {} orders allocated since {}", orders.len(), threshold);

    let window_dates = aggregator::collect_business_days(
        today,
        config.metrics.window_days,
        config.metrics.search_days,
    );
    let rates = state.cache.day_rates(&window_dates);
    let rollup = aggregator::build_daily_window(
        &orders,
        &rates,
        today,
        now,
        config.metrics.window_days,
        config.metrics.search_days,
    );

    // Today's fill rate rides along with the refresh; the window itself only
    // covers completed days. A failed figure degrades to zero, never to a
    // failed refresh.
    let due_today = rollup
        .grouped
        .get(&today)
        .map(|group| group.order_count)
        .unwrap_or(0);
    let current_fill_rate = match tokio::time::timeout(
        fetch_timeout,
        state.sources.fill_rate.fetch_problem_orders_count(),
    )
    .await
    {
        Ok(Ok(problem_count)) => {
            let rate = aggregator::fill_rate_percentage(due_today, problem_count);
            state.cache.write_fill_rate(today, rate);
            rate
        }
        Ok(Err(err)) => {
            log::warn!("Fill rate fetch failed, defaulting to 0: {}", err);
            0.0
        }
        Err(_) => {
            log::warn!(
                "Fill rate fetch timed out after {}s, defaulting to 0",
                config.metrics.fetch_timeout_secs
            );
            0.0
        }
    };

    state.cache.write_window(today, &rollup.days, &rollup.skipped);

    Ok(RecomputeOutcome {
        days: rollup.days,
        skipped: rollup.skipped,
        orders_processed: orders.len() as u32,
        current_fill_rate,
    })
}

fn snapshot_from(
    days: Vec<DailyMetric>,
    skipped: SkipSummary,
    current_fill_rate: f64,
    computed_at: DateTime<Utc>,
) -> DashboardData {
    DashboardData {
        window_start: days.first().map(|d| d.date),
        window_end: days.last().map(|d| d.date),
        days,
        current_fill_rate,
        skipped,
        computed_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MetricsCache;
    use crate::fulfillment::memory::{fixtures, MemoryFillRate, MemoryOrderSource};
    use crate::kv::MemoryStore;
    use crate::types::Order;
    use chrono::TimeZone;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    /// Thursday 2025-08-21, mid-morning Eastern, under daylight saving.
    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 8, 21, 15, 0, 0).unwrap()
    }

    fn order(number: &str, allocated: Option<&str>, shipped: Option<&str>) -> Order {
        Order {
            order_number: number.to_string(),
            allocated_at: allocated.map(|v| json!(v)),
            shipped_at: shipped.map(|v| json!(v)),
        }
    }

    /// Mon Aug 18 through Wed Aug 20 feed a three-day window; the fourth
    /// order has no allocation and must be skipped.
    fn window_orders() -> Vec<Order> {
        vec![
            // Due Mon Aug 18 (before cutoff), shipped same Eastern day: met.
            order("SO-1", Some("2025-08-18T09:00:00Z"), Some("2025-08-18T19:00:00Z")),
            // Allocated after cutoff, due Tue Aug 19; 02:00Z on Aug 20 is
            // still Aug 19 Eastern: met.
            order("SO-2", Some("2025-08-18T13:00:00Z"), Some("2025-08-20T02:00:00Z")),
            // Due Tue Aug 19, never shipped: missed.
            order("SO-3", Some("2025-08-19T10:00:00Z"), None),
            order("SO-4", None, None),
        ]
    }

    fn harness(
        orders: Vec<Order>,
    ) -> (TempDir, AppState, Arc<MemoryOrderSource>, Arc<MemoryFillRate>) {
        let dir = tempfile::tempdir().unwrap();
        let (sources, order_source, _pack, fill_rate) = fixtures(orders);
        let cache = MetricsCache::new(Arc::new(MemoryStore::new()));
        let mut config = Config::default();
        config.metrics.window_days = 3;
        config.metrics.search_days = 10;
        config.metrics.fetch_timeout_secs = 5;
        let state = AppState::new(Some(config), cache, sources, dir.path().to_path_buf());
        (dir, state, order_source, fill_rate)
    }

    #[tokio::test]
    async fn fresh_compute_builds_the_window() {
        let (_dir, state, _orders, _fill) = harness(window_orders());

        let result =
            load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        let DashboardResult::Success { data, freshness, connection } = result else {
            panic!("expected success");
        };
        assert_eq!(freshness, DataFreshness::Fresh);
        assert_eq!(connection, ConnectionStatus::Ok);

        assert_eq!(data.window_start, NaiveDate::from_ymd_opt(2025, 8, 18));
        assert_eq!(data.window_end, NaiveDate::from_ymd_opt(2025, 8, 20));
        assert_eq!(data.days.len(), 3);
        assert_eq!(data.days[0].order_count, 1);
        assert_eq!(data.days[0].sla_percentage, 100.0);
        assert_eq!(data.days[1].order_count, 2);
        assert_eq!(data.days[1].sla_met_count, 1);
        assert_eq!(data.days[1].sla_percentage, 50.0);
        assert_eq!(data.days[2].order_count, 0);
        assert_eq!(data.days[2].sla_percentage, 0.0);
        assert_eq!(data.skipped.missing_allocated_at, 1);

        assert_eq!(state.refresh_state(), RefreshState::CachedToday);
        let history = state.get_refresh_history(5);
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].days_computed, 3);
        assert_eq!(history[0].orders_processed, 4);
        assert_eq!(history[0].orders_skipped, 1);
    }

    #[tokio::test]
    async fn second_load_hits_the_cache_without_recomputing() {
        let (_dir, state, order_source, _fill) = harness(window_orders());

        load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        let result =
            load_dashboard_at(&state, RefreshTrigger::Manual, false, fixed_now()).await;

        let DashboardResult::Success { freshness, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(freshness, DataFreshness::Cached);
        assert_eq!(order_source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.recomputations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn forced_refresh_bypasses_the_cache() {
        let (_dir, state, order_source, _fill) = harness(window_orders());

        load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        let result = load_dashboard_at(&state, RefreshTrigger::Manual, true, fixed_now()).await;

        let DashboardResult::Success { freshness, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(freshness, DataFreshness::Fresh);
        assert_eq!(order_source.calls.load(Ordering::SeqCst), 2);
        assert_eq!(state.recomputations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failure_falls_back_to_the_latest_window() {
        let (_dir, state, order_source, _fill) = harness(window_orders());

        load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        order_source.set_failing(true);

        // Next day: no window under the new date, live fetch down.
        let friday = Utc.with_ymd_and_hms(2025, 8, 22, 15, 0, 0).unwrap();
        let result = load_dashboard_at(&state, RefreshTrigger::Scheduled, false, friday).await;

        let DashboardResult::Success { data, freshness, connection } = result else {
            panic!("expected stale success");
        };
        assert_eq!(freshness, DataFreshness::Stale);
        assert!(matches!(connection, ConnectionStatus::Degraded { can_retry: true, .. }));
        assert_eq!(data.days.len(), 3);
        assert_eq!(state.refresh_state(), RefreshState::Stale);
    }

    #[tokio::test]
    async fn failure_with_no_cache_is_an_error() {
        let (_dir, state, order_source, _fill) = harness(window_orders());
        order_source.set_failing(true);

        let result =
            load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        let DashboardResult::Error { message, connection } = result else {
            panic!("expected error");
        };
        assert!(message.contains("Could not load fulfillment data"));
        assert!(matches!(connection, ConnectionStatus::Offline { .. }));
        assert_eq!(state.refresh_state(), RefreshState::NoCache);

        let history = state.get_refresh_history(5);
        assert_eq!(history.len(), 1);
        assert!(!history[0].success);
        assert!(history[0].error_message.is_some());
    }

    #[tokio::test]
    async fn zero_records_with_no_cache_is_empty() {
        let (_dir, state, _orders, _fill) = harness(Vec::new());

        let result =
            load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        assert!(matches!(result, DashboardResult::Empty { .. }));
        assert_eq!(state.refresh_state(), RefreshState::NoCache);
    }

    #[tokio::test]
    async fn zero_records_with_a_cached_window_serves_stale() {
        let (_dir, state, order_source, _fill) = harness(window_orders());

        load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        order_source.set_orders(Vec::new());

        let friday = Utc.with_ymd_and_hms(2025, 8, 22, 15, 0, 0).unwrap();
        let result = load_dashboard_at(&state, RefreshTrigger::Scheduled, false, friday).await;

        let DashboardResult::Success { freshness, connection, .. } = result else {
            panic!("expected stale success");
        };
        assert_eq!(freshness, DataFreshness::Stale);
        assert!(matches!(connection, ConnectionStatus::Degraded { .. }));
    }

    #[tokio::test]
    async fn fill_rate_failure_defaults_to_zero() {
        let (_dir, state, _orders, fill_rate) = harness(window_orders());
        fill_rate.set_failing(true);

        let result =
            load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        let DashboardResult::Success { data, freshness, .. } = result else {
            panic!("expected success");
        };
        assert_eq!(freshness, DataFreshness::Fresh);
        assert_eq!(data.current_fill_rate, 0.0);
        // A failed figure is never cached.
        let today = sla::eastern_date(fixed_now());
        assert!(state.cache.read_fill_rate(today).is_none());
    }

    #[tokio::test]
    async fn fill_rate_uses_orders_due_today() {
        // Two orders due Thursday Aug 21 itself: one allocated after
        // Wednesday's cutoff, one before Thursday's.
        let mut orders = window_orders();
        orders.push(order("SO-5", Some("2025-08-20T13:00:00Z"), None));
        orders.push(order("SO-6", Some("2025-08-21T09:00:00Z"), None));
        let (_dir, state, _orders, fill_rate) = harness(orders);
        fill_rate.set_problem_count(1);

        let result =
            load_dashboard_at(&state, RefreshTrigger::Startup, false, fixed_now()).await;
        let DashboardResult::Success { data, .. } = result else {
            panic!("expected success");
        };
        // 1 problem order out of 2 due today.
        assert_eq!(data.current_fill_rate, 50.0);
        let today = sla::eastern_date(fixed_now());
        assert_eq!(state.cache.read_fill_rate(today), Some(50.0));

        // The cached window itself still excludes today.
        assert_eq!(data.window_end, NaiveDate::from_ymd_opt(2025, 8, 20));
    }
}
