//! Daily cache invalidation scheduler.
//!
//! One long-lived loop owns the schedule: compute the next firing from the
//! cron expression, sleep until then (or shutdown), mark the cache stale,
//! recompute, and give the backfill a chance to run. The target is
//! recomputed from "now" after each firing, so a wake after system sleep
//! fires the missed slot immediately instead of drifting.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tokio::sync::watch;

use crate::backfill;
use crate::error::FetchError;
use crate::services::dashboard::{self, DashboardResult};
use crate::state::AppState;
use crate::types::{RefreshState, RefreshTrigger, ScheduleEntry};

/// How long to wait before rechecking a disabled or unparseable schedule
const RECHECK_INTERVAL_SECS: u64 = 300;

/// Parse a cron expression
pub fn parse_cron(expr: &str) -> Result<Schedule, FetchError> {
    // The cron crate expects 6 fields (with seconds), but we use 5-field format
    // Add "0" for seconds at the start
    let full_expr = format!("0 {}", expr);

    full_expr.parse::<Schedule>().map_err(|e| {
        FetchError::Configuration(format!("Invalid cron expression '{}': {}", expr, e))
    })
}

pub fn parse_timezone(name: &str) -> Result<Tz, FetchError> {
    name.parse()
        .map_err(|_| FetchError::Configuration(format!("Invalid timezone: {}", name)))
}

/// Next firing of the schedule after `now`, in UTC.
pub fn next_fire(entry: &ScheduleEntry, now: DateTime<Utc>) -> Result<DateTime<Utc>, FetchError> {
    let schedule = parse_cron(&entry.cron)?;
    let tz = parse_timezone(&entry.timezone)?;

    let now_local = now.with_timezone(&tz);
    schedule
        .after(&now_local)
        .next()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| FetchError::Configuration("No upcoming scheduled time".to_string()))
}

/// Run the invalidation loop until the shutdown channel flips to true.
pub async fn run_invalidation_loop(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let entry = state.config_snapshot().schedules.cache_invalidation;

        if !entry.enabled {
            log::info!("Cache invalidation schedule disabled, scheduler idle");
            if wait_or_shutdown(&mut shutdown, Duration::from_secs(RECHECK_INTERVAL_SECS)).await {
                break;
            }
            continue;
        }

        let next = match next_fire(&entry, Utc::now()) {
            Ok(next) => next,
            Err(e) => {
                log::error!("Cannot schedule cache invalidation: {}", e);
                if wait_or_shutdown(&mut shutdown, Duration::from_secs(RECHECK_INTERVAL_SECS)).await
                {
                    break;
                }
                continue;
            }
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        log::info!("Next cache invalidation at {} ({}s away)", next, wait.as_secs());
        if wait_or_shutdown(&mut shutdown, wait).await {
            break;
        }

        log::info!("Cache invalidation fired, window is stale");
        state.set_refresh_state(RefreshState::Stale);
        let result = dashboard::load_dashboard(&state, RefreshTrigger::Scheduled, true).await;
        log_refresh_result(&result);
        backfill::maybe_spawn(state.clone());
    }
    log::info!("Scheduler shutting down");
}

/// Wait for `duration` or a shutdown signal, whichever comes first. Returns
/// true on shutdown. Watch notifications that are not a true value (or are
/// spurious) resume the same deadline.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            changed = shutdown.changed() => match changed {
                Ok(()) => {
                    if *shutdown.borrow() {
                        return true;
                    }
                }
                // Sender dropped: the daemon is going away.
                Err(_) => return true,
            },
        }
    }
}

fn log_refresh_result(result: &DashboardResult) {
    match result {
        DashboardResult::Success { data, freshness, .. } => {
            log::info!(
                "Scheduled refresh served {} day(s), freshness {:?}",
                data.days.len(),
                freshness
            );
        }
        DashboardResult::Empty { message } => {
            log::warn!("Scheduled refresh produced no data: {}", message);
        }
        DashboardResult::Error { message, .. } => {
            log::error!("Scheduled refresh failed: {}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(cron: &str, timezone: &str) -> ScheduleEntry {
        ScheduleEntry {
            enabled: true,
            cron: cron.to_string(),
            timezone: timezone.to_string(),
        }
    }

    #[test]
    fn test_parse_cron_half_past_midnight() {
        assert!(parse_cron("30 0 * * *").is_ok());
    }

    #[test]
    fn test_parse_cron_invalid() {
        assert!(parse_cron("not a cron").is_err());
    }

    #[test]
    fn test_parse_timezone_invalid() {
        assert!(parse_timezone("Mars/Olympus_Mons").is_err());
    }

    #[test]
    fn next_fire_under_daylight_saving() {
        let now = Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap();
        let next = next_fire(&entry("30 0 * * *", "America/New_York"), now).unwrap();
        // 00:30 EDT is 04:30 UTC.
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 7, 16, 4, 30, 0).unwrap());
    }

    #[test]
    fn next_fire_under_standard_time() {
        let now = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
        let next = next_fire(&entry("30 0 * * *", "America/New_York"), now).unwrap();
        // 00:30 EST is 05:30 UTC.
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 1, 16, 5, 30, 0).unwrap());
    }

    #[test]
    fn next_fire_can_land_on_the_same_utc_day() {
        // 23:00 Eastern on the 14th: the next 00:30 Eastern is an hour and a
        // half away, still July 15 in UTC.
        let now = Utc.with_ymd_and_hms(2025, 7, 15, 3, 0, 0).unwrap();
        let next = next_fire(&entry("30 0 * * *", "America/New_York"), now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2025, 7, 15, 4, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn wait_returns_true_on_shutdown() {
        let (tx, mut rx) = watch::channel(false);
        let waiter =
            tokio::spawn(
                async move { wait_or_shutdown(&mut rx, Duration::from_secs(600)).await },
            );
        tx.send(true).unwrap();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_returns_false_when_the_deadline_passes() {
        let (tx, mut rx) = watch::channel(false);
        // A non-shutdown notification must not cut the wait short.
        tx.send(false).unwrap();
        assert!(!wait_or_shutdown(&mut rx, Duration::from_millis(20)).await);
        drop(tx);
    }
}
