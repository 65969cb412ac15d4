//! Background backfill of per-day pack-success figures.
//!
//! Window days are cached without a pack-success value until this task has
//! queried the pack-error source for each day's Eastern range. Values land in
//! the rate cache and surface in the next window computation; a cached window
//! is never rewritten in place.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::America::New_York;

use crate::aggregator;
use crate::state::AppState;

/// Spawn the backfill task once a window is cached, unless disabled or
/// already claimed. At most one pass runs per process.
pub fn maybe_spawn(state: Arc<AppState>) {
    let config = state.config_snapshot();
    if !config.backfill.enabled {
        log::debug!("Pack-success backfill disabled in config");
        return;
    }
    if state.cache.read_latest_window().is_none() {
        log::debug!("No cached window yet, backfill deferred");
        return;
    }
    if !state.begin_backfill() {
        log::debug!("Pack-success backfill already ran or is running, skipping");
        return;
    }

    tokio::spawn(async move {
        let delay = config.backfill.startup_delay_secs;
        if delay > 0 {
            log::info!("Pack-success backfill scheduled in {}s", delay);
            tokio::time::sleep(Duration::from_secs(delay)).await;
        }
        let filled = run_backfill_pass(&state).await;
        state.finish_backfill(filled);
        log::info!("Pack-success backfill finished, {} day(s) filled", filled);
    });
}

/// Fill pack-success entries for cached window days that lack one. Returns
/// the number of days written. Per-day failures are logged and skipped; the
/// pass keeps going.
pub async fn run_backfill_pass(state: &AppState) -> u32 {
    let Some((window_date, window)) = state.cache.read_latest_window() else {
        log::debug!("No cached window yet, nothing to backfill");
        return 0;
    };

    let config = state.config_snapshot();
    let fetch_timeout = Duration::from_secs(config.metrics.fetch_timeout_secs);
    let pause = Duration::from_millis(config.backfill.per_day_pause_ms);

    let pending: Vec<(NaiveDate, u32)> = window
        .days
        .iter()
        .filter(|day| state.cache.read_pack_success(day.date).is_none())
        .map(|day| (day.date, day.order_count))
        .collect();

    if pending.is_empty() {
        log::debug!("Window of {} already has pack-success coverage", window_date);
        return 0;
    }
    log::info!(
        "Backfilling pack success for {} of {} window day(s)",
        pending.len(),
        window.days.len()
    );

    let mut filled = 0;
    for (date, order_count) in pending {
        let Some((start, end)) = eastern_day_bounds(date) else {
            log::warn!("Could not resolve Eastern bounds for {}, skipping", date);
            continue;
        };

        match tokio::time::timeout(
            fetch_timeout,
            state.sources.pack_errors.fetch_pack_errors(start, end),
        )
        .await
        {
            Ok(Ok(events)) => {
                let value = aggregator::pack_success_percentage(order_count, events.len() as u32);
                state.cache.write_pack_success(date, value);
                filled += 1;
                log::debug!(
                    "Pack success for {}: {} ({} errors / {} orders)",
                    date,
                    value,
                    events.len(),
                    order_count
                );
            }
            Ok(Err(err)) => {
                log::warn!("Pack error fetch failed for {}: {}", date, err);
            }
            Err(_) => {
                log::warn!(
                    "Pack error fetch for {} timed out after {}s",
                    date,
                    config.metrics.fetch_timeout_secs
                );
            }
        }

        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    filled
}

/// UTC bounds of one Eastern calendar day, inclusive on both ends at second
/// resolution. Eastern midnight always exists; DST shifts happen at 02:00.
pub fn eastern_day_bounds(date: NaiveDate) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let start = New_York
        .from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()?;
    let end = New_York
        .from_local_datetime(&date.and_hms_opt(23, 59, 59)?)
        .latest()?;
    Some((start.with_timezone(&Utc), end.with_timezone(&Utc)))
}
