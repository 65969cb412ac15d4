//! Daily aggregator: rolls a working set of orders into a fixed-length window
//! of per-business-day metrics.
//!
//! Pure compute, no I/O and no clock reads; the service layer supplies the
//! order set, the per-day rate lookups, and the evaluation instant.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};

use crate::calendar;
use crate::sla;
use crate::types::{DailyMetric, Order, SkipSummary};

/// Orders grouped under one required-ship day.
#[derive(Debug, Clone, Copy, Default)]
pub struct DayGroup {
    pub order_count: u32,
    pub sla_met_count: u32,
}

/// Per-day figures looked up from the cache during aggregation.
#[derive(Debug, Clone, Default)]
pub struct DayRates {
    pub fill_rates: HashMap<NaiveDate, f64>,
    pub pack_success: HashMap<NaiveDate, f64>,
}

/// Output of one aggregation pass. `grouped` keeps the per-day tallies for
/// callers that need counts beyond the window (the current day's due count,
/// for one).
#[derive(Debug, Clone)]
pub struct WindowRollup {
    pub days: Vec<DailyMetric>,
    pub skipped: SkipSummary,
    pub grouped: HashMap<NaiveDate, DayGroup>,
}

/// Group orders by the Eastern calendar date of their required ship instant,
/// evaluating each order's SLA outcome exactly once. Unusable orders are
/// tallied by reason.
pub fn group_orders(
    orders: &[Order],
    now: DateTime<Utc>,
) -> (HashMap<NaiveDate, DayGroup>, SkipSummary) {
    let mut grouped: HashMap<NaiveDate, DayGroup> = HashMap::new();
    let mut skipped = SkipSummary::default();
    for order in orders {
        match sla::evaluate_order(order, now) {
            Ok(outcome) => {
                let group = grouped.entry(outcome.required_day).or_default();
                group.order_count += 1;
                if outcome.met {
                    group.sla_met_count += 1;
                }
            }
            Err(reason) => {
                log::debug!("Skipping order {}: {:?}", order.order_number, reason);
                skipped.record(reason);
            }
        }
    }
    (grouped, skipped)
}

/// Collect the window's business days: walk backward from the day before
/// `today`, over at most `search_days` calendar days, until `window_days`
/// business days are found. Returned ascending (oldest first). The iteration
/// cap guarantees termination even when no day qualifies.
pub fn collect_business_days(
    today: NaiveDate,
    window_days: u32,
    search_days: u32,
) -> Vec<NaiveDate> {
    let mut collected = Vec::with_capacity(window_days as usize);
    let mut day = today;
    for _ in 0..search_days {
        day = match day.pred_opt() {
            Some(previous) => previous,
            None => break,
        };
        if calendar::is_business_day(day) {
            collected.push(day);
        }
        if collected.len() as u32 >= window_days {
            break;
        }
    }
    collected.reverse();
    collected
}

/// Build the rolling window of daily metrics.
pub fn build_daily_window(
    orders: &[Order],
    rates: &DayRates,
    today: NaiveDate,
    now: DateTime<Utc>,
    window_days: u32,
    search_days: u32,
) -> WindowRollup {
    let (grouped, skipped) = group_orders(orders, now);
    let days = collect_business_days(today, window_days, search_days)
        .into_iter()
        .map(|date| {
            let group = grouped.get(&date).copied().unwrap_or_default();
            day_metric(date, group, rates)
        })
        .collect();
    WindowRollup { days, skipped, grouped }
}

fn day_metric(date: NaiveDate, group: DayGroup, rates: &DayRates) -> DailyMetric {
    let sla_percentage = if group.order_count == 0 {
        0.0
    } else {
        round1(f64::from(group.sla_met_count) / f64::from(group.order_count) * 100.0)
    };
    DailyMetric {
        date,
        order_count: group.order_count,
        sla_met_count: group.sla_met_count,
        sla_percentage,
        fill_rate_percentage: rates.fill_rates.get(&date).copied().unwrap_or(0.0),
        pack_success_percentage: rates.pack_success.get(&date).copied().unwrap_or(100.0),
    }
}

/// Pack success for one day: share of due orders that did not incur a packing
/// error, 100 when nothing was due.
pub fn pack_success_percentage(order_count: u32, pack_error_count: u32) -> f64 {
    if order_count == 0 {
        return 100.0;
    }
    round1((f64::from(order_count) - f64::from(pack_error_count)) / f64::from(order_count) * 100.0)
}

/// Fill rate: share of due orders that are not problem orders, floored at
/// zero, 0 when nothing is due.
pub fn fill_rate_percentage(due_count: u32, problem_count: u32) -> f64 {
    if due_count == 0 {
        return 0.0;
    }
    let rate = (f64::from(due_count) - f64::from(problem_count)) / f64::from(due_count) * 100.0;
    round1(rate.max(0.0))
}

/// Round half-away-from-zero to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
