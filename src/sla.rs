//! SLA calculator: required ship dates and compliance.
//!
//! The cutoff rule is expressed in UTC hours that track 8:00 AM Eastern:
//! 12:00 UTC while Eastern observes daylight saving time, 13:00 UTC under
//! standard time. Which regime applies is decided by the evaluation instant,
//! not the order's allocation date; the same rule picks the required ship
//! time-of-day (4:00 PM Eastern as a UTC hour).

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Offset, TimeZone, Timelike, Utc};
use chrono_tz::America::New_York;
use serde::{Deserialize, Serialize};

use crate::calendar;
use crate::types::Order;

/// Cutoff hour (UTC) while Eastern observes DST.
const CUTOFF_HOUR_DST: u32 = 12;
/// Cutoff hour (UTC) under Eastern standard time.
const CUTOFF_HOUR_STANDARD: u32 = 13;
/// Required ship time-of-day (UTC) while Eastern observes DST.
const SHIP_HOUR_DST: u32 = 20;
/// Required ship time-of-day (UTC) under Eastern standard time.
const SHIP_HOUR_STANDARD: u32 = 21;

/// Why an order was excluded from aggregation. Skips are tallied, never
/// treated as SLA failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    MissingAllocatedAt,
    BadAllocatedAt,
    BadShippedAt,
    UnschedulableDate,
}

/// Whether US Eastern is on daylight saving time at `instant`.
pub fn eastern_observes_dst(instant: DateTime<Utc>) -> bool {
    // EDT is UTC-4, EST is UTC-5.
    instant.with_timezone(&New_York).offset().fix().local_minus_utc() == -4 * 3600
}

/// Eastern calendar date of a UTC instant.
pub fn eastern_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&New_York).date_naive()
}

/// Parse a timestamp in any of the shapes the upstream stores produce:
/// RFC 3339 strings, naive ISO strings (interpreted as UTC), structured
/// `{"seconds": n}` / `{"_seconds": n}` objects from document-store exports,
/// and bare epoch numbers.
pub fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => parse_timestamp_str(s),
        serde_json::Value::Number(n) => epoch_to_utc(n.as_i64()?),
        serde_json::Value::Object(map) => {
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?.as_i64()?;
            DateTime::from_timestamp(seconds, 0)
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

fn epoch_to_utc(raw: i64) -> Option<DateTime<Utc>> {
    // 1e11 seconds is the year 5138; anything that large is milliseconds.
    if raw.abs() >= 100_000_000_000 {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

/// An order with its timestamps parsed, ready for evaluation.
#[derive(Debug, Clone)]
pub struct ParsedOrder {
    pub order_number: String,
    pub allocated_at: DateTime<Utc>,
    pub shipped_at: Option<DateTime<Utc>>,
}

/// Parse a wire order, classifying unusable records. A malformed `shippedAt`
/// skips the order rather than counting it as unshipped.
pub fn parse_order(order: &Order) -> Result<ParsedOrder, SkipReason> {
    let allocated_raw = order.allocated_at.as_ref().ok_or(SkipReason::MissingAllocatedAt)?;
    if allocated_raw.is_null() {
        return Err(SkipReason::MissingAllocatedAt);
    }
    let allocated_at = parse_timestamp(allocated_raw).ok_or(SkipReason::BadAllocatedAt)?;
    let shipped_at = match order.shipped_at.as_ref() {
        None => None,
        Some(serde_json::Value::Null) => None,
        Some(raw) => Some(parse_timestamp(raw).ok_or(SkipReason::BadShippedAt)?),
    };
    Ok(ParsedOrder { order_number: order.order_number.clone(), allocated_at, shipped_at })
}

/// Required ship instant for an order, or `None` when it has no usable
/// allocation timestamp.
pub fn required_ship_date(order: &Order, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let allocated = order.allocated_at.as_ref().and_then(parse_timestamp)?;
    required_ship_instant(allocated, now)
}

/// Required ship instant for an allocation time. Allocations before the
/// cutoff ship the same UTC calendar day, later ones the next day; weekends
/// are advanced over (holidays are not); the time-of-day is the fixed ship
/// hour for the current DST regime.
pub fn required_ship_instant(
    allocated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let dst = eastern_observes_dst(now);
    let cutoff_hour = if dst { CUTOFF_HOUR_DST } else { CUTOFF_HOUR_STANDARD };
    let ship_hour = if dst { SHIP_HOUR_DST } else { SHIP_HOUR_STANDARD };

    let mut day = allocated_at.date_naive();
    if allocated_at.hour() >= cutoff_hour {
        day = day.succ_opt()?;
    }
    while calendar::is_weekend(day) {
        day = day.succ_opt()?;
    }
    Utc.with_ymd_and_hms(day.year(), day.month(), day.day(), ship_hour, 0, 0).single()
}

/// Whether a shipped order met its SLA: the Eastern calendar date of the ship
/// instant must not be after the Eastern calendar date of the required ship
/// instant. Missing inputs are never "met".
pub fn sla_met(shipped_at: Option<DateTime<Utc>>, order: &Order, now: DateTime<Utc>) -> bool {
    let Some(shipped) = shipped_at else {
        return false;
    };
    let Some(required) = required_ship_date(order, now) else {
        return false;
    };
    eastern_date(shipped) <= eastern_date(required)
}

/// Precomputed SLA outcome for one order.
#[derive(Debug, Clone)]
pub struct OrderOutcome {
    pub order_number: String,
    /// Eastern calendar date of the required ship instant.
    pub required_day: NaiveDate,
    pub met: bool,
}

/// Evaluate one wire order into its outcome, or the reason it was skipped.
pub fn evaluate_order(order: &Order, now: DateTime<Utc>) -> Result<OrderOutcome, SkipReason> {
    let parsed = parse_order(order)?;
    let required =
        required_ship_instant(parsed.allocated_at, now).ok_or(SkipReason::UnschedulableDate)?;
    let met = match parsed.shipped_at {
        Some(shipped) => eastern_date(shipped) <= eastern_date(required),
        None => false,
    };
    Ok(OrderOutcome {
        order_number: parsed.order_number,
        required_day: eastern_date(required),
        met,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;
    use serde_json::json;

    /// Fixed evaluation instants: one under daylight saving, one under
    /// standard time.
    fn dst_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 15, 0, 0, 0).unwrap()
    }

    fn standard_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    fn order(number: &str, allocated: Option<&str>, shipped: Option<serde_json::Value>) -> Order {
        Order {
            order_number: number.to_string(),
            allocated_at: allocated.map(|s| json!(s)),
            shipped_at: shipped,
        }
    }

    #[test]
    fn dst_detection_matches_known_dates() {
        assert!(eastern_observes_dst(dst_now()));
        assert!(!eastern_observes_dst(standard_now()));
    }

    #[test]
    fn before_cutoff_ships_same_day() {
        // Monday 2025-07-28, 11:59 UTC is before the 12:00 DST cutoff.
        let o = order("SO-1", Some("2025-07-28T11:59:00"), None);
        let required = required_ship_date(&o, dst_now()).unwrap();
        assert_eq!(required, Utc.with_ymd_and_hms(2025, 7, 28, 20, 0, 0).unwrap());
    }

    #[test]
    fn at_cutoff_rolls_to_next_day() {
        let o = order("SO-2", Some("2025-07-28T12:00:00"), None);
        let required = required_ship_date(&o, dst_now()).unwrap();
        assert_eq!(required, Utc.with_ymd_and_hms(2025, 7, 29, 20, 0, 0).unwrap());
    }

    #[test]
    fn standard_time_uses_the_later_cutoff_and_ship_hour() {
        // Monday 2025-01-06, 12:30 UTC: after the DST cutoff but before the
        // 13:00 standard-time cutoff.
        let o = order("SO-3", Some("2025-01-06T12:30:00"), None);
        let required = required_ship_date(&o, standard_now()).unwrap();
        assert_eq!(required, Utc.with_ymd_and_hms(2025, 1, 6, 21, 0, 0).unwrap());

        let late = order("SO-4", Some("2025-01-06T13:00:00"), None);
        let required = required_ship_date(&late, standard_now()).unwrap();
        assert_eq!(required, Utc.with_ymd_and_hms(2025, 1, 7, 21, 0, 0).unwrap());
    }

    #[test]
    fn weekend_allocations_roll_to_monday() {
        // Saturday 2025-07-26 before the cutoff.
        let saturday = order("SO-5", Some("2025-07-26T09:00:00"), None);
        let required = required_ship_date(&saturday, dst_now()).unwrap();
        assert_eq!(required, Utc.with_ymd_and_hms(2025, 7, 28, 20, 0, 0).unwrap());

        // Friday 2025-07-25 after the cutoff lands on Saturday first.
        let friday = order("SO-6", Some("2025-07-25T15:00:00"), None);
        let required = required_ship_date(&friday, dst_now()).unwrap();
        assert_eq!(required, Utc.with_ymd_and_hms(2025, 7, 28, 20, 0, 0).unwrap());
    }

    #[test]
    fn holidays_are_not_advanced_over() {
        // Thursday 2025-07-03 after the cutoff rolls to Friday July 4th,
        // which is a federal holiday but still the required day.
        let o = order("SO-7", Some("2025-07-03T15:00:00"), None);
        let required = required_ship_date(&o, dst_now()).unwrap();
        assert_eq!(eastern_date(required), NaiveDate::from_ymd_opt(2025, 7, 4).unwrap());
    }

    #[test]
    fn required_ship_date_is_idempotent() {
        let o = order("SO-8", Some("2025-07-28T17:18:42"), None);
        let now = dst_now();
        assert_eq!(required_ship_date(&o, now), required_ship_date(&o, now));
    }

    #[test]
    fn required_ship_date_lands_on_a_weekday_in_both_regimes() {
        let o = order("SO-9", Some("2025-07-28T17:18:42"), None);
        for now in [dst_now(), standard_now()] {
            let required = required_ship_date(&o, now).unwrap();
            let weekday = required.date_naive().weekday();
            assert!(!matches!(weekday, Weekday::Sat | Weekday::Sun), "landed on {:?}", weekday);
        }
    }

    #[test]
    fn missing_allocation_has_no_required_date() {
        let o = order("SO-10", None, None);
        assert_eq!(required_ship_date(&o, dst_now()), None);
    }

    #[test]
    fn sla_met_is_false_without_shipped_at() {
        let o = order("SO-11", Some("2025-07-28T09:00:00"), None);
        assert!(!sla_met(None, &o, dst_now()));
    }

    #[test]
    fn sla_met_compares_eastern_calendar_dates() {
        // Required: Tuesday 2025-07-29 at 20:00 UTC (Eastern date July 29).
        let o = order("SO-12", Some("2025-07-28T15:00:00"), None);
        let now = dst_now();

        // 2025-07-30T02:00Z is still July 29 in New York.
        let shipped = Utc.with_ymd_and_hms(2025, 7, 30, 2, 0, 0).unwrap();
        assert!(sla_met(Some(shipped), &o, now));

        // Shipped after the required instant but on the same Eastern day.
        let same_day_late = Utc.with_ymd_and_hms(2025, 7, 29, 23, 0, 0).unwrap();
        assert!(sla_met(Some(same_day_late), &o, now));

        // July 30 in New York misses.
        let next_day = Utc.with_ymd_and_hms(2025, 7, 30, 12, 0, 0).unwrap();
        assert!(!sla_met(Some(next_day), &o, now));
    }

    #[test]
    fn parse_timestamp_accepts_all_upstream_shapes() {
        let expected = Utc.with_ymd_and_hms(2025, 7, 28, 17, 18, 42).unwrap();
        assert_eq!(parse_timestamp(&json!("2025-07-28T17:18:42Z")), Some(expected));
        assert_eq!(parse_timestamp(&json!("2025-07-28T17:18:42")), Some(expected));
        assert_eq!(parse_timestamp(&json!({"seconds": expected.timestamp()})), Some(expected));
        assert_eq!(parse_timestamp(&json!({"_seconds": expected.timestamp()})), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp())), Some(expected));
        assert_eq!(parse_timestamp(&json!(expected.timestamp_millis())), Some(expected));
        assert_eq!(parse_timestamp(&json!("not a timestamp")), None);
        assert_eq!(parse_timestamp(&json!("")), None);
        assert_eq!(parse_timestamp(&json!(["2025-07-28"])), None);
    }

    #[test]
    fn parse_order_classifies_bad_records() {
        let missing = order("SO-13", None, None);
        assert_eq!(parse_order(&missing).unwrap_err(), SkipReason::MissingAllocatedAt);

        let null_alloc = Order {
            order_number: "SO-14".to_string(),
            allocated_at: Some(serde_json::Value::Null),
            shipped_at: None,
        };
        assert_eq!(parse_order(&null_alloc).unwrap_err(), SkipReason::MissingAllocatedAt);

        let bad_alloc = order("SO-15", Some("yesterday-ish"), None);
        assert_eq!(parse_order(&bad_alloc).unwrap_err(), SkipReason::BadAllocatedAt);

        let bad_shipped = order("SO-16", Some("2025-07-28T09:00:00"), Some(json!("???")));
        assert_eq!(parse_order(&bad_shipped).unwrap_err(), SkipReason::BadShippedAt);

        let null_shipped =
            order("SO-17", Some("2025-07-28T09:00:00"), Some(serde_json::Value::Null));
        let parsed = parse_order(&null_shipped).unwrap();
        assert!(parsed.shipped_at.is_none());
    }
}
