//! Shared types: configuration, wire records, and dashboard payloads.
//!
//! Everything that crosses a serialization boundary lives here and renames to
//! camelCase, matching what the fulfillment API emits and what dashboard
//! consumers expect.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::sla::SkipReason;

// ---------------------------------------------------------------------------
// Configuration (~/.shipdeck/config.json)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub schedules: Schedules,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub backfill: BackfillConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: default_api_base_url(),
            api_token: None,
            schedules: Schedules::default(),
            metrics: MetricsConfig::default(),
            backfill: BackfillConfig::default(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:8787".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schedules {
    #[serde(default = "ScheduleEntry::default_cache_invalidation")]
    pub cache_invalidation: ScheduleEntry,
}

impl Default for Schedules {
    fn default() -> Self {
        Schedules { cache_invalidation: ScheduleEntry::default_cache_invalidation() }
    }
}

/// One cron schedule with its timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub enabled: bool,
    pub cron: String,
    pub timezone: String,
}

impl ScheduleEntry {
    /// Default invalidation schedule: 00:30 Eastern, daily.
    pub fn default_cache_invalidation() -> Self {
        ScheduleEntry {
            enabled: true,
            cron: "30 0 * * *".to_string(),
            timezone: "America/New_York".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Target number of business days in the rolling window.
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    /// Hard cap on calendar days examined while collecting the window.
    #[serde(default = "default_search_days")]
    pub search_days: u32,
    /// How far back the order fetch threshold reaches, in calendar days.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default)]
    pub order_fetch_limit: Option<u32>,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            window_days: default_window_days(),
            search_days: default_search_days(),
            lookback_days: default_lookback_days(),
            order_fetch_limit: None,
            fetch_timeout_secs: default_fetch_timeout_secs(),
        }
    }
}

fn default_window_days() -> u32 {
    30
}

fn default_search_days() -> u32 {
    60
}

fn default_lookback_days() -> i64 {
    45
}

fn default_fetch_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_backfill_delay_secs")]
    pub startup_delay_secs: u64,
    /// Pause between per-day historical calculations.
    #[serde(default = "default_backfill_pause_ms")]
    pub per_day_pause_ms: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        BackfillConfig {
            enabled: true,
            startup_delay_secs: default_backfill_delay_secs(),
            per_day_pause_ms: default_backfill_pause_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_backfill_delay_secs() -> u64 {
    45
}

fn default_backfill_pause_ms() -> u64 {
    400
}

// ---------------------------------------------------------------------------
// Wire records from the fulfillment stores
// ---------------------------------------------------------------------------

/// One fulfillment order as returned by the order source.
///
/// Timestamps arrive in whatever shape the upstream store exported: RFC 3339
/// strings, naive ISO strings, or structured seconds objects. They are kept
/// raw here and parsed once by the SLA calculator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_number: String,
    #[serde(default)]
    pub allocated_at: Option<serde_json::Value>,
    #[serde(default)]
    pub shipped_at: Option<serde_json::Value>,
}

/// One packing-error event. Only per-day counts are consumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackErrorEvent {
    pub received_at: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Derived metrics
// ---------------------------------------------------------------------------

/// One business day's metrics. `date` is the Eastern calendar date and acts as
/// the unique key within a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetric {
    pub date: NaiveDate,
    pub order_count: u32,
    pub sla_met_count: u32,
    pub sla_percentage: f64,
    pub fill_rate_percentage: f64,
    pub pack_success_percentage: f64,
}

/// How many orders the aggregator excluded, by reason.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipSummary {
    pub missing_allocated_at: u32,
    pub bad_allocated_at: u32,
    pub bad_shipped_at: u32,
    pub unschedulable_date: u32,
}

impl SkipSummary {
    pub fn record(&mut self, reason: SkipReason) {
        match reason {
            SkipReason::MissingAllocatedAt => self.missing_allocated_at += 1,
            SkipReason::BadAllocatedAt => self.bad_allocated_at += 1,
            SkipReason::BadShippedAt => self.bad_shipped_at += 1,
            SkipReason::UnschedulableDate => self.unschedulable_date += 1,
        }
    }

    pub fn total(&self) -> u32 {
        self.missing_allocated_at
            + self.bad_allocated_at
            + self.bad_shipped_at
            + self.unschedulable_date
    }
}

/// Envelope for a cached metrics window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedWindow {
    pub computed_at: DateTime<Utc>,
    pub days: Vec<DailyMetric>,
    #[serde(default)]
    pub skipped: SkipSummary,
}

/// Dashboard snapshot served to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardData {
    pub window_start: Option<NaiveDate>,
    pub window_end: Option<NaiveDate>,
    pub days: Vec<DailyMetric>,
    /// Fill rate for the current day; windows only cover completed days.
    pub current_fill_rate: f64,
    pub skipped: SkipSummary,
    pub computed_at: DateTime<Utc>,
}

/// How fresh a served snapshot is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFreshness {
    /// Computed during this request.
    Fresh,
    /// Served from today's cache entry.
    Cached,
    /// Served from an older cache entry after a failed live fetch.
    Stale,
}

/// Cache lifecycle for the metrics window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefreshState {
    #[default]
    NoCache,
    CachedToday,
    Stale,
    Recomputing,
}

// ---------------------------------------------------------------------------
// Refresh history
// ---------------------------------------------------------------------------

/// Record of one refresh run, persisted to the rolling history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRecord {
    pub id: String,
    pub trigger: RefreshTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_secs: Option<u64>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<DataFreshness>,
    pub days_computed: u32,
    pub orders_processed: u32,
    pub orders_skipped: u32,
}

/// What triggered a refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshTrigger {
    Startup,
    Scheduled,
    Manual,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.api_base_url, "http://localhost:8787");
        assert_eq!(config.metrics.window_days, 30);
        assert_eq!(config.metrics.search_days, 60);
        assert_eq!(config.metrics.lookback_days, 45);
        assert_eq!(config.metrics.fetch_timeout_secs, 30);
        assert!(config.backfill.enabled);
        assert_eq!(config.backfill.startup_delay_secs, 45);
        let entry = &config.schedules.cache_invalidation;
        assert!(entry.enabled);
        assert_eq!(entry.cron, "30 0 * * *");
        assert_eq!(entry.timezone, "America/New_York");
    }

    #[test]
    fn partial_config_keeps_other_defaults() {
        let config: Config = serde_json::from_str(
            r#"{"apiBaseUrl": "https://fulfill.example.com", "metrics": {"windowDays": 14}}"#,
        )
        .unwrap();
        assert_eq!(config.api_base_url, "https://fulfill.example.com");
        assert_eq!(config.metrics.window_days, 14);
        assert_eq!(config.metrics.search_days, 60);
        assert!(config.backfill.enabled);
    }

    #[test]
    fn daily_metric_serializes_camel_case() {
        let metric = DailyMetric {
            date: NaiveDate::from_ymd_opt(2025, 7, 28).unwrap(),
            order_count: 4,
            sla_met_count: 3,
            sla_percentage: 75.0,
            fill_rate_percentage: 96.4,
            pack_success_percentage: 100.0,
        };
        let json = serde_json::to_value(&metric).unwrap();
        assert_eq!(json["date"], "2025-07-28");
        assert_eq!(json["orderCount"], 4);
        assert_eq!(json["slaMetCount"], 3);
        assert_eq!(json["slaPercentage"], 75.0);
        assert_eq!(json["fillRatePercentage"], 96.4);
        assert_eq!(json["packSuccessPercentage"], 100.0);
    }

    #[test]
    fn skip_summary_tallies_by_reason() {
        let mut skipped = SkipSummary::default();
        skipped.record(SkipReason::MissingAllocatedAt);
        skipped.record(SkipReason::MissingAllocatedAt);
        skipped.record(SkipReason::BadShippedAt);
        assert_eq!(skipped.missing_allocated_at, 2);
        assert_eq!(skipped.bad_shipped_at, 1);
        assert_eq!(skipped.total(), 3);
    }

    #[test]
    fn order_accepts_mixed_timestamp_shapes() {
        let raw = r#"{
            "orderNumber": "SO-1001",
            "allocatedAt": "2025-07-28T09:15:00",
            "shippedAt": {"_seconds": 1753718400}
        }"#;
        let order: Order = serde_json::from_str(raw).unwrap();
        assert_eq!(order.order_number, "SO-1001");
        assert!(order.allocated_at.as_ref().unwrap().is_string());
        assert!(order.shipped_at.as_ref().unwrap().is_object());
    }

    #[test]
    fn order_tolerates_missing_timestamps() {
        let order: Order = serde_json::from_str(r#"{"orderNumber": "SO-1002"}"#).unwrap();
        assert!(order.allocated_at.is_none());
        assert!(order.shipped_at.is_none());
    }
}
