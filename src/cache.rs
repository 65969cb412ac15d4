//! Typed cache façade over the key-value store.
//!
//! Keys render as `<kind>:<YYYY-MM-DD>`. Store failures are logged and
//! swallowed here: a broken cache degrades to recomputation, never to a
//! failed refresh.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};

use crate::aggregator::DayRates;
use crate::kv::KvStore;
use crate::types::{CachedWindow, DailyMetric, SkipSummary};

const WINDOW_KIND: &str = "dailyMetrics";
const FILL_RATE_KIND: &str = "fillRate";
const PACK_SUCCESS_KIND: &str = "packSuccess";
/// Date of the most recent window write. The store has no scan, and the
/// emergency fallback needs "newest entry regardless of age".
const LATEST_POINTER_KEY: &str = "dailyMetrics:latest";

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Clone)]
pub struct MetricsCache {
    store: Arc<dyn KvStore>,
}

impl MetricsCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        MetricsCache { store }
    }

    fn date_key(kind: &str, date: NaiveDate) -> String {
        format!("{}:{}", kind, date.format(DATE_FORMAT))
    }

    /// The window computed on `date`, if cached.
    pub fn read_window(&self, date: NaiveDate) -> Option<CachedWindow> {
        self.read_json(&Self::date_key(WINDOW_KIND, date))
    }

    /// Store a window computed on `date` and advance the latest pointer.
    pub fn write_window(&self, date: NaiveDate, days: &[DailyMetric], skipped: &SkipSummary) {
        let window = CachedWindow {
            computed_at: Utc::now(),
            days: days.to_vec(),
            skipped: skipped.clone(),
        };
        self.write_json(&Self::date_key(WINDOW_KIND, date), &window);
        self.write_string(LATEST_POINTER_KEY, &date.format(DATE_FORMAT).to_string());
    }

    /// The most recent cached window regardless of age, with the date it was
    /// computed on.
    pub fn read_latest_window(&self) -> Option<(NaiveDate, CachedWindow)> {
        let pointer = self.read_string(LATEST_POINTER_KEY)?;
        let date = NaiveDate::parse_from_str(pointer.trim(), DATE_FORMAT).ok()?;
        let window = self.read_window(date)?;
        Some((date, window))
    }

    /// Drop the window cached under `date`.
    pub fn clear_window(&self, date: NaiveDate) {
        let key = Self::date_key(WINDOW_KIND, date);
        if let Err(e) = self.store.remove(&key) {
            log::warn!("Cache remove failed for {}: {}", key, e);
        }
    }

    pub fn read_fill_rate(&self, date: NaiveDate) -> Option<f64> {
        self.read_json(&Self::date_key(FILL_RATE_KIND, date))
    }

    pub fn write_fill_rate(&self, date: NaiveDate, value: f64) {
        self.write_json(&Self::date_key(FILL_RATE_KIND, date), &value);
    }

    pub fn read_pack_success(&self, date: NaiveDate) -> Option<f64> {
        self.read_json(&Self::date_key(PACK_SUCCESS_KIND, date))
    }

    pub fn write_pack_success(&self, date: NaiveDate, value: f64) {
        self.write_json(&Self::date_key(PACK_SUCCESS_KIND, date), &value);
    }

    /// Per-day rate lookups for the given window days.
    pub fn day_rates(&self, days: &[NaiveDate]) -> DayRates {
        let mut rates = DayRates::default();
        for &day in days {
            if let Some(rate) = self.read_fill_rate(day) {
                rates.fill_rates.insert(day, rate);
            }
            if let Some(rate) = self.read_pack_success(day) {
                rates.pack_success.insert(day, rate);
            }
        }
        rates
    }

    fn read_string(&self, key: &str) -> Option<String> {
        match self.store.get(key) {
            Ok(value) => value,
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    fn read_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.read_string(key)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("Cache entry {} is corrupt, ignoring: {}", key, e);
                None
            }
        }
    }

    fn write_string(&self, key: &str, value: &str) {
        if let Err(e) = self.store.set(key, value) {
            log::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_string(value) {
            Ok(raw) => self.write_string(key, &raw),
            Err(e) => log::warn!("Cache serialize failed for {}: {}", key, e),
        }
    }
}
