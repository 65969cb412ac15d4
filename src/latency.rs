//! Bounded in-memory latency rollups for the dashboard paths.
//!
//! Keeps a small sample window per operation so p95s can be logged at
//! shutdown without persistent storage. A cached dashboard read should be
//! near-instant; a full recompute gets the fetch-timeout budget.

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

const MAX_SAMPLES_PER_OPERATION: usize = 256;

/// Serving a dashboard from cache should not involve the network.
pub const CACHED_READ_BUDGET_MS: u128 = 150;
/// A recompute is allowed the full fetch window.
pub const REFRESH_BUDGET_MS: u128 = 45_000;

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRollup {
    pub operation: String,
    pub sample_count: usize,
    pub p50_ms: u128,
    pub p95_ms: u128,
    pub max_ms: u128,
    pub budget_ms: u128,
    pub budget_violations: u64,
    pub degraded_count: u64,
    pub last_recorded_at: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    pub generated_at: String,
    pub operations: Vec<OperationRollup>,
}

#[derive(Debug, Clone, Default)]
struct OperationWindow {
    samples_ms: VecDeque<u128>,
    budget_ms: u128,
    budget_violations: u64,
    degraded_count: u64,
    last_recorded_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct LatencyRecorder {
    windows: Mutex<HashMap<String, OperationWindow>>,
}

impl LatencyRecorder {
    fn global() -> &'static Self {
        static RECORDER: OnceLock<LatencyRecorder> = OnceLock::new();
        RECORDER.get_or_init(Self::default)
    }

    fn record_sample(&self, operation: &str, elapsed_ms: u128, budget_ms: u128) {
        let mut windows = self.windows.lock();

        let window = windows.entry(operation.to_string()).or_default();
        window.budget_ms = budget_ms;
        if elapsed_ms > budget_ms {
            window.budget_violations += 1;
        }
        if window.samples_ms.len() >= MAX_SAMPLES_PER_OPERATION {
            window.samples_ms.pop_front();
        }
        window.samples_ms.push_back(elapsed_ms);
        window.last_recorded_at = Some(Utc::now());
    }

    fn increment_degraded(&self, operation: &str) {
        let mut windows = self.windows.lock();
        let window = windows.entry(operation.to_string()).or_default();
        window.degraded_count += 1;
        if window.last_recorded_at.is_none() {
            window.last_recorded_at = Some(Utc::now());
        }
    }

    fn snapshot(&self) -> LatencyReport {
        let windows = self.windows.lock();

        let mut operations: Vec<OperationRollup> = windows
            .iter()
            .map(|(operation, window)| {
                let mut values: Vec<u128> = window.samples_ms.iter().copied().collect();
                values.sort_unstable();
                let sample_count = values.len();
                let max_ms = values.last().copied().unwrap_or(0);

                OperationRollup {
                    operation: operation.clone(),
                    sample_count,
                    p50_ms: percentile(&values, 50).unwrap_or(0),
                    p95_ms: percentile(&values, 95).unwrap_or(0),
                    max_ms,
                    budget_ms: window.budget_ms,
                    budget_violations: window.budget_violations,
                    degraded_count: window.degraded_count,
                    last_recorded_at: window.last_recorded_at.map(|dt| dt.to_rfc3339()),
                }
            })
            .collect();

        operations.sort_by(|a, b| b.p95_ms.cmp(&a.p95_ms).then(a.operation.cmp(&b.operation)));

        LatencyReport {
            generated_at: Utc::now().to_rfc3339(),
            operations,
        }
    }
}

/// Nearest-rank percentile over a sorted slice.
fn percentile(sorted: &[u128], p: usize) -> Option<u128> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (p * sorted.len()).div_ceil(100);
    let idx = rank.saturating_sub(1).min(sorted.len() - 1);
    Some(sorted[idx])
}

pub fn record_latency(operation: &str, elapsed_ms: u128, budget_ms: u128) {
    LatencyRecorder::global().record_sample(operation, elapsed_ms, budget_ms);
}

pub fn increment_degraded(operation: &str) {
    LatencyRecorder::global().increment_degraded(operation);
}

pub fn get_rollups() -> LatencyReport {
    LatencyRecorder::global().snapshot()
}
