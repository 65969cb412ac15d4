//! In-memory collaborators for tests and offline runs.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{FillRateClient, OrderSource, PackErrorSource, Sources};
use crate::error::FetchError;
use crate::sla;
use crate::types::{Order, PackErrorEvent};

/// Canned order source with a failure toggle and a call counter.
#[derive(Default)]
pub struct MemoryOrderSource {
    orders: Mutex<Vec<Order>>,
    fail: AtomicBool,
    pub calls: AtomicU32,
}

impl MemoryOrderSource {
    pub fn new(orders: Vec<Order>) -> Self {
        MemoryOrderSource {
            orders: Mutex::new(orders),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_orders(&self, orders: Vec<Order>) {
        if let Ok(mut guard) = self.orders.lock() {
            *guard = orders;
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderSource for MemoryOrderSource {
    async fn fetch_orders(
        &self,
        allocated_since: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Network("Simulated outage".to_string()));
        }
        let guard = self
            .orders
            .lock()
            .map_err(|_| FetchError::Configuration("Order fixture lock poisoned".to_string()))?;
        // The threshold only excludes records that parse and are older; the
        // real endpoint still returns legacy rows with absent or mangled
        // allocation timestamps, so the fixture does too. Those sort last.
        let mut matching: Vec<(Option<DateTime<Utc>>, Order)> = guard
            .iter()
            .filter_map(|order| {
                match order.allocated_at.as_ref().and_then(sla::parse_timestamp) {
                    Some(allocated) if allocated < allocated_since => None,
                    parsed => Some((parsed, order.clone())),
                }
            })
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        if let Some(limit) = limit {
            matching.truncate(limit as usize);
        }
        Ok(matching.into_iter().map(|(_, order)| order).collect())
    }
}

/// Canned pack-error source.
#[derive(Default)]
pub struct MemoryPackErrorSource {
    events: Mutex<Vec<PackErrorEvent>>,
    fail: AtomicBool,
    pub calls: AtomicU32,
}

impl MemoryPackErrorSource {
    pub fn new(events: Vec<PackErrorEvent>) -> Self {
        MemoryPackErrorSource {
            events: Mutex::new(events),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_events(&self, events: Vec<PackErrorEvent>) {
        if let Ok(mut guard) = self.events.lock() {
            *guard = events;
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PackErrorSource for MemoryPackErrorSource {
    async fn fetch_pack_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PackErrorEvent>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Network("Simulated outage".to_string()));
        }
        let guard = self
            .events
            .lock()
            .map_err(|_| FetchError::Configuration("Event fixture lock poisoned".to_string()))?;
        let mut matching: Vec<(DateTime<Utc>, PackErrorEvent)> = guard
            .iter()
            .filter_map(|event| {
                let received = sla::parse_timestamp(&event.received_at)?;
                (received >= start && received <= end).then(|| (received, event.clone()))
            })
            .collect();
        matching.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(matching.into_iter().map(|(_, event)| event).collect())
    }
}

/// Canned fill-rate endpoint.
#[derive(Default)]
pub struct MemoryFillRate {
    problem_count: AtomicU32,
    fail: AtomicBool,
    pub calls: AtomicU32,
}

impl MemoryFillRate {
    pub fn new(problem_count: u32) -> Self {
        MemoryFillRate {
            problem_count: AtomicU32::new(problem_count),
            fail: AtomicBool::new(false),
            calls: AtomicU32::new(0),
        }
    }

    pub fn set_problem_count(&self, count: u32) {
        self.problem_count.store(count, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl FillRateClient for MemoryFillRate {
    async fn fetch_problem_orders_count(&self) -> Result<u32, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(FetchError::Api("Simulated endpoint failure".to_string()));
        }
        Ok(self.problem_count.load(Ordering::SeqCst))
    }
}

/// Bundle fixtures into `Sources`, returning the concrete handles so tests
/// can flip toggles and read call counters.
pub fn fixtures(
    orders: Vec<Order>,
) -> (Sources, Arc<MemoryOrderSource>, Arc<MemoryPackErrorSource>, Arc<MemoryFillRate>) {
    let order_source = Arc::new(MemoryOrderSource::new(orders));
    let pack_source = Arc::new(MemoryPackErrorSource::new(Vec::new()));
    let fill_rate = Arc::new(MemoryFillRate::new(0));
    let sources = Sources {
        orders: order_source.clone(),
        pack_errors: pack_source.clone(),
        fill_rate: fill_rate.clone(),
    };
    (sources, order_source, pack_source, fill_rate)
}
