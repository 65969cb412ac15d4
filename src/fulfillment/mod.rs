//! Collaborator boundary: the order store, the pack-error store, and the
//! fill-rate endpoint.
//!
//! The service layer only sees these traits. `client` implements them against
//! the fulfillment HTTP API; `memory` provides canned implementations for
//! tests and offline runs.

pub mod client;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FetchError;
use crate::types::{Order, PackErrorEvent};

/// Source of order records.
#[async_trait]
pub trait OrderSource: Send + Sync {
    /// Orders allocated at or after `allocated_since`, newest first,
    /// optionally capped at `limit`. Records with absent or unreadable
    /// allocation timestamps still come back; the aggregator classifies them.
    async fn fetch_orders(
        &self,
        allocated_since: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, FetchError>;
}

/// Source of packing-error events.
#[async_trait]
pub trait PackErrorSource: Send + Sync {
    /// Events whose received timestamp falls within `[start, end]`, newest
    /// first.
    async fn fetch_pack_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PackErrorEvent>, FetchError>;
}

/// Endpoint reporting how many due orders are currently problem orders.
#[async_trait]
pub trait FillRateClient: Send + Sync {
    async fn fetch_problem_orders_count(&self) -> Result<u32, FetchError>;
}

/// The three collaborators bundled for injection into `AppState`.
#[derive(Clone)]
pub struct Sources {
    pub orders: Arc<dyn OrderSource>,
    pub pack_errors: Arc<dyn PackErrorSource>,
    pub fill_rate: Arc<dyn FillRateClient>,
}
