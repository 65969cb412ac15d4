//! Error taxonomy for refresh cycles.
//!
//! Nothing here is fatal: fetch errors fall back to cached data, cache errors
//! fall back to fresh computation, and fill-rate errors fall back to zeroed
//! defaults. The types exist so each fallback can classify what it recovered
//! from and say so in the logs and the connection indicator.

use serde::{Deserialize, Serialize};

/// Errors from the fulfillment data sources (order store, pack-error store,
/// fill-rate endpoint).
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("API reported failure: {0}")]
    Api(String),

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl FetchError {
    /// Whether retrying the same call later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network(_) | FetchError::Timeout(_) => true,
            FetchError::Http { status, .. } => *status == 429 || *status >= 500,
            FetchError::Api(_) | FetchError::Decode(_) | FetchError::Configuration(_) => false,
        }
    }

    /// Short guidance for logs and the connection indicator.
    pub fn recovery_suggestion(&self) -> String {
        match self {
            FetchError::Network(_) => "Check your internet connection and retry".to_string(),
            FetchError::Timeout(secs) => {
                format!("The fulfillment API did not answer within {}s; retry shortly", secs)
            }
            FetchError::Http { status, .. } if *status == 429 => {
                "The fulfillment API is rate limiting; wait a minute before retrying".to_string()
            }
            FetchError::Http { status, .. } if *status >= 500 => {
                "The fulfillment API is having trouble; retry shortly".to_string()
            }
            FetchError::Http { .. } => {
                "Check apiBaseUrl and apiToken in ~/.shipdeck/config.json".to_string()
            }
            FetchError::Api(msg) => format!("The API rejected the request: {}", msg),
            FetchError::Decode(_) => {
                "The API returned an unexpected shape; check for a version mismatch".to_string()
            }
            FetchError::Configuration(_) => "Fix ~/.shipdeck/config.json and restart".to_string(),
        }
    }
}

/// Errors from the key-value cache layer. Callers log these and proceed.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O error: {0}")]
    Io(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Connection indicator carried on every dashboard payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum ConnectionStatus {
    Ok,
    /// Live fetch failed but cached data is being served.
    Degraded {
        message: String,
        #[serde(rename = "canRetry")]
        can_retry: bool,
    },
    /// Live fetch failed and no cached data exists.
    Offline { message: String },
}

impl ConnectionStatus {
    /// Degraded status describing a failed live fetch that was absorbed by
    /// the cache.
    pub fn degraded_from(err: &FetchError) -> Self {
        ConnectionStatus::Degraded {
            message: format!("Connection issue, using cached data. {}", err.recovery_suggestion()),
            can_retry: err.is_retryable(),
        }
    }
}
