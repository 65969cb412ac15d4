//! HTTP client for the fulfillment API.
//!
//! One `FulfillApiClient` implements all three collaborator traits. Every
//! endpoint answers with a `{ success, data, error? }` envelope.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{FillRateClient, OrderSource, PackErrorSource};
use crate::error::FetchError;
use crate::types::{Config, Order, PackErrorEvent};

/// Client-level timeout. Individual calls are raced against the configured
/// fetch timeout by the service layer; this is the hard backstop.
const CLIENT_TIMEOUT_SECS: u64 = 30;

/// Longest error body worth carrying into logs.
const ERROR_BODY_LIMIT: usize = 200;

#[derive(Debug)]
pub struct FulfillApiClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl FulfillApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, FetchError> {
        if base_url.trim().is_empty() {
            return Err(FetchError::Configuration("apiBaseUrl is empty".to_string()));
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(CLIENT_TIMEOUT_SECS))
            .build()
            .map_err(|e| FetchError::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(FulfillApiClient {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::new(&config.api_base_url, config.api_token.clone())
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut request = self.http.request(method, format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request
    }

    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FetchError::Http {
            status: status.as_u16(),
            body: body.chars().take(ERROR_BODY_LIMIT).collect(),
        })
    }
}

#[async_trait::async_trait]
impl OrderSource for FulfillApiClient {
    async fn fetch_orders(
        &self,
        allocated_since: DateTime<Utc>,
        limit: Option<u32>,
    ) -> Result<Vec<Order>, FetchError> {
        #[derive(Deserialize)]
        struct OrdersResponse {
            success: bool,
            #[serde(default)]
            data: Vec<Order>,
            #[serde(default)]
            error: Option<String>,
        }

        let mut request = self
            .request(reqwest::Method::GET, "/api/orders")
            .query(&[("allocatedSince", allocated_since.to_rfc3339())]);
        if let Some(limit) = limit {
            request = request.query(&[("limit", limit.to_string())]);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("Order fetch failed: {}", e)))?;
        let body: OrdersResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("Order response: {}", e)))?;
        if !body.success {
            return Err(FetchError::Api(
                body.error.unwrap_or_else(|| "Order query failed".to_string()),
            ));
        }
        log::debug!("Fetched {} order(s) since {}", body.data.len(), allocated_since);
        Ok(body.data)
    }
}

#[async_trait::async_trait]
impl PackErrorSource for FulfillApiClient {
    async fn fetch_pack_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<PackErrorEvent>, FetchError> {
        #[derive(Deserialize)]
        struct PackErrorsResponse {
            success: bool,
            #[serde(default)]
            data: Vec<PackErrorEvent>,
            #[serde(default)]
            error: Option<String>,
        }

        let response = self
            .request(reqwest::Method::GET, "/api/pack-errors")
            .query(&[("start", start.to_rfc3339()), ("end", end.to_rfc3339())])
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("Pack-error fetch failed: {}", e)))?;
        let body: PackErrorsResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("Pack-error response: {}", e)))?;
        if !body.success {
            return Err(FetchError::Api(
                body.error.unwrap_or_else(|| "Pack-error query failed".to_string()),
            ));
        }
        Ok(body.data)
    }
}

#[async_trait::async_trait]
impl FillRateClient for FulfillApiClient {
    async fn fetch_problem_orders_count(&self) -> Result<u32, FetchError> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct FillRateData {
            problem_orders_count: u32,
        }
        #[derive(Deserialize)]
        struct FillRateResponse {
            success: bool,
            data: Option<FillRateData>,
            #[serde(default)]
            error: Option<String>,
        }

        // The endpoint takes no request body.
        let response = self
            .request(reqwest::Method::POST, "/api/metrics/fill-rate")
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("Fill-rate fetch failed: {}", e)))?;
        let body: FillRateResponse = self
            .check(response)
            .await?
            .json()
            .await
            .map_err(|e| FetchError::Decode(format!("Fill-rate response: {}", e)))?;
        match (body.success, body.data) {
            (true, Some(data)) => Ok(data.problem_orders_count),
            _ => Err(FetchError::Api(
                body.error.unwrap_or_else(|| "Fill-rate endpoint reported failure".to_string()),
            )),
        }
    }
}
