//! HTTP+JSON adapter for the air-quality backend.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::{detail_from_body, BackendError, ErrorContext};
use super::types::*;
use crate::config::ClientConfig;
use crate::plan::Plan;
use crate::results::{ComparisonResult, ExecuteResponse, MultiForecastResult, ScrapeResult};

/// Maximum allowed response body (8 MiB).
const MAX_RESPONSE_LEN: usize = 8 * 1_024 * 1_024;

/// Backend API adapter.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    tier: Tier,
}

impl HttpBackend {
    /// Create for a base URL with the free tier and no timeout.
    pub fn new(base_url: impl Into<String>) -> Result<Self, BackendError> {
        Self::with_config(base_url, Tier::Free, None, None)
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, BackendError> {
        Self::with_config(
            config.base_url.clone(),
            config.tier,
            config.api_key.clone(),
            config.timeout,
        )
    }

    /// Create with custom configuration.
    pub fn with_config(
        base_url: impl Into<String>,
        tier: Tier,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, BackendError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BackendError::config("base URL is empty"));
        }

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-PLAN", HeaderValue::from_static(tier.as_str()));

        if let Some(ref key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|_| BackendError::config("Invalid API key format"))?;
            headers.insert("X-API-KEY", value);
        }

        let mut builder = reqwest::Client::builder()
            .default_headers(headers)
            .gzip(true);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| BackendError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            tier,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Extract request ID from response headers.
    fn extract_request_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
    }

    /// Send and read the body, mapping error statuses to `BackendError::Backend`.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, BackendError> {
        let mut response = request.send().await?;

        let status = response.status();
        let request_id = Self::extract_request_id(response.headers());

        // Stream response to enforce size limit
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(BackendError::decode(format!(
                    "Response too large: {new_len} bytes"
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        if !status.is_success() {
            let ctx = ErrorContext::new().with_status(status.as_u16());
            let ctx = match &request_id {
                Some(id) => ctx.with_request_id(id),
                None => ctx,
            };
            let body = String::from_utf8_lossy(&bytes);
            let detail = detail_from_body(status.as_u16(), &body);
            return Err(BackendError::backend(status.as_u16(), detail, ctx));
        }

        debug!(status = status.as_u16(), bytes = bytes.len(), "backend response");
        Ok(bytes)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, BackendError> {
        let bytes = self.send(self.client.get(self.url(path))).await?;
        decode(path, &bytes)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = self
            .send(self.client.post(self.url(path)).json(body))
            .await?;
        decode(path, &bytes)
    }

    // =========================================================================
    // ENDPOINTS
    // =========================================================================

    pub async fn health(&self) -> Result<HealthStatus, BackendError> {
        self.get_json("/healthz").await
    }

    pub async fn scrape(&self, req: &ScrapeRequest) -> Result<ScrapeResult, BackendError> {
        req.validate()?;
        let mut result: ScrapeResult = self.post_json("/scrape", req).await?;
        if result.days.is_none() {
            result.days = Some(req.days);
        }
        Ok(result)
    }

    pub async fn compare(&self, req: &CompareRequest) -> Result<ComparisonResult, BackendError> {
        req.validate()?;
        self.post_json("/compare", req).await
    }

    pub async fn forecast_multi(
        &self,
        req: &ForecastMultiRequest,
    ) -> Result<MultiForecastResult, BackendError> {
        req.validate()?;
        self.post_json("/forecast/multi", req).await
    }

    /// A `{error}` reply is returned as a `Plan` carrying that error, not as
    /// an `Err`: the backend answered, the planner did not.
    pub async fn agent_plan(&self, req: &PlanRequest) -> Result<Plan, BackendError> {
        req.validate()?;
        let reply: PlanReply = self.post_json("/agent/plan", req).await?;
        let error = reply.error.and_then(|e| match e {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });
        Ok(Plan {
            steps: reply.plan.unwrap_or_default(),
            notes: reply.notes,
            error,
        })
    }

    pub async fn agent_execute(
        &self,
        req: &ExecuteRequest,
    ) -> Result<ExecuteResponse, BackendError> {
        req.validate()?;
        self.post_json("/agent/execute", req).await
    }

    /// Returns the rendered document bytes (PDF).
    pub async fn report(&self, req: &ReportRequest) -> Result<Vec<u8>, BackendError> {
        req.validate()?;
        self.send(self.client.post(self.url("/report")).json(req))
            .await
    }
}

fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T, BackendError> {
    serde_json::from_slice(bytes)
        .map_err(|e| BackendError::decode(format!("Invalid JSON from {path}: {e}")))
}
