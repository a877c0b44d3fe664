//! Backend gateway for the air-quality API.

pub mod error;
pub mod http;
pub mod types;
pub mod usage;

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::plan::Plan;
use crate::results::{ComparisonResult, ExecuteResponse, MultiForecastResult, ScrapeResult};
use http::HttpBackend;
use usage::{CallRecord, UsageSink as UsageSinkTrait};

pub use error::{BackendError, ErrorContext};
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, StderrUsageSink, UsageSink};

/// Everything the session needs from the backend.
#[async_trait::async_trait]
pub trait AirqApi: Send + Sync {
    async fn health(&self) -> Result<HealthStatus, BackendError>;
    async fn scrape(&self, req: ScrapeRequest) -> Result<ScrapeResult, BackendError>;
    async fn compare(&self, req: CompareRequest) -> Result<ComparisonResult, BackendError>;
    async fn forecast_multi(
        &self,
        req: ForecastMultiRequest,
    ) -> Result<MultiForecastResult, BackendError>;
    async fn agent_plan(&self, req: PlanRequest) -> Result<Plan, BackendError>;
    async fn agent_execute(&self, req: ExecuteRequest) -> Result<ExecuteResponse, BackendError>;
    async fn report(&self, req: ReportRequest) -> Result<Vec<u8>, BackendError>;
}

/// HTTP backend plus usage recording. Calls are made once; failures are
/// returned as-is.
pub struct BackendGateway<U: UsageSinkTrait> {
    backend: HttpBackend,
    usage_sink: Arc<U>,
    caller: &'static str,
}

#[async_trait::async_trait]
impl<U: UsageSinkTrait> AirqApi for BackendGateway<U> {
    async fn health(&self) -> Result<HealthStatus, BackendError> {
        self.observe("/healthz", self.backend.health()).await
    }

    async fn scrape(&self, req: ScrapeRequest) -> Result<ScrapeResult, BackendError> {
        self.observe("/scrape", self.backend.scrape(&req)).await
    }

    async fn compare(&self, req: CompareRequest) -> Result<ComparisonResult, BackendError> {
        self.observe("/compare", self.backend.compare(&req)).await
    }

    async fn forecast_multi(
        &self,
        req: ForecastMultiRequest,
    ) -> Result<MultiForecastResult, BackendError> {
        self.observe("/forecast/multi", self.backend.forecast_multi(&req))
            .await
    }

    async fn agent_plan(&self, req: PlanRequest) -> Result<Plan, BackendError> {
        self.observe("/agent/plan", self.backend.agent_plan(&req))
            .await
    }

    async fn agent_execute(&self, req: ExecuteRequest) -> Result<ExecuteResponse, BackendError> {
        self.observe("/agent/execute", self.backend.agent_execute(&req))
            .await
    }

    async fn report(&self, req: ReportRequest) -> Result<Vec<u8>, BackendError> {
        self.observe("/report", self.backend.report(&req)).await
    }
}

impl<U: UsageSinkTrait> BackendGateway<U> {
    pub fn new(backend: HttpBackend, usage_sink: Arc<U>) -> Self {
        Self {
            backend,
            usage_sink,
            caller: "session",
        }
    }

    /// Tag usage records with the code path making the calls.
    pub fn with_caller(mut self, caller: &'static str) -> Self {
        self.caller = caller;
        self
    }

    async fn observe<T, F>(&self, endpoint: &'static str, call: F) -> Result<T, BackendError>
    where
        F: Future<Output = Result<T, BackendError>> + Send,
    {
        let start = Instant::now();
        let result = call.await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let record = CallRecord::new(endpoint, self.backend.tier(), self.caller).latency(latency_ms);
        let record = match &result {
            Ok(_) => record.http_status(Some(200)),
            Err(err) => {
                // Validation failures never reach the network.
                if !matches!(err, BackendError::InvalidRequest { .. }) {
                    warn!(endpoint, code = err.code(), error = %err, "backend call failed");
                }
                let ctx = err.context();
                record
                    .http_status(ctx.and_then(|c| c.http_status))
                    .request_id(ctx.and_then(|c| c.request_id.clone()))
                    .error(err.code())
            }
        };
        self.usage_sink.record(record).await;

        result
    }
}
