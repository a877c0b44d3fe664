//! Usage tracking via the UsageSink trait.
//!
//! The gateway logs every backend call through a UsageSink, so the client
//! does not depend on where the records end up:
//! - the CLI uses StderrUsageSink with `--usage`, NoopUsageSink otherwise
//! - tests use NoopUsageSink or a collecting sink

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::types::Tier;

/// Status of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Success,
    Error,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::Success => "success",
            CallStatus::Error => "error",
        }
    }
}

/// Record of a backend API call for logging.
#[derive(Debug, Clone)]
pub struct CallRecord {
    /// Endpoint path: "/compare", "/agent/execute", etc.
    pub endpoint: &'static str,
    /// Tier the call was made under.
    pub tier: Tier,
    /// HTTP status, when a response was received.
    pub http_status: Option<u16>,
    /// Latency in milliseconds.
    pub latency_ms: u64,
    /// Call status.
    pub status: CallStatus,
    /// Error code if status is Error.
    pub error_code: Option<String>,
    /// Which code path made this call.
    pub caller: &'static str,
    /// Backend request ID (for debugging).
    pub request_id: Option<String>,
    /// When the call was made.
    pub timestamp: DateTime<Utc>,
}

impl CallRecord {
    /// Create a new record with required fields, defaulting others.
    pub fn new(endpoint: &'static str, tier: Tier, caller: &'static str) -> Self {
        Self {
            endpoint,
            tier,
            http_status: None,
            latency_ms: 0,
            status: CallStatus::Success,
            error_code: None,
            caller,
            request_id: None,
            timestamp: Utc::now(),
        }
    }

    pub fn http_status(mut self, status: Option<u16>) -> Self {
        self.http_status = status;
        self
    }

    pub fn latency(mut self, ms: u64) -> Self {
        self.latency_ms = ms;
        self
    }

    pub fn error(mut self, code: impl Into<String>) -> Self {
        self.status = CallStatus::Error;
        self.error_code = Some(code.into());
        self
    }

    pub fn request_id(mut self, id: Option<String>) -> Self {
        self.request_id = id;
        self
    }
}

/// Trait for recording backend call usage.
#[async_trait]
pub trait UsageSink: Send + Sync {
    /// Record a backend call. This should be fire-and-forget:
    /// failures should be logged but not propagated.
    async fn record(&self, record: CallRecord);
}

/// No-op usage sink that discards all records.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn record(&self, _record: CallRecord) {}
}

/// Usage sink that writes to stderr as JSON lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct StderrUsageSink;

#[async_trait]
impl UsageSink for StderrUsageSink {
    async fn record(&self, record: CallRecord) {
        let line = serde_json::json!({
            "ts": record.timestamp.to_rfc3339(),
            "endpoint": record.endpoint,
            "tier": record.tier.as_str(),
            "http_status": record.http_status,
            "latency_ms": record.latency_ms,
            "status": record.status.as_str(),
            "error_code": record.error_code,
            "caller": record.caller,
        });
        eprintln!("{line}");
    }
}
