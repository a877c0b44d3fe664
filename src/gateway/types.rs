//! Wire types for the air-quality backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::BackendError;
use crate::plan::Step;

// =============================================================================
// TIER
// =============================================================================

/// Subscription tier sent as the `X-PLAN` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Tier {
    /// Lenient parse: anything unrecognized is `Free`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// BOUNDS
// =============================================================================

pub const DAYS_RANGE: std::ops::RangeInclusive<u32> = 1..=90;
pub const HORIZON_RANGE: std::ops::RangeInclusive<u32> = 1..=30;
pub const TRAIN_RANGE: std::ops::RangeInclusive<u32> = 7..=120;

fn check_range(
    field: &str,
    value: u32,
    range: &std::ops::RangeInclusive<u32>,
) -> Result<(), BackendError> {
    if range.contains(&value) {
        Ok(())
    } else {
        Err(BackendError::invalid_request(format!(
            "{field} must be between {} and {} (got {value})",
            range.start(),
            range.end()
        )))
    }
}

fn check_cities(cities: &[String]) -> Result<(), BackendError> {
    if cities.iter().any(|c| !c.trim().is_empty()) {
        Ok(())
    } else {
        Err(BackendError::invalid_request("at least one city is required"))
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub city: String,
    pub days: u32,
}

impl ScrapeRequest {
    pub fn new(city: impl Into<String>, days: u32) -> Self {
        Self {
            city: city.into(),
            days,
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.city.trim().is_empty() {
            return Err(BackendError::invalid_request("city is required"));
        }
        check_range("days", self.days, &DAYS_RANGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareRequest {
    pub cities: Vec<String>,
    pub days: u32,
}

impl CompareRequest {
    pub fn new(cities: Vec<String>, days: u32) -> Self {
        Self { cities, days }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        check_cities(&self.cities)?;
        check_range("days", self.days, &DAYS_RANGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMultiRequest {
    pub cities: Vec<String>,
    #[serde(rename = "horizonDays")]
    pub horizon_days: u32,
    #[serde(rename = "trainDays")]
    pub train_days: u32,
    pub use_cache: bool,
}

impl ForecastMultiRequest {
    pub fn new(cities: Vec<String>, horizon_days: u32, train_days: u32) -> Self {
        Self {
            cities,
            horizon_days,
            train_days,
            use_cache: true,
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        check_cities(&self.cities)?;
        check_range("horizonDays", self.horizon_days, &HORIZON_RANGE)?;
        check_range("trainDays", self.train_days, &TRAIN_RANGE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanRequest {
    pub prompt: String,
}

impl PlanRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if self.prompt.trim().is_empty() {
            return Err(BackendError::invalid_request("prompt is required"));
        }
        Ok(())
    }
}

/// Body of `POST /agent/execute`. Exactly one of `plan` / `prompt` is set by
/// the constructors; the plan is sent verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Vec<Step>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

impl ExecuteRequest {
    pub fn with_plan(steps: Vec<Step>) -> Self {
        Self {
            plan: Some(steps),
            prompt: None,
        }
    }

    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            plan: None,
            prompt: Some(prompt.into()),
        }
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        match (&self.plan, &self.prompt) {
            (Some(_), _) => Ok(()),
            (None, Some(p)) if !p.trim().is_empty() => Ok(()),
            _ => Err(BackendError::invalid_request(
                "either a plan or a prompt is required",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Comparison,
    Forecast,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::Comparison => "comparison",
            ReportKind::Forecast => "forecast",
        }
    }
}

pub const DEFAULT_REPORT_NOTES: &str = "No AI analysis provided.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRequest {
    pub report_type: ReportKind,
    pub payload: Value,
    pub llm_notes: String,
    /// Base64 data URLs of rendered charts.
    #[serde(default)]
    pub chart_images: Vec<String>,
}

impl ReportRequest {
    pub fn new(report_type: ReportKind, payload: Value) -> Self {
        Self {
            report_type,
            payload,
            llm_notes: DEFAULT_REPORT_NOTES.to_string(),
            chart_images: Vec::new(),
        }
    }

    /// Blank notes keep the default text.
    pub fn notes(mut self, notes: Option<&str>) -> Self {
        if let Some(n) = notes.map(str::trim).filter(|n| !n.is_empty()) {
            self.llm_notes = n.to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), BackendError> {
        if !self.payload.is_object() {
            return Err(BackendError::invalid_request(
                "report payload must be a JSON object",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<ComponentHealth>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<ComponentHealth>,
}

impl HealthStatus {
    pub fn degraded() -> Self {
        Self {
            status: "degraded".to_string(),
            db: None,
            upstream: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Raw `POST /agent/plan` response: either `{plan, notes?}` or `{error}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PlanReply {
    #[serde(default)]
    pub plan: Option<Vec<Step>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub error: Option<Value>,
}
