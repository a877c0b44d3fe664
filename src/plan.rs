//! Step descriptors and plans produced by the backend planner.
//!
//! A plan is an ordered list of named capability invocations. The client
//! never rewrites steps: they are read to prefill inputs and echoed back
//! verbatim when the plan is executed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A named backend operation with a fixed argument schema.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    ScrapeCity,
    CompareCities,
    ForecastMulti,
    ForecastCity,
    /// A name the client has no autofill rules for.
    Other(String),
}

impl Capability {
    pub fn from_name(name: &str) -> Self {
        match name {
            "scrape_city" => Self::ScrapeCity,
            "compare_cities" => Self::CompareCities,
            "forecast_multi" => Self::ForecastMulti,
            "forecast_city" => Self::ForecastCity,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::ScrapeCity => "scrape_city",
            Self::CompareCities => "compare_cities",
            Self::ForecastMulti => "forecast_multi",
            Self::ForecastCity => "forecast_city",
            Self::Other(name) => name,
        }
    }
}

/// One step of a plan: capability name plus its argument bag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl Step {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn capability(&self) -> Capability {
        Capability::from_name(&self.name)
    }

    /// `city`, when it is a non-empty string.
    pub fn city(&self) -> Option<&str> {
        self.arguments
            .get("city")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    /// `cities`, when it is an array. Non-string elements are rendered as JSON.
    pub fn cities(&self) -> Option<Vec<String>> {
        let items = self.arguments.get("cities")?.as_array()?;
        Some(
            items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )
    }

    pub fn days(&self) -> Option<u32> {
        self.count("days")
    }

    pub fn horizon_days(&self) -> Option<u32> {
        self.count("horizonDays")
    }

    pub fn train_days(&self) -> Option<u32> {
        self.count("trainDays")
    }

    /// A numeric argument that is a non-negative whole number fitting in `u32`.
    fn count(&self, key: &str) -> Option<u32> {
        let value = self.arguments.get(key)?;
        if let Some(n) = value.as_u64() {
            return u32::try_from(n).ok();
        }
        let f = value.as_f64()?;
        if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64 {
            Some(f as u32)
        } else {
            None
        }
    }

    /// Single-line description, e.g. `compare_cities (cities: A, B • days: 7)`.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(city) = self.city() {
            parts.push(format!("city: {city}"));
        }
        if let Some(cities) = self.cities() {
            parts.push(format!("cities: {}", cities.join(", ")));
        }
        if let Some(days) = self.arguments.get("days").filter(|v| !v.is_null()) {
            parts.push(format!("days: {}", display_scalar(days)));
        }
        if let Some(h) = self.arguments.get("horizonDays").filter(|v| !v.is_null()) {
            parts.push(format!("horizon: {}d", display_scalar(h)));
        }
        if let Some(t) = self.arguments.get("trainDays").filter(|v| !v.is_null()) {
            parts.push(format!("train: {}d", display_scalar(t)));
        }

        if parts.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.name, parts.join(" • "))
        }
    }
}

fn display_scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Planner output. Replaced wholesale on every planning call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "plan", default)]
    pub steps: Vec<Step>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Plan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            notes: None,
            error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// First step of the given capability; earlier steps win.
    pub fn first(&self, capability: &Capability) -> Option<&Step> {
        self.steps.iter().find(|s| &s.capability() == capability)
    }
}
