//! Capability results and their structural classification.
//!
//! Trace entries are not tagged with the capability that produced them, so
//! each result is classified by shape. [`classify`] is total and checks the
//! shapes in a fixed order:
//!
//! 1. multi-forecast: `byCity` and a truthy `summary`
//! 2. comparison: `byCity`, `days`, `best`, `worst`, and no truthy `summary`
//! 3. single-forecast: `series` and a non-empty `city`
//! 4. scrape: a non-empty `city` and `inserted`
//!
//! The absence of `summary` is the only thing separating a comparison from a
//! multi-forecast, since both carry `byCity`.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One point of a forecast series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub ts: String,
    #[serde(alias = "y")]
    pub yhat: f64,
    #[serde(default, alias = "lower", skip_serializing_if = "Option::is_none")]
    pub yhat_lower: Option<f64>,
    #[serde(default, alias = "upper", skip_serializing_if = "Option::is_none")]
    pub yhat_upper: Option<f64>,
}

/// Per-city aggregate of a forecast.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    #[serde(default)]
    pub n_points: usize,
    #[serde(default)]
    pub mean_yhat: Option<f64>,
}

/// One observed PM2.5 reading in a comparison window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub ts: String,
    #[serde(default)]
    pub pm25: Option<f64>,
}

/// Per-city statistics of a comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CityStats {
    #[serde(default)]
    pub mean_pm25: Option<f64>,
    #[serde(default)]
    pub min_pm25: Option<f64>,
    #[serde(default)]
    pub max_pm25: Option<f64>,
    #[serde(default)]
    pub n_points: Option<u64>,
    /// Raw history, only when the backend includes it.
    #[serde(
        default,
        deserialize_with = "lenient_list",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub series: Vec<HistoryPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "byCity", deserialize_with = "lenient_map")]
    pub by_city: IndexMap<String, CityStats>,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub best: Option<String>,
    #[serde(default)]
    pub worst: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiForecastResult {
    #[serde(rename = "byCity", deserialize_with = "lenient_series_map")]
    pub by_city: IndexMap<String, Vec<ForecastPoint>>,
    #[serde(deserialize_with = "lenient_map")]
    pub summary: IndexMap<String, ForecastSummary>,
    #[serde(default)]
    pub best: Option<String>,
    #[serde(default)]
    pub worst: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleForecastResult {
    pub city: String,
    #[serde(deserialize_with = "lenient_list")]
    pub series: Vec<ForecastPoint>,
}

// Per-item decoding for result payloads: a bad city or point is dropped
// without losing the rest of the result. A series that is not an array
// reads as empty.

fn items_from<T: DeserializeOwned>(value: Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    }
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    Value::deserialize(deserializer).map(items_from)
}

fn lenient_map<'de, D, T>(deserializer: D) -> Result<IndexMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw: IndexMap<String, Value> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(city, v)| serde_json::from_value(v).ok().map(|t| (city, t)))
        .collect())
}

fn lenient_series_map<'de, D>(
    deserializer: D,
) -> Result<IndexMap<String, Vec<ForecastPoint>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: IndexMap<String, Value> = IndexMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(city, series)| (city, items_from(series)))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub city: String,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    pub inserted: u64,
}

/// Result of one capability call, tagged by the shape it was recognized as.
#[derive(Debug, Clone, PartialEq)]
pub enum CapabilityResult {
    MultiForecast(MultiForecastResult),
    Comparison(ComparisonResult),
    SingleForecast(SingleForecastResult),
    Scrape(ScrapeResult),
}

/// Shape names, in classification order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    MultiForecast,
    Comparison,
    SingleForecast,
    Scrape,
}

impl ResultKind {
    pub const ORDER: [ResultKind; 4] = [
        ResultKind::MultiForecast,
        ResultKind::Comparison,
        ResultKind::SingleForecast,
        ResultKind::Scrape,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MultiForecast => "multi_forecast",
            Self::Comparison => "comparison",
            Self::SingleForecast => "single_forecast",
            Self::Scrape => "scrape",
        }
    }

    /// Whether `value` has this kind's shape. Typed decoding is separate.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::MultiForecast => truthy(value.get("byCity")) && truthy(value.get("summary")),
            Self::Comparison => {
                truthy(value.get("byCity"))
                    && value.get("days").is_some()
                    && value.get("best").is_some()
                    && value.get("worst").is_some()
                    && !truthy(value.get("summary"))
            }
            Self::SingleForecast => truthy(value.get("series")) && truthy(value.get("city")),
            Self::Scrape => truthy(value.get("city")) && value.get("inserted").is_some(),
        }
    }

    fn decode(self, value: &Value) -> Result<CapabilityResult, serde_json::Error> {
        let v = value.clone();
        Ok(match self {
            Self::MultiForecast => CapabilityResult::MultiForecast(serde_json::from_value(v)?),
            Self::Comparison => CapabilityResult::Comparison(serde_json::from_value(v)?),
            Self::SingleForecast => CapabilityResult::SingleForecast(serde_json::from_value(v)?),
            Self::Scrape => CapabilityResult::Scrape(serde_json::from_value(v)?),
        })
    }
}

impl CapabilityResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            Self::MultiForecast(_) => ResultKind::MultiForecast,
            Self::Comparison(_) => ResultKind::Comparison,
            Self::SingleForecast(_) => ResultKind::SingleForecast,
            Self::Scrape(_) => ResultKind::Scrape,
        }
    }
}

/// Outcome of classifying one result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Classified {
    Recognized(CapabilityResult),
    /// Matched a shape, but the fields did not decode.
    Malformed { kind: ResultKind, reason: String },
    Unrecognized,
}

/// Classify `value` against the shapes in [`ResultKind::ORDER`]; first match wins.
pub fn classify(value: &Value) -> Classified {
    let Some(kind) = ResultKind::ORDER.into_iter().find(|k| k.matches(value)) else {
        return Classified::Unrecognized;
    };
    match kind.decode(value) {
        Ok(result) => Classified::Recognized(result),
        Err(e) => Classified::Malformed {
            kind,
            reason: e.to_string(),
        },
    }
}

/// JavaScript-style truthiness for an optional JSON field.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// One step outcome in an execution trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    #[serde(default, deserialize_with = "flag_or_false")]
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(
        default,
        deserialize_with = "error_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub error: Option<String>,
}

fn flag_or_false<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

/// Error strings stay as they are; any other non-null value is kept as JSON text.
fn error_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    })
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl TraceEntry {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }

    /// Classification of a successful entry; failed entries never match.
    pub fn classify(&self) -> Classified {
        match (self.ok, &self.result) {
            (true, Some(result)) => classify(result),
            _ => Classified::Unrecognized,
        }
    }
}

/// Response of `POST /agent/execute`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResponse {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub trace: Vec<TraceEntry>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}
