//! Folds an execution response into view updates.
//!
//! Each trace entry is classified once (see [`crate::results::classify`]).
//! The most recent entry wins for the multi-forecast, comparison and scrape
//! shapes; every single-forecast entry is kept and folded, since several of
//! them in one trace are a fan-out over cities.
//!
//! Precedence, first applicable rule wins:
//! 1. comparison → comparison view; the forecast view is left alone
//! 2. multi-forecast → forecast view, active view `forecast`
//! 3. any single-forecasts → folded forecast view, active `forecast`
//! 4. scrape, only when none of the above matched → scrape view, active `data`
//! 5. when no comparison or forecast matched, the response's `final` object is
//!    classified and projected by the same rules (scrape shapes excluded)
//!
//! An entry with a forecast or comparison shape that fails to decode is
//! skipped, but still counts as matched for rules 4 and 5.
//!
//! Reconciliation is a pure function of the response: the same response
//! always yields the same [`Reconciliation`].

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::autofill::InputPatch;
use crate::results::{
    CapabilityResult, CityStats, Classified, ComparisonResult, ExecuteResponse, HistoryPoint,
    MultiForecastResult, ResultKind, ScrapeResult, SingleForecastResult,
};
use crate::select::{fold_forecasts, project_multi, select_extrema, ForecastView};

const DEFAULT_SCRAPE_DAYS: u32 = 7;

/// Dashboard tab.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveView {
    #[default]
    Data,
    Compare,
    Forecast,
    Assistant,
}

impl ActiveView {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Compare => "compare",
            Self::Forecast => "forecast",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonView {
    #[serde(rename = "byCity")]
    pub by_city: IndexMap<String, CityStats>,
    pub days: Option<u32>,
    pub best: Option<String>,
    pub worst: Option<String>,
    /// Per-city history for charts; empty when the backend sent none.
    pub series: IndexMap<String, Vec<HistoryPoint>>,
}

impl ComparisonView {
    pub fn from_result(result: &ComparisonResult) -> Self {
        let extrema = select_extrema(
            result
                .by_city
                .iter()
                .map(|(city, stats)| (city.as_str(), stats.mean_pm25)),
        );
        let series = result
            .by_city
            .iter()
            .map(|(city, stats)| (city.clone(), stats.series.clone()))
            .collect();
        Self {
            by_city: result.by_city.clone(),
            days: result.days,
            best: extrema.best,
            worst: extrema.worst,
            series,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeView {
    pub city: String,
    pub days: u32,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub inserted: u64,
}

impl ScrapeView {
    pub fn from_result(result: &ScrapeResult) -> Self {
        Self {
            city: result.city.clone(),
            days: result.days.unwrap_or(DEFAULT_SCRAPE_DAYS),
            lat: result.lat,
            lon: result.lon,
            inserted: result.inserted,
        }
    }
}

/// Where the applied updates came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchSource {
    #[default]
    Nothing,
    Trace,
    Final,
}

/// View updates derived from one execution response. `None` fields leave
/// the corresponding region untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub comparison: Option<ComparisonView>,
    pub forecast: Option<ForecastView>,
    pub scrape: Option<ScrapeView>,
    pub active_view: Option<ActiveView>,
    #[serde(default, skip_serializing_if = "InputPatch::is_empty")]
    pub inputs: InputPatch,
    pub source: MatchSource,
    /// Result kinds that were applied.
    pub matched: Vec<ResultKind>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.comparison.is_none() && self.forecast.is_none() && self.scrape.is_none()
    }
}

/// Most recent match per shape, plus every single-forecast in trace order.
#[derive(Default)]
struct TraceMatches {
    multi: Option<MultiForecastResult>,
    comparison: Option<ComparisonResult>,
    singles: Vec<SingleForecastResult>,
    scrape: Option<ScrapeResult>,
    /// A forecast or comparison shape was seen but could not be decoded.
    unreadable_view: bool,
}

impl TraceMatches {
    fn collect(response: &ExecuteResponse) -> Self {
        let mut matches = Self::default();
        for (index, entry) in response.trace.iter().enumerate() {
            match entry.classify() {
                Classified::Recognized(result) => {
                    tracing::debug!(index, kind = result.kind().as_str(), "classified trace entry");
                    matches.record(result);
                }
                Classified::Malformed { kind, reason } => {
                    tracing::warn!(index, kind = kind.as_str(), %reason, "skipping malformed trace entry");
                    if kind != ResultKind::Scrape {
                        matches.unreadable_view = true;
                    }
                }
                Classified::Unrecognized => {}
            }
        }
        matches
    }

    // Later entries overwrite earlier ones, so the most recent wins.
    fn record(&mut self, result: CapabilityResult) {
        match result {
            CapabilityResult::MultiForecast(r) => self.multi = Some(r),
            CapabilityResult::Comparison(r) => self.comparison = Some(r),
            CapabilityResult::SingleForecast(r) => self.singles.push(r),
            CapabilityResult::Scrape(r) => self.scrape = Some(r),
        }
    }

    // Unreadable forecast or comparison entries still count: they hold back
    // the scrape and `final` fallbacks.
    fn has_forecast_or_comparison(&self) -> bool {
        self.multi.is_some()
            || self.comparison.is_some()
            || !self.singles.is_empty()
            || self.unreadable_view
    }
}

pub fn reconcile(response: &ExecuteResponse) -> Reconciliation {
    let matches = TraceMatches::collect(response);
    let mut out = Reconciliation::default();

    if let Some(cmp) = &matches.comparison {
        apply_comparison(&mut out, cmp);
    } else if let Some(multi) = &matches.multi {
        apply_multi(&mut out, multi);
    } else if !matches.singles.is_empty() {
        apply_singles(&mut out, &matches.singles);
    }

    if let Some(scrape) = matches.scrape.as_ref().filter(|_| !matches.has_forecast_or_comparison()) {
        apply_scrape(&mut out, scrape);
    }

    if !out.is_empty() {
        out.source = MatchSource::Trace;
    }

    if !matches.has_forecast_or_comparison() {
        if let Some(final_value) = &response.final_result {
            apply_final(&mut out, final_value);
        }
    }

    if out.is_empty() {
        tracing::debug!(entries = response.trace.len(), "execution response matched no result shape");
    }
    out
}

fn apply_comparison(out: &mut Reconciliation, result: &ComparisonResult) {
    out.comparison = Some(ComparisonView::from_result(result));
    out.matched.push(ResultKind::Comparison);
}

fn apply_multi(out: &mut Reconciliation, result: &MultiForecastResult) {
    out.forecast = Some(project_multi(result));
    out.active_view = Some(ActiveView::Forecast);
    out.matched.push(ResultKind::MultiForecast);
}

fn apply_singles(out: &mut Reconciliation, results: &[SingleForecastResult]) {
    out.forecast = Some(fold_forecasts(results));
    out.active_view = Some(ActiveView::Forecast);
    out.matched.push(ResultKind::SingleForecast);
}

fn apply_scrape(out: &mut Reconciliation, result: &ScrapeResult) {
    let view = ScrapeView::from_result(result);
    out.inputs.scrape_city = Some(view.city.clone());
    out.inputs.scrape_days = Some(view.days);
    out.scrape = Some(view);
    out.active_view = Some(ActiveView::Data);
    out.matched.push(ResultKind::Scrape);
}

fn apply_final(out: &mut Reconciliation, value: &serde_json::Value) {
    let before = out.matched.len();
    match crate::results::classify(value) {
        Classified::Recognized(CapabilityResult::MultiForecast(r)) => apply_multi(out, &r),
        Classified::Recognized(CapabilityResult::Comparison(r)) => apply_comparison(out, &r),
        Classified::Recognized(CapabilityResult::SingleForecast(r)) => {
            apply_singles(out, std::slice::from_ref(&r))
        }
        Classified::Recognized(CapabilityResult::Scrape(_)) | Classified::Unrecognized => {}
        Classified::Malformed { kind, reason } => {
            tracing::warn!(kind = kind.as_str(), %reason, "skipping malformed final result");
        }
    }
    if out.matched.len() > before {
        out.source = MatchSource::Final;
    }
}
