//! Best/worst selection and the single-city forecast fold.
//!
//! Lower pollutant levels are better: `best` is the city with the minimum
//! mean, `worst` the maximum. Cities without a finite mean are ignored, and
//! when none remain both are `None`. Ties go to the city seen first.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::results::{ForecastPoint, ForecastSummary, MultiForecastResult, SingleForecastResult};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extrema {
    pub best: Option<String>,
    pub worst: Option<String>,
}

/// Pick the minimum and maximum over `(city, mean)` pairs, in iteration order.
pub fn select_extrema<'a, I>(entries: I) -> Extrema
where
    I: IntoIterator<Item = (&'a str, Option<f64>)>,
{
    let mut best: Option<(&str, f64)> = None;
    let mut worst: Option<(&str, f64)> = None;

    for (city, mean) in entries {
        let Some(mean) = mean.filter(|m| m.is_finite()) else {
            continue;
        };
        if best.map_or(true, |(_, b)| mean < b) {
            best = Some((city, mean));
        }
        if worst.map_or(true, |(_, w)| mean > w) {
            worst = Some((city, mean));
        }
    }

    Extrema {
        best: best.map(|(c, _)| c.to_string()),
        worst: worst.map(|(c, _)| c.to_string()),
    }
}

/// Display-ready forecast point: bounds filled in and clamped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalPoint {
    pub ts: String,
    pub yhat: f64,
    pub yhat_lower: f64,
    pub yhat_upper: f64,
}

impl CanonicalPoint {
    /// Missing bounds default to `yhat`; the lower bound is floored at zero and
    /// the upper bound is kept at or above the clamped lower bound.
    pub fn from_point(p: &ForecastPoint) -> Self {
        let (lo, hi) = clamp_band(
            p.yhat_lower.unwrap_or(p.yhat),
            p.yhat_upper.unwrap_or(p.yhat),
        );
        Self {
            ts: p.ts.clone(),
            yhat: p.yhat,
            yhat_lower: lo,
            yhat_upper: hi,
        }
    }
}

pub fn clamp_band(lower: f64, upper: f64) -> (f64, f64) {
    let lo = lower.max(0.0);
    let hi = upper.max(lo);
    (lo, hi)
}

/// Canonical forecast view shared by multi-city and folded single-city results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastView {
    #[serde(rename = "byCity")]
    pub by_city: IndexMap<String, Vec<CanonicalPoint>>,
    pub summary: IndexMap<String, ForecastSummary>,
    pub best: Option<String>,
    pub worst: Option<String>,
}

impl ForecastView {
    pub fn cities(&self) -> impl Iterator<Item = &str> {
        self.by_city.keys().map(String::as_str)
    }

    fn with_extrema(mut self) -> Self {
        let Extrema { best, worst } = select_extrema(
            self.summary
                .iter()
                .map(|(city, s)| (city.as_str(), s.mean_yhat)),
        );
        self.best = best;
        self.worst = worst;
        self
    }
}

/// Arithmetic mean of `yhat`; `None` for an empty series.
pub fn mean_yhat(series: &[ForecastPoint]) -> Option<f64> {
    if series.is_empty() {
        return None;
    }
    let sum: f64 = series.iter().map(|p| p.yhat).sum();
    Some(sum / series.len() as f64)
}

/// Merge single-city forecasts in order. A later result for the same city
/// replaces the earlier one but keeps its position.
pub fn fold_forecasts<'a, I>(results: I) -> ForecastView
where
    I: IntoIterator<Item = &'a SingleForecastResult>,
{
    let mut view = ForecastView::default();
    for result in results {
        let series: Vec<CanonicalPoint> =
            result.series.iter().map(CanonicalPoint::from_point).collect();
        view.summary.insert(
            result.city.clone(),
            ForecastSummary {
                n_points: result.series.len(),
                mean_yhat: mean_yhat(&result.series),
            },
        );
        view.by_city.insert(result.city.clone(), series);
    }
    view.with_extrema()
}

/// Normalize a multi-city forecast into the canonical view. Best and worst
/// are recomputed from `summary`.
pub fn project_multi(result: &MultiForecastResult) -> ForecastView {
    let by_city = result
        .by_city
        .iter()
        .map(|(city, series)| {
            (
                city.clone(),
                series.iter().map(CanonicalPoint::from_point).collect(),
            )
        })
        .collect();
    ForecastView {
        by_city,
        summary: result.summary.clone(),
        best: None,
        worst: None,
    }
    .with_extrema()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: &str, yhat: f64) -> ForecastPoint {
        ForecastPoint {
            ts: ts.to_string(),
            yhat,
            yhat_lower: None,
            yhat_upper: None,
        }
    }

    fn single(city: &str, values: &[f64]) -> SingleForecastResult {
        SingleForecastResult {
            city: city.to_string(),
            series: values
                .iter()
                .enumerate()
                .map(|(i, v)| point(&format!("t{i}"), *v))
                .collect(),
        }
    }

    #[test]
    fn fold_picks_lowest_mean_as_best() {
        let view = fold_forecasts(&[single("A", &[10.0]), single("B", &[20.0])]);
        assert_eq!(view.best.as_deref(), Some("A"));
        assert_eq!(view.worst.as_deref(), Some("B"));
        assert_eq!(view.summary["A"].mean_yhat, Some(10.0));
        assert_eq!(view.summary["B"].mean_yhat, Some(20.0));
        assert_eq!(view.summary["B"].n_points, 1);
    }

    #[test]
    fn empty_series_is_excluded_from_selection() {
        let view = fold_forecasts(&[single("A", &[]), single("B", &[4.0, 6.0])]);
        assert_eq!(view.summary["A"].mean_yhat, None);
        assert_eq!(view.summary["A"].n_points, 0);
        assert_eq!(view.best.as_deref(), Some("B"));
        assert_eq!(view.worst.as_deref(), Some("B"));
        assert!(view.by_city.contains_key("A"));
    }

    #[test]
    fn no_valid_city_yields_no_extrema() {
        let view = fold_forecasts(&[single("A", &[])]);
        assert_eq!(view.best, None);
        assert_eq!(view.worst, None);
    }

    #[test]
    fn lone_city_is_both_best_and_worst() {
        let view = fold_forecasts(&[single("Kandy", &[3.0, 5.0])]);
        assert_eq!(view.best.as_deref(), Some("Kandy"));
        assert_eq!(view.worst.as_deref(), Some("Kandy"));
        assert_eq!(view.summary["Kandy"].mean_yhat, Some(4.0));
    }

    #[test]
    fn later_result_for_same_city_wins_in_place() {
        let view = fold_forecasts(&[
            single("A", &[1.0]),
            single("B", &[2.0]),
            single("A", &[9.0, 11.0]),
        ]);
        let cities: Vec<&str> = view.cities().collect();
        assert_eq!(cities, vec!["A", "B"]);
        assert_eq!(view.summary["A"].mean_yhat, Some(10.0));
        assert_eq!(view.by_city["A"].len(), 2);
        assert_eq!(view.best.as_deref(), Some("B"));
    }

    #[test]
    fn ties_resolve_to_first_city() {
        let e = select_extrema([("A", Some(5.0)), ("B", Some(5.0)), ("C", None)]);
        assert_eq!(e.best.as_deref(), Some("A"));
        assert_eq!(e.worst.as_deref(), Some("A"));
    }

    #[test]
    fn non_finite_means_are_ignored() {
        let e = select_extrema([("A", Some(f64::NAN)), ("B", Some(2.0))]);
        assert_eq!(e.best.as_deref(), Some("B"));
    }

    #[test]
    fn band_is_clamped_non_negative_and_ordered() {
        let p = ForecastPoint {
            ts: "t".to_string(),
            yhat: 1.0,
            yhat_lower: Some(-5.0),
            yhat_upper: Some(-2.0),
        };
        let c = CanonicalPoint::from_point(&p);
        assert_eq!(c.yhat_lower, 0.0);
        assert_eq!(c.yhat_upper, 0.0);
        assert_eq!(c.yhat, 1.0);
    }

    #[test]
    fn missing_bounds_default_to_yhat() {
        let c = CanonicalPoint::from_point(&point("t", 7.5));
        assert_eq!((c.yhat_lower, c.yhat_upper), (7.5, 7.5));
    }

    #[test]
    fn multi_projection_recomputes_extrema_from_summary() {
        let mut summary = IndexMap::new();
        summary.insert(
            "Colombo".to_string(),
            ForecastSummary {
                n_points: 7,
                mean_yhat: Some(12.0),
            },
        );
        summary.insert(
            "Kandy".to_string(),
            ForecastSummary {
                n_points: 7,
                mean_yhat: Some(30.0),
            },
        );
        let result = MultiForecastResult {
            by_city: IndexMap::new(),
            summary,
            best: None,
            worst: None,
        };
        let view = project_multi(&result);
        assert_eq!(view.best.as_deref(), Some("Colombo"));
        assert_eq!(view.worst.as_deref(), Some("Kandy"));
    }
}
