//! Chart-ready rows derived from reconciled views.
//!
//! Rows are keyed by timestamp and sorted with plain string ordering, so
//! timestamps must already sort lexicographically (ISO-8601 does).

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::reconcile::ComparisonView;
use crate::select::{clamp_band, ForecastView};

/// One chart row: `{ts, <city>: y, <city>_lo: lo, <city>_hi: hi, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRow {
    pub ts: String,
    pub values: IndexMap<String, f64>,
}

impl ChartRow {
    fn new(ts: &str) -> Self {
        Self {
            ts: ts.to_string(),
            values: IndexMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

impl Serialize for ChartRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len() + 1))?;
        map.serialize_entry("ts", &self.ts)?;
        for (k, v) in &self.values {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// One row per distinct `ts` across all cities of a forecast view.
pub fn forecast_rows(view: &ForecastView) -> Vec<ChartRow> {
    let mut rows: IndexMap<String, ChartRow> = IndexMap::new();
    for (city, series) in &view.by_city {
        for p in series {
            let (lo, hi) = clamp_band(p.yhat_lower, p.yhat_upper);
            let row = rows
                .entry(p.ts.clone())
                .or_insert_with(|| ChartRow::new(&p.ts));
            row.values.insert(city.clone(), p.yhat);
            row.values.insert(format!("{city}_lo"), lo);
            row.values.insert(format!("{city}_hi"), hi);
        }
    }
    sorted(rows)
}

/// Merge per-city history into `{ts, <city>: pm25}` rows. Missing readings
/// are left out of the row.
pub fn comparison_rows(view: &ComparisonView) -> Vec<ChartRow> {
    let mut rows: IndexMap<String, ChartRow> = IndexMap::new();
    for (city, series) in &view.series {
        for p in series {
            let row = rows
                .entry(p.ts.clone())
                .or_insert_with(|| ChartRow::new(&p.ts));
            if let Some(pm25) = p.pm25 {
                row.values.insert(city.clone(), pm25);
            }
        }
    }
    sorted(rows)
}

fn sorted(rows: IndexMap<String, ChartRow>) -> Vec<ChartRow> {
    let mut rows: Vec<ChartRow> = rows.into_values().collect();
    rows.sort_by(|a, b| a.ts.cmp(&b.ts));
    rows
}

/// Format a PM2.5 concentration for display.
pub fn format_pm(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.2} µg/m³"),
        _ => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{CityStats, HistoryPoint};
    use crate::select::CanonicalPoint;

    fn cp(ts: &str, yhat: f64, lo: f64, hi: f64) -> CanonicalPoint {
        CanonicalPoint {
            ts: ts.to_string(),
            yhat,
            yhat_lower: lo,
            yhat_upper: hi,
        }
    }

    #[test]
    fn forecast_rows_merge_cities_by_timestamp() {
        let mut view = ForecastView::default();
        view.by_city.insert(
            "Kandy".to_string(),
            vec![cp("2025-01-02", 30.0, 25.0, 35.0), cp("2025-01-01", 28.0, 20.0, 33.0)],
        );
        view.by_city
            .insert("Colombo".to_string(), vec![cp("2025-01-01", 12.0, 10.0, 14.0)]);

        let rows = forecast_rows(&view);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts, "2025-01-01");
        assert_eq!(rows[0].get("Kandy"), Some(28.0));
        assert_eq!(rows[0].get("Colombo_lo"), Some(10.0));
        assert_eq!(rows[1].ts, "2025-01-02");
        assert_eq!(rows[1].get("Colombo"), None);
    }

    #[test]
    fn forecast_rows_clamp_bands() {
        let mut view = ForecastView::default();
        view.by_city
            .insert("A".to_string(), vec![cp("t0", 1.0, -5.0, -2.0)]);
        let rows = forecast_rows(&view);
        assert_eq!(rows[0].get("A_lo"), Some(0.0));
        assert_eq!(rows[0].get("A_hi"), Some(0.0));
        assert_eq!(rows[0].get("A"), Some(1.0));
    }

    #[test]
    fn chart_row_serializes_flat() {
        let mut row = ChartRow::new("t0");
        row.values.insert("A".to_string(), 1.5);
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json, serde_json::json!({ "ts": "t0", "A": 1.5 }));
    }

    #[test]
    fn comparison_rows_use_backend_history_only() {
        let mut view = ComparisonView::default();
        view.by_city.insert("A".to_string(), CityStats::default());
        view.series.insert("A".to_string(), Vec::new());
        assert!(comparison_rows(&view).is_empty());

        view.series.insert(
            "A".to_string(),
            vec![
                HistoryPoint { ts: "2025-01-02".to_string(), pm25: Some(9.0) },
                HistoryPoint { ts: "2025-01-01".to_string(), pm25: None },
            ],
        );
        view.series.insert(
            "B".to_string(),
            vec![HistoryPoint { ts: "2025-01-02".to_string(), pm25: Some(4.0) }],
        );
        let rows = comparison_rows(&view);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts, "2025-01-01");
        assert!(rows[0].values.is_empty());
        assert_eq!(rows[1].get("A"), Some(9.0));
        assert_eq!(rows[1].get("B"), Some(4.0));
    }

    #[test]
    fn format_pm_handles_missing_values() {
        assert_eq!(format_pm(Some(12.346)), "12.35 µg/m³");
        assert_eq!(format_pm(None), "-");
        assert_eq!(format_pm(Some(f64::NAN)), "-");
    }
}
