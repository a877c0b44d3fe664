//! Derives input defaults from a planner's steps.
//!
//! `resolve` is pure: it never fails and skips anything it cannot read.
//! Steps are applied in a fixed order (compare, multi-forecast,
//! single-forecast, scrape), each guarded on its own, so a
//! `forecast_city` step overwrites the forecast fields a `forecast_multi`
//! step wrote when both are present.

use serde::{Deserialize, Serialize};

use crate::plan::{Capability, Plan};

/// Input slots of the dashboard forms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiInputs {
    pub scrape_city: String,
    pub scrape_days: u32,
    pub compare_cities: String,
    pub compare_days: u32,
    pub forecast_cities: String,
    pub forecast_horizon: u32,
    pub forecast_train_days: u32,
}

impl Default for UiInputs {
    fn default() -> Self {
        Self {
            scrape_city: "Colombo".to_string(),
            scrape_days: 7,
            compare_cities: "Colombo,Kandy".to_string(),
            compare_days: 7,
            forecast_cities: "Colombo,Kandy".to_string(),
            forecast_horizon: 7,
            forecast_train_days: 30,
        }
    }
}

/// Partial update of [`UiInputs`]. `None` leaves the slot alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scrape_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_cities: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_days: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_cities: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_horizon: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast_train_days: Option<u32>,
}

impl InputPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    pub fn apply(&self, inputs: &mut UiInputs) {
        if let Some(v) = &self.scrape_city {
            inputs.scrape_city = v.clone();
        }
        if let Some(v) = self.scrape_days {
            inputs.scrape_days = v;
        }
        if let Some(v) = &self.compare_cities {
            inputs.compare_cities = v.clone();
        }
        if let Some(v) = self.compare_days {
            inputs.compare_days = v;
        }
        if let Some(v) = &self.forecast_cities {
            inputs.forecast_cities = v.clone();
        }
        if let Some(v) = self.forecast_horizon {
            inputs.forecast_horizon = v;
        }
        if let Some(v) = self.forecast_train_days {
            inputs.forecast_train_days = v;
        }
    }
}

/// Compute the input patch implied by `plan`.
pub fn resolve(plan: &Plan) -> InputPatch {
    let mut patch = InputPatch::default();

    let cmp = plan.first(&Capability::CompareCities);
    let fcm = plan.first(&Capability::ForecastMulti);
    let fcs = plan.first(&Capability::ForecastCity);
    let sc = plan.first(&Capability::ScrapeCity);

    if let Some(step) = cmp {
        if let Some(cities) = step.cities() {
            patch.compare_cities = Some(cities.join(","));
        }
        if let Some(days) = step.days() {
            patch.compare_days = Some(days);
        }
    }

    if let Some(step) = fcm {
        if let Some(cities) = step.cities() {
            patch.forecast_cities = Some(cities.join(","));
        }
        if let Some(h) = step.horizon_days() {
            patch.forecast_horizon = Some(h);
        }
        if let Some(t) = step.train_days() {
            patch.forecast_train_days = Some(t);
        }
    }

    // Only a step that names its city seeds the forecast tab.
    if let Some((step, city)) = fcs.and_then(|s| s.city().map(|c| (s, c))) {
        patch.forecast_cities = Some(city.to_string());
        if let Some(h) = step.horizon_days() {
            patch.forecast_horizon = Some(h);
        }
        if let Some(t) = step.train_days() {
            patch.forecast_train_days = Some(t);
        }
    }

    if let Some(step) = sc {
        let city = step.city();
        let days = step.days();
        if let Some(city) = city {
            patch.scrape_city = Some(city.to_string());
        }
        if let Some(days) = days {
            patch.scrape_days = Some(days);
        }
        // A lone scrape step doubles as a comparison hint.
        if cmp.is_none() {
            if let Some(city) = city {
                patch.compare_cities = Some(city.to_string());
            }
            if let Some(days) = days {
                patch.compare_days = Some(days);
            }
        }
    }

    tracing::debug!(steps = plan.steps.len(), empty = patch.is_empty(), "resolved plan autofill");
    patch
}
