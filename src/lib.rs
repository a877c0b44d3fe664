#![forbid(unsafe_code)]

//! # airq-agent
//!
//! Client core for an air-quality analytics backend with an LLM planner.
//!
//! A natural-language request is planned by the backend into a sequence of
//! capability steps (`scrape_city`, `compare_cities`, `forecast_multi`,
//! `forecast_city`). Before execution the plan's arguments pre-fill the
//! dashboard inputs; after execution the heterogeneous trace is classified
//! into typed results and folded into canonical comparison and forecast
//! views with best/worst cities.
//!
//! The pure pieces (`autofill`, `results`, `reconcile`, `select`, `project`)
//! never touch the network. `gateway` talks to the backend and `session`
//! ties both together behind an explicit plan/execute state machine.

pub mod autofill;
pub mod config;
pub mod gateway;
pub mod journal;
pub mod plan;
pub mod project;
pub mod reconcile;
pub mod results;
pub mod select;
pub mod session;

pub use autofill::{resolve, InputPatch, UiInputs};
pub use config::{ClientConfig, ConfigError};
pub use gateway::{AirqApi, BackendError, BackendGateway, Tier, UsageSink};
pub use journal::{
    JournalError, JournalSink, JournalWorker, JsonlJournalSink, SessionAction, SessionEvent,
};
pub use plan::{Capability, Plan, Step};
pub use reconcile::{reconcile, ActiveView, ComparisonView, Reconciliation, ScrapeView};
pub use results::{classify, CapabilityResult, Classified, ExecuteResponse, ResultKind, TraceEntry};
pub use select::{fold_forecasts, select_extrema, ForecastView};
pub use session::{AgentSession, Phase, Region, SessionDelta, SessionState};
