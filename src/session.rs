//! Dashboard session: explicit state, handlers that return deltas.
//!
//! Each handler reads what it needs from [`SessionState`], makes one backend
//! call and turns the outcome into a [`SessionDelta`]. [`AgentSession`] then
//! applies the delta. Handlers borrow the session mutably, so two actions on
//! the same session can never interleave.
//!
//! The plan/execute flow is a three-state machine: a successful plan moves
//! to `Planned`, a successful execution to `Executed`, and only `Planned`
//! can execute the held plan. Planning again from `Executed` passes through
//! `Idle` first.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::autofill::{self, InputPatch, UiInputs};
use crate::gateway::{
    AirqApi, BackendError, CompareRequest, ExecuteRequest, ForecastMultiRequest, HealthStatus,
    PlanRequest, ReportKind, ReportRequest, ScrapeRequest,
};
use crate::journal::{JournalSink, SessionAction, SessionEvent};
use crate::plan::Plan;
use crate::reconcile::{reconcile, ActiveView, ComparisonView, ScrapeView};
use crate::results::{ResultKind, TraceEntry};
use crate::select::{project_multi, ForecastView};

// =============================================================================
// STATE
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "phase", content = "plan", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Planned(Plan),
    Executed,
}

impl Phase {
    /// True only while a non-empty plan is held.
    pub fn can_execute_plan(&self) -> bool {
        matches!(self, Phase::Planned(plan) if !plan.is_empty())
    }

    pub fn plan(&self) -> Option<&Plan> {
        match self {
            Phase::Planned(plan) => Some(plan),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Planned(_) => "planned",
            Phase::Executed => "executed",
        }
    }
}

/// One dashboard region: nothing yet, a value, or the error that replaced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Region<T> {
    Empty,
    Ready(T),
    Failed(String),
}

impl<T> Default for Region<T> {
    fn default() -> Self {
        Region::Empty
    }
}

impl<T> Region<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Region::Ready(v) => Some(v),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Region::Failed(e) => Some(e),
            _ => None,
        }
    }

    fn from_result<E>(result: Result<T, E>, message: impl FnOnce(&E) -> String) -> Self {
        match result {
            Ok(v) => Region::Ready(v),
            Err(e) => Region::Failed(message(&e)),
        }
    }
}

/// Last assistant outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentOutcome {
    pub answer: Option<String>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<TraceEntry>,
}

impl AgentOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    pub inputs: UiInputs,
    pub prompt: String,
    pub health: Region<HealthStatus>,
    pub scrape: Region<ScrapeView>,
    pub comparison: Region<ComparisonView>,
    pub forecast: Region<ForecastView>,
    pub active_view: ActiveView,
    pub agent: AgentOutcome,
}

/// Changes produced by one handler. `None` leaves the slot as it was.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDelta {
    pub phase: Option<Phase>,
    pub inputs: InputPatch,
    pub health: Option<Region<HealthStatus>>,
    pub scrape: Option<Region<ScrapeView>>,
    pub comparison: Option<Region<ComparisonView>>,
    pub forecast: Option<Region<ForecastView>>,
    pub active_view: Option<ActiveView>,
    pub agent: Option<AgentOutcome>,
    /// Result shapes recognized in an execution response.
    pub matched: Vec<ResultKind>,
}

impl SessionDelta {
    /// First failure carried by the delta, if any.
    pub fn error(&self) -> Option<&str> {
        self.agent
            .as_ref()
            .and_then(|a| a.error.as_deref())
            .or_else(|| self.scrape.as_ref().and_then(Region::error))
            .or_else(|| self.comparison.as_ref().and_then(Region::error))
            .or_else(|| self.forecast.as_ref().and_then(Region::error))
    }
}

impl SessionState {
    pub fn apply(&mut self, delta: SessionDelta) {
        if let Some(phase) = delta.phase {
            if phase.as_str() != self.phase.as_str() {
                info!(from = self.phase.as_str(), to = phase.as_str(), "session phase");
            }
            self.phase = phase;
        }
        delta.inputs.apply(&mut self.inputs);
        if let Some(health) = delta.health {
            self.health = health;
        }
        if let Some(scrape) = delta.scrape {
            self.scrape = scrape;
        }
        if let Some(comparison) = delta.comparison {
            self.comparison = comparison;
        }
        if let Some(forecast) = delta.forecast {
            self.forecast = forecast;
        }
        if let Some(view) = delta.active_view {
            self.active_view = view;
        }
        if let Some(agent) = delta.agent {
            self.agent = agent;
        }
    }
}

/// Split a comma-separated city list, dropping blank entries.
pub fn split_cities(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

// =============================================================================
// HANDLERS
// =============================================================================

pub async fn health_delta(api: &dyn AirqApi) -> SessionDelta {
    let health = match api.health().await {
        Ok(h) => h,
        Err(err) => {
            warn!(code = err.code(), error = %err, "health check failed");
            HealthStatus::degraded()
        }
    };
    SessionDelta {
        health: Some(Region::Ready(health)),
        ..SessionDelta::default()
    }
}

pub async fn scrape_delta(api: &dyn AirqApi, state: &SessionState) -> SessionDelta {
    let req = ScrapeRequest::new(state.inputs.scrape_city.trim(), state.inputs.scrape_days);
    let result = api.scrape(req).await.map(|r| ScrapeView::from_result(&r));
    SessionDelta {
        scrape: Some(Region::from_result(result, BackendError::display_message)),
        active_view: Some(ActiveView::Data),
        ..SessionDelta::default()
    }
}

pub async fn compare_delta(api: &dyn AirqApi, state: &SessionState) -> SessionDelta {
    let req = CompareRequest::new(
        split_cities(&state.inputs.compare_cities),
        state.inputs.compare_days,
    );
    let result = api
        .compare(req)
        .await
        .map(|r| ComparisonView::from_result(&r));
    SessionDelta {
        comparison: Some(Region::from_result(result, BackendError::display_message)),
        active_view: Some(ActiveView::Compare),
        ..SessionDelta::default()
    }
}

pub async fn forecast_delta(api: &dyn AirqApi, state: &SessionState) -> SessionDelta {
    let req = ForecastMultiRequest::new(
        split_cities(&state.inputs.forecast_cities),
        state.inputs.forecast_horizon,
        state.inputs.forecast_train_days,
    );
    let result = api.forecast_multi(req).await.map(|r| project_multi(&r));
    SessionDelta {
        forecast: Some(Region::from_result(result, BackendError::display_message)),
        active_view: Some(ActiveView::Forecast),
        ..SessionDelta::default()
    }
}

/// Plan from the current prompt. On success the plan's arguments are copied
/// into the matching inputs.
pub async fn plan_delta(api: &dyn AirqApi, state: &SessionState) -> SessionDelta {
    let failed = |error: String| SessionDelta {
        phase: Some(Phase::Idle),
        agent: Some(AgentOutcome::failed(error)),
        ..SessionDelta::default()
    };

    match api.agent_plan(PlanRequest::new(state.prompt.trim())).await {
        Ok(plan) => match plan.error.clone() {
            Some(error) => failed(error),
            None => SessionDelta {
                inputs: autofill::resolve(&plan),
                phase: Some(Phase::Planned(plan)),
                agent: Some(AgentOutcome::default()),
                ..SessionDelta::default()
            },
        },
        Err(err) => failed(err.display_message()),
    }
}

/// Execute the held plan verbatim, or the raw prompt when no plan is held.
/// A failure keeps the phase, so a held plan can be retried.
pub async fn execute_delta(api: &dyn AirqApi, state: &SessionState) -> SessionDelta {
    let req = match state.phase.plan().filter(|p| !p.is_empty()) {
        Some(plan) => ExecuteRequest::with_plan(plan.steps.clone()),
        None => ExecuteRequest::with_prompt(state.prompt.trim()),
    };

    match api.agent_execute(req).await {
        Ok(response) => {
            let rec = reconcile(&response);
            SessionDelta {
                phase: Some(Phase::Executed),
                inputs: rec.inputs,
                scrape: rec.scrape.map(Region::Ready),
                comparison: rec.comparison.map(Region::Ready),
                forecast: rec.forecast.map(Region::Ready),
                active_view: rec.active_view,
                agent: Some(AgentOutcome {
                    answer: response.answer,
                    error: None,
                    trace: response.trace,
                }),
                matched: rec.matched,
                ..SessionDelta::default()
            }
        }
        Err(err) => SessionDelta {
            agent: Some(AgentOutcome::failed(err.display_message())),
            ..SessionDelta::default()
        },
    }
}

// =============================================================================
// SESSION
// =============================================================================

pub struct AgentSession {
    id: Uuid,
    api: Arc<dyn AirqApi>,
    state: SessionState,
    journal: Option<Arc<dyn JournalSink>>,
}

impl AgentSession {
    pub fn new(api: Arc<dyn AirqApi>) -> Self {
        Self {
            id: Uuid::new_v4(),
            api,
            state: SessionState::default(),
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<dyn JournalSink>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn inputs_mut(&mut self) -> &mut UiInputs {
        &mut self.state.inputs
    }

    pub fn set_prompt(&mut self, prompt: impl Into<String>) {
        self.state.prompt = prompt.into();
    }

    pub fn can_execute_plan(&self) -> bool {
        self.state.phase.can_execute_plan()
    }

    /// Hold a plan produced elsewhere (e.g. loaded from a file) as if the
    /// planner had returned it.
    pub fn hold_plan(&mut self, plan: Plan) {
        self.state.apply(SessionDelta {
            inputs: autofill::resolve(&plan),
            phase: Some(Phase::Planned(plan)),
            ..SessionDelta::default()
        });
    }

    pub async fn health(&mut self) -> SessionDelta {
        let delta = health_delta(self.api.as_ref()).await;
        let ok = delta
            .health
            .as_ref()
            .and_then(Region::value)
            .map_or(false, HealthStatus::is_ok);
        let event = self.event(SessionAction::Health);
        let event = if ok { event } else { event.failed("degraded") };
        self.commit(delta, event)
    }

    pub async fn scrape(&mut self) -> SessionDelta {
        let delta = scrape_delta(self.api.as_ref(), &self.state).await;
        let event = self.event(SessionAction::Scrape);
        self.commit(delta, event)
    }

    pub async fn compare(&mut self) -> SessionDelta {
        let delta = compare_delta(self.api.as_ref(), &self.state).await;
        let event = self.event(SessionAction::Compare);
        self.commit(delta, event)
    }

    pub async fn forecast(&mut self) -> SessionDelta {
        let delta = forecast_delta(self.api.as_ref(), &self.state).await;
        let event = self.event(SessionAction::Forecast);
        self.commit(delta, event)
    }

    pub async fn plan(&mut self) -> SessionDelta {
        if self.state.phase == Phase::Executed {
            self.state.apply(SessionDelta {
                phase: Some(Phase::Idle),
                ..SessionDelta::default()
            });
        }
        let delta = plan_delta(self.api.as_ref(), &self.state).await;
        let steps = delta.phase.as_ref().and_then(Phase::plan).map(|p| p.steps.len());
        let mut event = self.event(SessionAction::Plan);
        if let Some(n) = steps {
            event = event.steps(n);
        }
        self.commit(delta, event)
    }

    pub async fn execute(&mut self) -> SessionDelta {
        let steps = self.state.phase.plan().map(|p| p.steps.len());
        let delta = execute_delta(self.api.as_ref(), &self.state).await;
        let mut event = self.event(SessionAction::Execute).matched(delta.matched.clone());
        if let Some(n) = steps {
            event = event.steps(n);
        }
        self.commit(delta, event)
    }

    /// Plan, then execute the plan when one was produced.
    pub async fn ask(&mut self, prompt: impl Into<String>) -> SessionDelta {
        self.set_prompt(prompt);
        let planned = self.plan().await;
        if planned.error().is_some() {
            return planned;
        }
        self.execute().await
    }

    /// Report request for the current comparison or forecast view, with the
    /// last assistant answer as notes.
    pub fn report_request(&self, kind: ReportKind) -> Result<ReportRequest, BackendError> {
        let payload = match kind {
            ReportKind::Comparison => self.state.comparison.value().map(serde_json::to_value),
            ReportKind::Forecast => self.state.forecast.value().map(serde_json::to_value),
        };
        let payload = payload
            .ok_or_else(|| {
                BackendError::invalid_request(format!("no {} data to report", kind.as_str()))
            })?
            .map_err(|e| BackendError::decode(e.to_string()))?;
        Ok(ReportRequest::new(kind, payload).notes(self.state.agent.answer.as_deref()))
    }

    pub async fn report(&mut self, kind: ReportKind) -> Result<Vec<u8>, BackendError> {
        let result = match self.report_request(kind) {
            Ok(req) => self.api.report(req).await,
            Err(err) => Err(err),
        };
        let event = self.event(SessionAction::Report);
        let event = match &result {
            Ok(_) => event,
            Err(err) => event.failed(err.display_message()),
        };
        self.journal_event(event);
        result
    }

    fn event(&self, action: SessionAction) -> SessionEvent {
        SessionEvent::new(self.id, action, self.state.active_view)
    }

    fn commit(&mut self, delta: SessionDelta, event: SessionEvent) -> SessionDelta {
        let event = match delta.error() {
            Some(error) => event.failed(error),
            None => event,
        };
        self.state.apply(delta.clone());
        let event = SessionEvent {
            active_view: self.state.active_view,
            ..event
        };
        self.journal_event(event);
        delta
    }

    fn journal_event(&self, event: SessionEvent) {
        if let Some(journal) = &self.journal {
            if let Err(err) = journal.record(event) {
                warn!(error = %err, "failed to record session event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;
    use crate::results::{
        ComparisonResult, ExecuteResponse, MultiForecastResult, ScrapeResult,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    /// Scripted backend: canned plan and execution replies, records requests.
    #[derive(Default)]
    struct ScriptedApi {
        plan: Mutex<Option<Result<Plan, String>>>,
        execute: Mutex<Option<Result<ExecuteResponse, String>>>,
        executed: Mutex<Vec<ExecuteRequest>>,
    }

    fn backend_err(detail: &str) -> BackendError {
        BackendError::backend(400, detail, crate::gateway::ErrorContext::new())
    }

    #[async_trait]
    impl AirqApi for ScriptedApi {
        async fn health(&self) -> Result<HealthStatus, BackendError> {
            Err(backend_err("down"))
        }
        async fn scrape(&self, req: ScrapeRequest) -> Result<ScrapeResult, BackendError> {
            req.validate()?;
            Ok(ScrapeResult {
                city: req.city,
                days: Some(req.days),
                lat: None,
                lon: None,
                inserted: 24,
            })
        }
        async fn compare(&self, req: CompareRequest) -> Result<ComparisonResult, BackendError> {
            req.validate()?;
            Err(backend_err("No data for Kandy"))
        }
        async fn forecast_multi(
            &self,
            req: ForecastMultiRequest,
        ) -> Result<MultiForecastResult, BackendError> {
            req.validate()?;
            Err(backend_err("unused"))
        }
        async fn agent_plan(&self, _req: PlanRequest) -> Result<Plan, BackendError> {
            match self.plan.lock().unwrap().clone() {
                Some(Ok(plan)) => Ok(plan),
                Some(Err(e)) => Err(backend_err(&e)),
                None => Err(backend_err("no plan scripted")),
            }
        }
        async fn agent_execute(&self, req: ExecuteRequest) -> Result<ExecuteResponse, BackendError> {
            req.validate()?;
            self.executed.lock().unwrap().push(req);
            match self.execute.lock().unwrap().clone() {
                Some(Ok(resp)) => Ok(resp),
                Some(Err(e)) => Err(backend_err(&e)),
                None => Err(backend_err("no execution scripted")),
            }
        }
        async fn report(&self, _req: ReportRequest) -> Result<Vec<u8>, BackendError> {
            Ok(b"%PDF".to_vec())
        }
    }

    fn scripted(
        plan: Option<Result<Plan, String>>,
        execute: Option<Result<ExecuteResponse, String>>,
    ) -> Arc<ScriptedApi> {
        Arc::new(ScriptedApi {
            plan: Mutex::new(plan),
            execute: Mutex::new(execute),
            executed: Mutex::new(Vec::new()),
        })
    }

    fn scrape_plan() -> Plan {
        Plan::new(vec![Step::new("scrape_city", json!({"city": "Kandy", "days": 3}))])
    }

    fn scrape_response() -> ExecuteResponse {
        ExecuteResponse {
            trace: vec![TraceEntry::success(
                json!({"ok": true, "city": "Kandy", "inserted": 72}),
            )],
            final_result: None,
            answer: Some("Scraped Kandy".to_string()),
        }
    }

    #[test]
    fn split_cities_trims_and_drops_blanks() {
        assert_eq!(split_cities(" Colombo, ,Kandy ,"), vec!["Colombo", "Kandy"]);
        assert!(split_cities(" , ").is_empty());
    }

    #[test]
    fn only_planned_with_steps_can_execute_plan() {
        assert!(!Phase::Idle.can_execute_plan());
        assert!(!Phase::Executed.can_execute_plan());
        assert!(!Phase::Planned(Plan::default()).can_execute_plan());
        assert!(Phase::Planned(scrape_plan()).can_execute_plan());
    }

    #[tokio::test]
    async fn plan_then_execute_walks_the_state_machine() {
        let api = scripted(Some(Ok(scrape_plan())), Some(Ok(scrape_response())));
        let mut session = AgentSession::new(api.clone());
        session.set_prompt("scrape kandy");

        session.plan().await;
        assert!(session.can_execute_plan());
        assert_eq!(session.state().inputs.scrape_city, "Kandy");
        assert_eq!(session.state().inputs.compare_cities, "Kandy");

        let delta = session.execute().await;
        assert_eq!(delta.matched, vec![ResultKind::Scrape]);
        assert_eq!(session.state().phase, Phase::Executed);
        assert!(!session.can_execute_plan());
        assert_eq!(session.state().agent.answer.as_deref(), Some("Scraped Kandy"));
        assert_eq!(session.state().scrape.value().map(|s| s.inserted), Some(72));

        let sent = api.executed.lock().unwrap();
        assert_eq!(sent[0].plan.as_ref().map(Vec::len), Some(1));
        assert!(sent[0].prompt.is_none());
    }

    #[tokio::test]
    async fn execute_without_plan_sends_prompt() {
        let api = scripted(None, Some(Ok(scrape_response())));
        let mut session = AgentSession::new(api.clone());
        session.set_prompt("scrape kandy");
        session.execute().await;

        let sent = api.executed.lock().unwrap();
        assert_eq!(sent[0].prompt.as_deref(), Some("scrape kandy"));
        assert!(sent[0].plan.is_none());
        drop(sent);
        assert_eq!(session.state().phase, Phase::Executed);
    }

    #[tokio::test]
    async fn plan_failure_returns_to_idle() {
        let api = scripted(Some(Err("planner offline".into())), None);
        let mut session = AgentSession::new(api);
        session.set_prompt("forecast");
        session.plan().await;
        assert_eq!(session.state().phase, Phase::Idle);
        assert_eq!(session.state().agent.error.as_deref(), Some("planner offline"));
    }

    #[tokio::test]
    async fn plan_error_reply_returns_to_idle() {
        let plan = Plan {
            error: Some("OPENAI_API_KEY not set".into()),
            ..Plan::default()
        };
        let api = scripted(Some(Ok(plan)), None);
        let mut session = AgentSession::new(api);
        session.set_prompt("forecast");
        let delta = session.plan().await;
        assert_eq!(delta.error(), Some("OPENAI_API_KEY not set"));
        assert_eq!(session.state().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn execution_failure_keeps_the_plan() {
        let api = scripted(Some(Ok(scrape_plan())), Some(Err("tier limit".into())));
        let mut session = AgentSession::new(api);
        session.set_prompt("scrape kandy");
        session.plan().await;
        session.execute().await;
        assert!(session.can_execute_plan());
        assert_eq!(session.state().agent.error.as_deref(), Some("tier limit"));
    }

    #[tokio::test]
    async fn replanning_after_execution_passes_through_idle() {
        let api = scripted(Some(Err("nope".into())), Some(Ok(scrape_response())));
        let mut session = AgentSession::new(api);
        session.set_prompt("scrape kandy");
        session.execute().await;
        assert_eq!(session.state().phase, Phase::Executed);
        session.plan().await;
        assert_eq!(session.state().phase, Phase::Idle);
    }

    #[tokio::test]
    async fn failures_stay_in_their_region() {
        let api = scripted(None, None);
        let mut session = AgentSession::new(api);
        session.scrape().await;
        session.compare().await;
        assert_eq!(session.state().scrape.value().map(|s| s.city.as_str()), Some("Colombo"));
        assert_eq!(session.state().comparison.error(), Some("No data for Kandy"));
        assert_eq!(session.state().active_view, ActiveView::Compare);

        session.inputs_mut().forecast_horizon = 45;
        session.forecast().await;
        assert!(session.state().forecast.error().unwrap().contains("horizonDays"));
        assert!(session.state().scrape.value().is_some());
    }

    #[tokio::test]
    async fn failed_health_check_is_degraded() {
        let mut session = AgentSession::new(scripted(None, None));
        session.health().await;
        assert_eq!(
            session.state().health.value().map(|h| h.status.as_str()),
            Some("degraded")
        );
    }

    #[tokio::test]
    async fn report_needs_data_and_defaults_notes() {
        let mut session = AgentSession::new(scripted(None, None));
        assert!(session.report_request(ReportKind::Forecast).is_err());

        session.state.forecast = Region::Ready(ForecastView::default());
        let req = session.report_request(ReportKind::Forecast).unwrap();
        assert_eq!(req.llm_notes, crate::gateway::DEFAULT_REPORT_NOTES);
        assert_eq!(session.report(ReportKind::Forecast).await.unwrap(), b"%PDF");
    }
}
