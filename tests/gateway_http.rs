use std::sync::{Arc, Mutex};

use airq_agent::gateway::http::HttpBackend;
use airq_agent::gateway::usage::CallRecord;
use airq_agent::gateway::{
    AirqApi, BackendError, BackendGateway, CallStatus, CompareRequest, ExecuteRequest,
    ForecastMultiRequest, PlanRequest, ReportKind, ReportRequest, ScrapeRequest, Tier, UsageSink,
};
use airq_agent::Step;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer, tier: Tier) -> HttpBackend {
    HttpBackend::with_config(server.uri(), tier, None, None).unwrap()
}

#[derive(Default)]
struct CollectingSink {
    records: Mutex<Vec<CallRecord>>,
}

#[async_trait::async_trait]
impl UsageSink for CollectingSink {
    async fn record(&self, record: CallRecord) {
        self.records.lock().unwrap().push(record);
    }
}

#[tokio::test]
async fn every_request_carries_the_tier_header() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/healthz"))
        .and(header("X-PLAN", "enterprise"))
        .and(header("X-API-KEY", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "ok",
            "db": { "ok": true, "error": null },
            "upstream": { "ok": true, "error": null }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let backend =
        HttpBackend::with_config(server.uri(), Tier::Enterprise, Some("secret".into()), None)
            .unwrap();
    let health = backend.health().await.unwrap();
    assert!(health.is_ok());
    assert!(health.db.unwrap().ok);
}

#[tokio::test]
async fn compare_preserves_backend_city_order() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/compare"))
        .and(body_json(json!({ "cities": ["Kandy", "Colombo"], "days": 7 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "byCity": {
                "Kandy": { "mean_pm25": 25.0, "n_points": 168 },
                "Colombo": { "mean_pm25": 18.0, "n_points": 168 }
            },
            "days": 7,
            "best": "Colombo",
            "worst": "Kandy"
        })))
        .mount(&server)
        .await;

    let result = backend(&server, Tier::Free)
        .compare(&CompareRequest::new(vec!["Kandy".into(), "Colombo".into()], 7))
        .await
        .unwrap();
    let cities: Vec<&str> = result.by_city.keys().map(String::as_str).collect();
    assert_eq!(cities, vec!["Kandy", "Colombo"]);
    assert_eq!(result.best.as_deref(), Some("Colombo"));
}

#[tokio::test]
async fn error_detail_is_surfaced() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/forecast/multi"))
        .respond_with(
            ResponseTemplate::new(403)
                .insert_header("x-request-id", "req-42")
                .set_body_json(json!({ "detail": "Free plan allows up to 2 cities" })),
        )
        .mount(&server)
        .await;

    let req = ForecastMultiRequest::new(vec!["A".into(), "B".into(), "C".into()], 7, 30);
    let err = backend(&server, Tier::Free)
        .forecast_multi(&req)
        .await
        .unwrap_err();

    match &err {
        BackendError::Backend { status, detail, .. } => {
            assert_eq!(*status, 403);
            assert_eq!(detail, "Free plan allows up to 2 cities");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.request_id(), Some("req-42"));
    assert_eq!(err.display_message(), "Free plan allows up to 2 cities");
}

#[tokio::test]
async fn forecast_multi_keeps_readable_cities() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/forecast/multi"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "byCity": {
                "Kandy": { "error": "not enough history" },
                "Colombo": [
                    { "ts": "2025-01-01T00:00:00", "yhat": null },
                    { "ts": "2025-01-02T00:00:00", "yhat": 14.0 }
                ]
            },
            "summary": {
                "Kandy": { "n_points": 0, "mean_yhat": null },
                "Colombo": { "n_points": 1, "mean_yhat": 14.0 }
            }
        })))
        .mount(&server)
        .await;

    let req = ForecastMultiRequest::new(vec!["Kandy".into(), "Colombo".into()], 7, 30);
    let result = backend(&server, Tier::Pro)
        .forecast_multi(&req)
        .await
        .unwrap();
    let cities: Vec<&str> = result.by_city.keys().map(String::as_str).collect();
    assert_eq!(cities, vec!["Kandy", "Colombo"]);
    assert!(result.by_city["Kandy"].is_empty());
    assert_eq!(result.by_city["Colombo"].len(), 1);
    assert_eq!(result.by_city["Colombo"][0].yhat, 14.0);
}

#[tokio::test]
async fn invalid_requests_never_reach_the_backend() {
    let server = MockServer::start().await;
    let backend = backend(&server, Tier::Free);

    let err = backend
        .scrape(&ScrapeRequest::new("Colombo", 120))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_request");

    let err = backend
        .forecast_multi(&ForecastMultiRequest::new(vec!["A".into()], 7, 3))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_request");

    let err = backend.agent_plan(&PlanRequest::new("  ")).await.unwrap_err();
    assert_eq!(err.code(), "invalid_request");

    let received = server.received_requests().await.unwrap();
    assert!(received.is_empty());
}

#[tokio::test]
async fn execute_sends_the_plan_verbatim() {
    let server = MockServer::start().await;

    let steps = vec![Step::new(
        "forecast_multi",
        json!({ "cities": ["Colombo", "Kandy"], "horizonDays": 7, "trainDays": 30, "extra": "kept" }),
    )];

    Mock::given(method("POST"))
        .and(path("/agent/execute"))
        .and(body_json(json!({
            "plan": [{
                "name": "forecast_multi",
                "arguments": { "cities": ["Colombo", "Kandy"], "horizonDays": 7, "trainDays": 30, "extra": "kept" }
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "answer": "Colombo looks cleaner.",
            "trace": [{ "ok": true, "result": { "byCity": {}, "summary": {} } }],
            "final": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resp = backend(&server, Tier::Pro)
        .agent_execute(&ExecuteRequest::with_plan(steps))
        .await
        .unwrap();
    assert_eq!(resp.trace.len(), 1);
    assert_eq!(resp.answer.as_deref(), Some("Colombo looks cleaner."));
    assert!(resp.final_result.is_none());
}

#[tokio::test]
async fn planner_error_reply_is_not_a_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/agent/plan"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "error": "LLM unavailable" })),
        )
        .mount(&server)
        .await;

    let plan = backend(&server, Tier::Free)
        .agent_plan(&PlanRequest::new("compare colombo and kandy"))
        .await
        .unwrap();
    assert!(plan.is_empty());
    assert_eq!(plan.error.as_deref(), Some("LLM unavailable"));
}

#[tokio::test]
async fn malformed_json_is_a_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = backend(&server, Tier::Free)
        .scrape(&ScrapeRequest::new("Colombo", 7))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "decode_error");
}

#[tokio::test]
async fn report_returns_raw_bytes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/report"))
        .and(body_json(json!({
            "report_type": "comparison",
            "payload": { "best": "Colombo" },
            "llm_notes": "No AI analysis provided.",
            "chart_images": []
        })))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.4 test".to_vec()))
        .mount(&server)
        .await;

    let req = ReportRequest::new(ReportKind::Comparison, json!({ "best": "Colombo" }));
    let bytes = backend(&server, Tier::Free).report(&req).await.unwrap();
    assert_eq!(bytes, b"%PDF-1.4 test");
}

#[tokio::test]
async fn gateway_records_one_usage_row_per_call_without_retry() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/scrape"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({ "detail": "upstream down" })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/healthz"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .mount(&server)
        .await;

    let sink = Arc::new(CollectingSink::default());
    let gateway = BackendGateway::new(backend(&server, Tier::Pro), sink.clone()).with_caller("test");

    let err = gateway
        .scrape(ScrapeRequest::new("Colombo", 7))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "backend_unavailable");
    gateway.health().await.unwrap();

    let records = sink.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].endpoint, "/scrape");
    assert_eq!(records[0].status, CallStatus::Error);
    assert_eq!(records[0].http_status, Some(503));
    assert_eq!(records[0].error_code.as_deref(), Some("backend_unavailable"));
    assert_eq!(records[0].tier, Tier::Pro);
    assert_eq!(records[1].endpoint, "/healthz");
    assert_eq!(records[1].status, CallStatus::Success);
    assert_eq!(records[1].caller, "test");
}
