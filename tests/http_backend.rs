// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP backend tests against a local mock server.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use runtrack::config::ResolvedConfig;
use runtrack::{
    AutomationClient, AutomationRequest, HttpBackend, PollConfig, RunBackend, RunError, RunStatus,
};

fn config_for(server: &MockServer) -> ResolvedConfig {
    ResolvedConfig {
        base_url: server.uri(),
        poll: PollConfig::default()
            .with_interval(Duration::from_millis(10))
            .with_timeout(Duration::from_secs(5)),
        ..Default::default()
    }
}

fn client_for(server: &MockServer) -> AutomationClient {
    AutomationClient::from_config(&config_for(server)).unwrap()
}

fn sse(events: &[serde_json::Value]) -> ResponseTemplate {
    let body: String = events
        .iter()
        .map(|event| format!("data: {}\n\n", event))
        .collect();
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_submit_sends_request_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/automation/submit"))
        .and(body_partial_json(json!({
            "intent": "research.validate_idea",
            "payload": {"idea": {"title": "X"}},
            "idempotency_key": "ui-key-1",
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"run_id": "r1", "status": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let request = AutomationRequest::new("research.validate_idea", json!({"idea": {"title": "X"}}))
        .with_idempotency_key("ui-key-1");
    let response = client.submit(request).await.unwrap();

    assert_eq!(response.run_id, "r1");
    assert_eq!(response.status, RunStatus::Queued);
    assert_eq!(client.registry().get("r1").unwrap().status, RunStatus::Queued);
}

#[tokio::test]
async fn test_submit_rejection_carries_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/automation/submit"))
        .respond_with(ResponseTemplate::new(422).set_body_string("payload.idea is required"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .submit(AutomationRequest::new("research.validate_idea", json!({})))
        .await
        .unwrap_err();

    match err {
        RunError::Submission { status, body } => {
            assert_eq!(status, 422);
            assert_eq!(body, "payload.idea is required");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_get_run_parses_record() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run_id": "r1",
            "status": "succeeded",
            "detail": {"intent": "research.validate_idea", "result": {"score": 42}},
            "ts": 1700000000,
        })))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri()).unwrap();
    let record = backend.get_run("r1").await.unwrap();

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.intent(), Some("research.validate_idea"));
    assert_eq!(record.created_at.unwrap().timestamp(), 1_700_000_000);
}

#[tokio::test]
async fn test_get_run_not_found_is_api_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri()).unwrap();
    let err = backend.get_run("missing").await.unwrap_err();
    assert!(matches!(err, RunError::Api { status: 404, .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_get_run_encodes_run_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/batch%2F7"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"run_id": "batch/7", "status": "queued"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(server.uri()).unwrap();
    assert_eq!(backend.get_run("batch/7").await.unwrap().run_id, "batch/7");
}

#[tokio::test]
async fn test_recent_runs_passes_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/recent"))
        .and(query_param("limit", "5"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"run_id": "r2", "status": "running"},
                {"run_id": "r1", "status": "failed", "detail": {"error": "boom"}},
            ]
        })))
        .mount(&server)
        .await;

    let runs = client_for(&server).recent_runs(5).await.unwrap();
    let ids: Vec<_> = runs.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec!["r2", "r1"]);
}

#[tokio::test]
async fn test_configured_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/recent"))
        .and(header("x-team", "core"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.headers = HashMap::from([("x-team".to_string(), "core".to_string())]);
    let client = AutomationClient::from_config(&config).unwrap();

    assert!(client.recent_runs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_poll_until_succeeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run_id": "r1", "status": "running"
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run_id": "r1",
            "status": "succeeded",
            "detail": {"result": {"score": 42}},
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.poll_run("r1").await.unwrap();

    assert_eq!(result, json!({"score": 42}));
    assert_eq!(client.registry().get("r1").unwrap().status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_stream_reaches_terminal_without_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1/stream"))
        .and(header("accept", "text/event-stream"))
        .respond_with(sse(&[
            json!({"run_id": "r1", "status": "running"}),
            json!({"status": "succeeded", "detail": {"result": {"ideas": [{"title": "A"}]}}}),
        ]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client.watch_run("r1", Some("ideas")).await.unwrap();

    assert_eq!(result, json!({"ideas": [{"title": "A"}]}));
    assert_eq!(client.registry().get("ideas").unwrap().status, RunStatus::Succeeded);
}

#[tokio::test]
async fn test_stream_error_falls_back_to_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1/stream"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run_id": "r1",
            "status": "failed",
            "detail": {"error": "invalid idea"},
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server).watch_run("r1", None).await.unwrap_err();
    assert!(matches!(err, RunError::RunFailed(ref message) if message == "invalid idea"));
}

#[tokio::test]
async fn test_stream_closed_early_falls_back_to_polling() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1/stream"))
        .respond_with(sse(&[json!({"run_id": "r1", "status": "running"})]))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/automation/runs/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "run_id": "r1",
            "status": "succeeded",
            "detail": {"result": {"score": 7}},
        })))
        .mount(&server)
        .await;

    let result = client_for(&server).watch_run("r1", None).await.unwrap();
    assert_eq!(result, json!({"score": 7}));
}

#[test]
fn test_curl_command_targets_server() {
    let backend = HttpBackend::new("http://api.internal:8000/").unwrap();
    assert_eq!(backend.base_url(), "http://api.internal:8000");

    let cmd = runtrack::debug::curl_command(
        backend.base_url(),
        &AutomationRequest::new("ideation.generate", json!({"topic": "it's"})),
    )
    .unwrap();
    let args = shlex::split(&cmd).unwrap();
    assert_eq!(args[3], "http://api.internal:8000/automation/submit");
    let body: serde_json::Value = serde_json::from_str(args.last().unwrap()).unwrap();
    assert_eq!(body["payload"]["topic"], "it's");
    assert!(body["idempotency_key"]
        .as_str()
        .unwrap()
        .starts_with("debug-ideation.generate-"));
}
