//! HTTP Job Service Client Tests
//! Test File: http_job_service_tests.rs
//!
//! Runs `HttpJobService` against a local axum server that imitates the
//! Job Service routes and records what it received.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use echoaudit_client::{HttpJobService, JobService, JobServiceError};
use echoaudit_common::api::{AckKind, AgentAnalysisStatus, Stage};
use echoaudit_common::AgentKey;
use futures::TryStreamExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct Recorder {
    requests: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
    prompts: Arc<Mutex<Value>>,
}

impl Recorder {
    fn record(&self, line: impl Into<String>) {
        self.requests.lock().unwrap().push(line.into());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

async fn structure() -> Json<Value> {
    Json(json!({
        "2024-05-06_2024-05-12": {
            "UN": [
                {"id": "Volkov_Ivan", "calls_count": 3, "has_weekly_report": true},
                {"id": "Petrova_Anna", "name": null, "calls_count": null}
            ]
        }
    }))
}

async fn calls(
    State(recorder): State<Recorder>,
    Path((period, org, agent)): Path<(String, String, String)>,
) -> Json<Value> {
    recorder.record(format!("calls {period} {org} {agent}"));
    Json(json!([
        {"filename": "a.mp3", "date": "2024-05-07", "time": "09:00", "sort_key": "2024-05-07T09:00", "has_transcript": true},
        {"filename": "b.mp3", "date": null, "has_report": null}
    ]))
}

async fn status() -> Json<Value> {
    Json(json!({
        "fetch": {"running": false, "progress": ""},
        "transcribe": {"running": true, "progress": "3/10"},
        "analyze": {"running": false, "last_error": "model timeout"},
        "report": null,
        "last_error": null
    }))
}

/// Each trigger route answers differently to cover every acknowledgment shape
async fn trigger(recorder: Recorder, action: &'static str) -> (StatusCode, String) {
    recorder.record(format!("POST {action}"));
    match action {
        "sync" => (StatusCode::OK, String::new()),
        "transcribe" => (StatusCode::CONFLICT, "already running".to_string()),
        "analyze" => (StatusCode::OK, r#"{"status":"started"}"#.to_string()),
        _ => (StatusCode::OK, "OK".to_string()),
    }
}

async fn analyze_manager(State(recorder): State<Recorder>, Json(body): Json<Value>) -> Json<Value> {
    let force = body["force"].as_bool().unwrap_or(false);
    recorder.bodies.lock().unwrap().push(body);
    if force {
        Json(json!({"status": "accepted"}))
    } else {
        Json(json!({"status": "exists", "message": "report exists"}))
    }
}

async fn report(
    State(recorder): State<Recorder>,
    Path((_period, _org, agent)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    recorder.record(format!("report {agent} t={}", query.contains_key("t")));
    if agent == "Petrova_Anna" {
        return (StatusCode::NOT_FOUND, String::new());
    }
    (StatusCode::OK, "# Weekly report\n\nScore: 7/10".to_string())
}

async fn transcript(
    Path((_period, _org, _agent, filename)): Path<(String, String, String, String)>,
) -> impl IntoResponse {
    if filename == "a.mp3" {
        Json(json!({"content": "Hello, this is Ivan."})).into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn audio() -> Vec<u8> {
    vec![0x49, 0x44, 0x33, 0x04, 0x00]
}

async fn get_prompts(State(recorder): State<Recorder>) -> Json<Value> {
    Json(recorder.prompts.lock().unwrap().clone())
}

async fn save_prompts(State(recorder): State<Recorder>, Json(body): Json<Value>) -> StatusCode {
    *recorder.prompts.lock().unwrap() = body;
    StatusCode::OK
}

/// Start the fake Job Service on an ephemeral port
async fn start_server() -> (HttpJobService, Recorder) {
    let recorder = Recorder::default();
    *recorder.prompts.lock().unwrap() = json!({
        "system": "You are a sales quality auditor.",
        "companies": {"UN": {"name": "Union", "prompt": "Check greeting.", "tone": "formal"}},
        "version": 3
    });

    let app = Router::new()
        .route("/api/structure", get(structure))
        .route("/api/calls/:period/:org/:agent", get(calls))
        .route("/api/calls/:period/:org/:agent/report", get(report))
        .route("/api/status", get(status))
        .route("/api/analyze_manager", post(analyze_manager))
        .route("/api/transcript/:period/:org/:agent/:filename", get(transcript))
        .route("/api/audio/:period/:org/:agent/:filename", get(audio))
        .route("/api/prompts", get(get_prompts).post(save_prompts))
        .route("/api/sync", post(|State(r): State<Recorder>| trigger(r, "sync")))
        .route(
            "/api/transcribe",
            post(|State(r): State<Recorder>| trigger(r, "transcribe")),
        )
        .route("/api/analyze", post(|State(r): State<Recorder>| trigger(r, "analyze")))
        .route(
            "/api/generatereport",
            post(|State(r): State<Recorder>| trigger(r, "generatereport")),
        )
        .with_state(recorder.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let service = HttpJobService::new(&format!("http://{addr}"), Duration::from_secs(5)).unwrap();
    (service, recorder)
}

fn volkov() -> AgentKey {
    AgentKey::new("2024-05-06_2024-05-12", "UN", "Volkov_Ivan")
}

/// TC-HTTP-001: Listing and call list decode, nulls become defaults
#[tokio::test]
async fn tc_http_001_listing_and_calls() {
    let (service, recorder) = start_server().await;

    let listing = service.listing().await.unwrap();
    let agents = &listing["2024-05-06_2024-05-12"]["UN"];
    assert_eq!(agents.len(), 2);
    assert_eq!(agents[1].calls_count, 0);
    assert!(agents[0].has_weekly_report);

    let calls = service.calls(&volkov()).await.unwrap();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].has_transcript);
    assert_eq!(calls[1].date, None);
    assert!(!calls[1].has_report);
    assert_eq!(
        recorder.requests(),
        vec!["calls 2024-05-06_2024-05-12 UN Volkov_Ivan"]
    );
}

/// TC-HTTP-002: Path segments are percent-encoded and decoded intact
#[tokio::test]
async fn tc_http_002_agent_ids_are_encoded() {
    let (service, recorder) = start_server().await;
    let agent = AgentKey::new("2024-05-06_2024-05-12", "UN", "Иванов Иван/2");

    service.calls(&agent).await.unwrap();

    assert_eq!(
        recorder.requests(),
        vec!["calls 2024-05-06_2024-05-12 UN Иванов Иван/2"]
    );
}

/// TC-HTTP-003: Status document with per-stage errors and null stages
#[tokio::test]
async fn tc_http_003_status_document() {
    let (service, _recorder) = start_server().await;

    let status = service.status().await.unwrap();

    assert!(status.transcribe.running);
    assert_eq!(status.transcribe.progress, "3/10");
    assert_eq!(status.analyze.error.as_deref(), Some("model timeout"));
    assert!(!status.report.running);
    assert_eq!(status.running_stage(), Some(Stage::Transcribe));
}

/// TC-HTTP-004: Trigger acknowledgments
#[tokio::test]
async fn tc_http_004_stage_triggers() {
    let (service, recorder) = start_server().await;

    // Empty body: implicit
    let ack = service.trigger_stage(Stage::Fetch).await.unwrap();
    assert_eq!(ack.kind(), AckKind::Implicit);

    // 409: rejected
    let rejected = service.trigger_stage(Stage::Transcribe).await;
    match rejected {
        Err(JobServiceError::Rejected(reason)) => assert_eq!(reason, "already running"),
        other => panic!("expected Rejected, got {other:?}"),
    }

    // Explicit status
    let ack = service.trigger_stage(Stage::Analyze).await.unwrap();
    assert_eq!(ack.kind(), AckKind::Accepted);

    // Non-JSON body: implicit
    let ack = service.trigger_stage(Stage::Report).await.unwrap();
    assert_eq!(ack.kind(), AckKind::Implicit);

    assert_eq!(
        recorder.requests(),
        vec![
            "POST sync",
            "POST transcribe",
            "POST analyze",
            "POST generatereport"
        ]
    );
}

/// TC-HTTP-005: Agent analysis request body and exists/accepted answers
#[tokio::test]
async fn tc_http_005_agent_analysis() {
    let (service, recorder) = start_server().await;

    let first = service.trigger_agent_analysis(&volkov(), false).await.unwrap();
    let second = service.trigger_agent_analysis(&volkov(), true).await.unwrap();

    assert_eq!(first.status, AgentAnalysisStatus::Exists);
    assert_eq!(first.message.as_deref(), Some("report exists"));
    assert_eq!(second.status, AgentAnalysisStatus::Accepted);

    let bodies = recorder.bodies.lock().unwrap().clone();
    assert_eq!(
        bodies[0],
        json!({
            "week": "2024-05-06_2024-05-12",
            "company": "UN",
            "manager": "Volkov_Ivan",
            "force": false
        })
    );
    assert_eq!(bodies[1]["force"], json!(true));
}

/// TC-HTTP-006: Report fetch carries a cache buster; 404 means not generated
#[tokio::test]
async fn tc_http_006_report_fetch() {
    let (service, recorder) = start_server().await;

    let report = service.report(&volkov()).await.unwrap();
    assert_eq!(report.as_deref(), Some("# Weekly report\n\nScore: 7/10"));

    let missing = service
        .report(&AgentKey::new("2024-05-06_2024-05-12", "UN", "Petrova_Anna"))
        .await
        .unwrap();
    assert_eq!(missing, None);

    assert_eq!(
        recorder.requests(),
        vec!["report Volkov_Ivan t=true", "report Petrova_Anna t=true"]
    );
}

/// TC-HTTP-007: Transcript and audio
#[tokio::test]
async fn tc_http_007_transcript_and_audio() {
    let (service, _recorder) = start_server().await;
    let agent = volkov();

    let text = service.transcript(&agent.call("a.mp3")).await.unwrap();
    assert_eq!(text.as_deref(), Some("Hello, this is Ivan."));
    assert_eq!(service.transcript(&agent.call("b.mp3")).await.unwrap(), None);

    let chunks: Vec<_> = service
        .audio_stream(&agent.call("a.mp3"))
        .await
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    let bytes: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
    assert_eq!(bytes, vec![0x49, 0x44, 0x33, 0x04, 0x00]);
}

/// TC-HTTP-008: Prompts round-trip keeps fields the client does not know
#[tokio::test]
async fn tc_http_008_prompts_keep_unknown_fields() {
    let (service, recorder) = start_server().await;

    let mut prompts = service.prompts().await.unwrap();
    assert_eq!(prompts.companies["UN"].name, "Union");
    prompts.set_company_prompt("UN", "Check greeting and closing.".to_string());
    service.save_prompts(&prompts).await.unwrap();

    let stored = recorder.prompts.lock().unwrap().clone();
    assert_eq!(stored["version"], json!(3));
    assert_eq!(stored["companies"]["UN"]["tone"], json!("formal"));
    assert_eq!(
        stored["companies"]["UN"]["prompt"],
        json!("Check greeting and closing.")
    );
}

/// TC-HTTP-009: Unreachable service is a network error
#[tokio::test]
async fn tc_http_009_unreachable_service() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let service = HttpJobService::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();

    assert!(matches!(
        service.status().await,
        Err(JobServiceError::Network(_))
    ));
}
