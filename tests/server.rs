//! HTTP API tests, driving the router in-process with `tower::ServiceExt`.

mod common;

use std::fs;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use campus_knowledge::config::Config;
use campus_knowledge::prompts::REFUSAL;
use campus_knowledge::server::{router, AppState};
use campus_knowledge::services::Services;
use common::{HashEmbedder, ScriptedModel};

const LIBRARY_FACT: &str = "The library is open from 9 AM to 7 PM.";

async fn setup() -> (TempDir, Router) {
    let tmp = TempDir::new().unwrap();
    let config = Config::minimal(tmp.path().join("cke.sqlite"));
    let services = Services::with_models(
        &config,
        HashEmbedder::new(64),
        ScriptedModel::grounded(&[LIBRARY_FACT]),
    )
    .await
    .unwrap();

    let doc = tmp.path().join("library.txt");
    fs::write(&doc, LIBRARY_FACT).unwrap();
    services.ingestor().ingest(&doc).await.unwrap();

    let app = router(AppState::from_services(&services).unwrap());
    (tmp, app)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let (_tmp, app) = setup().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn chat_answers_and_history_round_trips() {
    let (_tmp, app) = setup().await;

    let (status, body) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "session_id": "web-1", "message": "What are the library hours?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session_id"], "web-1");
    assert_eq!(body["outcome"], "answered");
    assert_eq!(body["text"], LIBRARY_FACT);

    let (status, body) = send(&app, "GET", "/sessions/web-1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "human");
    assert_eq!(messages[1]["role"], "assistant");

    let (status, body) = send(&app, "DELETE", "/sessions/web-1/history", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 2);

    let (_, body) = send(&app, "GET", "/sessions/web-1/history", None).await;
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn chat_refuses_off_domain_questions() {
    let (_tmp, app) = setup().await;
    let (status, body) = send(
        &app,
        "POST",
        "/chat",
        Some(json!({ "message": "Who is Virat Kohli?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "refused");
    assert_eq!(body["text"], REFUSAL);
    assert!(!body["session_id"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn chat_rejects_empty_message() {
    let (_tmp, app) = setup().await;
    let (status, body) = send(&app, "POST", "/chat", Some(json!({ "message": "   " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn register_then_login_returns_the_same_session() {
    let (_tmp, app) = setup().await;
    let user = json!({
        "first_name": "Asha",
        "last_name": "Rao",
        "email": "Asha@Example.edu",
        "password": "hunter22"
    });

    let (status, registered) = send(&app, "POST", "/users", Some(user.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", "/users", Some(user)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, login) = send(
        &app,
        "POST",
        "/login",
        Some(json!({ "email": "asha@example.edu", "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(login["session_id"], registered["session_id"]);
    assert_eq!(login["user"]["first_name"], "Asha");

    let (status, body) = send(
        &app,
        "POST",
        "/login",
        Some(json!({ "email": "asha@example.edu", "password": "wrong-password" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn register_validates_input() {
    let (_tmp, app) = setup().await;
    let (status, body) = send(
        &app,
        "POST",
        "/users",
        Some(json!({
            "first_name": "Asha",
            "last_name": "Rao",
            "email": "asha@example.edu",
            "password": "123"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("password"));
}

#[tokio::test]
async fn ingest_endpoint_reports_per_file() {
    let (tmp, app) = setup().await;
    let fees = tmp.path().join("fees.txt");
    fs::write(&fees, "Fees are due by 31 July.").unwrap();
    let sheet = tmp.path().join("marks.xlsx");
    fs::write(&sheet, "binary").unwrap();

    let (status, body) = send(
        &app,
        "POST",
        "/ingest",
        Some(json!({ "paths": [fees, sheet] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let files = body["files"].as_array().unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[0]["status"], "ingested");
    assert_eq!(files[0]["chunks"], 1);
    assert_eq!(files[1]["status"], "skipped");

    let (status, body) = send(&app, "POST", "/ingest", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}
