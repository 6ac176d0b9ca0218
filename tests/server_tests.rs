mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use common::classifier_open_on;
use lan_probe_rs::config::ScanConfig;
use lan_probe_rs::netdetect::AddressSource;
use lan_probe_rs::server::{router, AppState, LocalAddresses, Status};
use lan_probe_rs::types::{PortState, ScanReport};
use tower::ServiceExt;

fn app(sources: Vec<Arc<dyn AddressSource>>) -> Router {
    router(AppState::new(classifier_open_on(&[80]), ScanConfig::default(), sources))
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Vec<u8>) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, json: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(json.to_string()))
        .unwrap()
}

#[tokio::test]
async fn status_starts_idle_and_results_empty() {
    let app = app(Vec::new());
    let (code, body) = send(&app, get("/api/status")).await;
    assert_eq!(code, StatusCode::OK);
    let status: Status = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.state, "idle");

    let (code, _) = send(&app, get("/api/results")).await;
    assert_eq!(code, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn bad_prefix_is_rejected_before_scanning() {
    let app = app(Vec::new());
    let (code, _) = send(&app, post_json("/api/scan", r#"{"prefix":"192.168.1"}"#)).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, get("/api/status")).await;
    let status: Status = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.state, "idle");
}

#[tokio::test]
async fn unusable_port_text_is_rejected() {
    let app = app(Vec::new());
    let (code, _) = send(&app, post_json("/api/scan", r#"{"host":"127.0.0.1","ports":"abc,0"}"#)).await;
    assert_eq!(code, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn host_scan_runs_to_completion() {
    let app = app(Vec::new());
    let (code, body) = send(
        &app,
        post_json("/api/scan", r#"{"host":"127.0.0.1","ports":"22,80","timeout_ms":50}"#),
    )
    .await;
    assert_eq!(code, StatusCode::ACCEPTED);
    let status: Status = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.state, "running");
    assert_eq!(status.total, 2);

    let mut report = None;
    for _ in 0..100 {
        let (code, body) = send(&app, get("/api/results")).await;
        if code == StatusCode::OK {
            report = Some(serde_json::from_slice::<ScanReport>(&body).unwrap());
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let report = report.expect("scan finished");
    assert_eq!(report.ports, vec![22, 80]);
    assert_eq!(report.open_count, 1);
    let findings = &report.hosts[0].findings;
    assert_eq!(findings[1].state, PortState::Open);

    let (_, body) = send(&app, get("/api/status")).await;
    let status: Status = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.state, "done");
    assert_eq!(status.completed, 2);
}

#[tokio::test]
async fn no_local_address_comes_with_a_hint() {
    let app = app(Vec::new());
    let (code, body) = send(&app, get("/api/local-addresses")).await;
    assert_eq!(code, StatusCode::OK);
    let found: LocalAddresses = serde_json::from_slice(&body).unwrap();
    assert!(found.addresses.is_empty());
    assert!(found.hint.is_some());
}
