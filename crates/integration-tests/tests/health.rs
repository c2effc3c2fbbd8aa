//! Probes and request id propagation.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::body::Body;
use axum::http::{Request, StatusCode};

use pagora_checkout::middleware::REQUEST_ID_HEADER;
use pagora_checkout::testing::TestApp;
use pagora_integration_tests::send;

#[tokio::test]
async fn test_liveness_and_readiness() {
    let app = TestApp::new();
    let router = app.router();

    let live = send(&router, Request::get("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(live.status, StatusCode::OK);

    let ready = send(&router, Request::get("/health/ready").body(Body::empty()).unwrap()).await;
    assert_eq!(ready.status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let app = TestApp::new();
    let request = Request::get("/health")
        .header(REQUEST_ID_HEADER, "edge-7f3a.91")
        .body(Body::empty())
        .unwrap();

    let response = send(&app.router(), request).await;

    assert_eq!(response.headers[REQUEST_ID_HEADER], "edge-7f3a.91");
}

#[tokio::test]
async fn test_request_id_generated_when_unsafe() {
    let app = TestApp::new();
    let request = Request::get("/health")
        .header(REQUEST_ID_HEADER, "bad id with spaces")
        .body(Body::empty())
        .unwrap();

    let response = send(&app.router(), request).await;

    let generated = response.headers[REQUEST_ID_HEADER].to_str().unwrap();
    assert_ne!(generated, "bad id with spaces");
    assert!(uuid::Uuid::parse_str(generated).is_ok());
}

#[tokio::test]
async fn test_responses_are_not_cached() {
    let app = TestApp::new();
    let response = send(
        &app.router(),
        Request::get("/health").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(response.headers["cache-control"], "no-store");
}
