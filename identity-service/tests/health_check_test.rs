mod common;

use axum::http::{Method, StatusCode};
use common::TestApp;

#[tokio::test]
async fn health_check_reports_dependencies() {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");
    assert_eq!(res.body["service"], "identity-service");
    assert_eq!(res.body["checks"]["postgres"], "up");
    assert_eq!(res.body["checks"]["redis"], "up");
}

#[tokio::test]
async fn health_check_without_redis_is_degraded_but_healthy() {
    let app = TestApp::without_redis();

    let res = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["checks"]["redis"], "disabled");
}

#[tokio::test]
async fn responses_carry_security_headers_and_request_id() {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(res.header("x-content-type-options"), Some("nosniff"));
    assert!(res.header("x-request-id").is_some());
}

#[tokio::test]
async fn metrics_without_recorder_is_not_enabled() {
    let app = TestApp::new();

    let res = app.request(Method::GET, "/metrics", None, None).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.error(), "Metrics is not enabled");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let app = TestApp::new();

    let res = app
        .request(Method::GET, "/.well-known/openapi.json", None, None)
        .await;
    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["paths"]["/auth/register"].is_object());
    assert!(res.body["paths"]["/orgs/{org_id}/members/{user_id}"].is_object());
}
