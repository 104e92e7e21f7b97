//! HTTP API tests, driven through the router without a socket

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use shipyard::server::serve::router;
use shipyard::webhook::gateway::{sign, SIGNATURE_HEADER};
use tower::ServiceExt;

use crate::common::Harness;

fn app(h: &Harness) -> Router {
    router(Arc::new(h.app.server_state()))
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new();
    let (status, body) = call(&app(&h), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_project_registration_validates_input() {
    let h = Harness::new();
    let app = app(&h);

    let (status, _) = call(
        &app,
        json_request("PUT", "/projects/alice/.hidden", json!({"kind": "custom_composition"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        json_request("PUT", "/projects/Alice/blog", json!({"kind": "custom_composition"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        json_request("PUT", "/projects/alice/blog", json!({"kind": "templated"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        json_request(
            "PUT",
            "/projects/alice/blog",
            json!({"kind": "templated", "template": "static-site"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["template"], "static-site");

    let (status, _) = call(&app, get("/projects/alice/blog")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_autodeploy_requires_project() {
    let h = Harness::new();
    let (status, body) = call(
        &app(&h),
        json_request("POST", "/projects/alice/ghost/autodeploy/polling", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("alice/ghost"));
}

#[tokio::test]
async fn test_polling_configuration() {
    let h = Harness::new();
    h.add_project("alice", "blog", crate::common::templated());
    let app = app(&h);

    let (status, body) = call(
        &app,
        json_request(
            "POST",
            "/projects/alice/blog/autodeploy/polling",
            json!({"branch": "prod", "interval_minutes": 15}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["polling_enabled"], true);
    assert_eq!(body["branch"], "prod");
    assert_eq!(body["interval_minutes"], 15);

    let (status, body) = call(
        &app,
        json_request(
            "PUT",
            "/projects/alice/blog/autodeploy/interval",
            json!({"interval_minutes": 7}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["interval_minutes"], 5);
    assert_eq!(body["branch"], "prod");
}

#[tokio::test]
async fn test_webhook_route_checks_signature() {
    let h = Harness::new();
    h.add_project("alice", "blog", crate::common::templated());
    let app = app(&h);

    let (status, body) = call(
        &app,
        json_request("POST", "/projects/alice/blog/autodeploy/webhook", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let secret = body["secret"].as_str().unwrap().to_string();
    let path = body["webhook_path"].as_str().unwrap().to_string();

    let payload = br#"{"ref":"refs/heads/main"}"#;
    let forged = Request::builder()
        .method("POST")
        .uri(&path)
        .header(SIGNATURE_HEADER, sign(b"guess", payload).unwrap())
        .body(Body::from(&payload[..]))
        .unwrap();
    let (status, _) = call(&app, forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(h.git.pulls(), 0);

    let signed = Request::builder()
        .method("POST")
        .uri(&path)
        .header(SIGNATURE_HEADER, sign(secret.as_bytes(), payload).unwrap())
        .body(Body::from(&payload[..]))
        .unwrap();
    let (status, body) = call(&app, signed).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["accepted"], true);
}

#[tokio::test]
async fn test_manual_deploy_and_history() {
    let h = Harness::new();
    h.add_project("alice", "blog", crate::common::templated());
    h.git.push_upstream("abc1234");
    let app = app(&h);

    let (status, body) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/projects/alice/blog/deploy")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "completed");

    let (status, body) = call(&app, get("/projects/alice/blog/deployments?limit=500")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["deployments"][0]["trigger"], "manual");
    assert_eq!(body["deployments"][0]["status"], "success");
}

#[tokio::test]
async fn test_service_address() {
    let h = Harness::new();
    h.add_project("alice", "blog", crate::common::templated());

    let (status, body) = call(&app(&h), get("/projects/alice/blog/services/web/address")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["container"], "alice_blog-web");
    assert!(body["ip"].is_null());
}
