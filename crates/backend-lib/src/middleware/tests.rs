use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    Router,
};
use base64::Engine as _;
use repogate_common::{HealthStatus, BASE64};
use tower::ServiceExt;

use super::auth::{is_insecure, request_host};
use crate::auth::{
    AuthGateway, CredentialCodec, CredentialStore, GatewayOptions, MemoryCredentialStore,
    ResourceLimiter, WILDCARD_HOST,
};
use crate::config::Settings;
use crate::router::create_router;
use crate::AppState;

const FAST: CredentialCodec = CredentialCodec::with_params(64, 1, 1);

async fn test_app() -> (Router, Arc<AuthGateway>) {
    let store = MemoryCredentialStore::new();
    store.add_host(WILDCARD_HOST, b"pepper".to_vec());
    let limiter = ResourceLimiter::new(1024 * 1024, FAST.expected_cost()).unwrap();
    let gateway =
        AuthGateway::new(Arc::new(store), FAST, limiter, GatewayOptions::default()).unwrap();
    gateway
        .provision(WILDCARD_HOST, "alice", b"s3cr:et")
        .await
        .unwrap();

    let gateway = Arc::new(gateway);
    let state = AppState::with_gateway(Arc::clone(&gateway), Settings::default());
    (create_router(Arc::new(state)), gateway)
}

fn basic(credentials: &str) -> String {
    format!("Basic {}", BASE64.encode(credentials))
}

fn auth_request(method: Method, credentials: Option<&str>, proto: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri("/auth")
        .header(header::HOST, "repo.example.com")
        .header("x-forwarded-proto", proto);
    if let Some(credentials) = credentials {
        builder = builder.header(header::AUTHORIZATION, basic(credentials));
    }
    builder.body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_is_public() {
    let (app, _) = test_app().await;
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let health: HealthStatus = serde_json::from_slice(&body).unwrap();
    assert_eq!(health.status, "ok");
    assert_eq!(health.hosts, 0);
}

#[tokio::test]
async fn test_missing_credentials_are_challenged() {
    let (app, _) = test_app().await;
    let response = app
        .oneshot(auth_request(Method::GET, None, "https"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn test_valid_credentials_pass() {
    let (app, _) = test_app().await;
    for method in [Method::GET, Method::PUT] {
        let response = app
            .clone()
            .oneshot(auth_request(method, Some("alice:s3cr:et"), "https"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let (app, _) = test_app().await;
    let response = app
        .oneshot(auth_request(Method::PUT, Some("alice:s3cr"), "https"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_plain_http_invalidates_credential() {
    let (app, gateway) = test_app().await;
    let response = app
        .clone()
        .oneshot(auth_request(Method::PUT, Some("alice:s3cr:et"), "http"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(gateway.store().lookup("repo.example.com", "alice").await.is_none());

    // Without the settled verdict only the store can answer.
    gateway.sweep();
    let response = app
        .oneshot(auth_request(Method::PUT, Some("alice:s3cr:et"), "https"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn test_request_host_prefers_forwarded_host() {
    let mut headers = HeaderMap::new();
    assert_eq!(request_host(&headers), None);

    headers.insert(header::HOST, HeaderValue::from_static("internal:8080"));
    assert_eq!(request_host(&headers).as_deref(), Some("internal:8080"));

    headers.insert("x-forwarded-host", HeaderValue::from_static("repo.example.com, proxy"));
    assert_eq!(request_host(&headers).as_deref(), Some("repo.example.com"));
}

#[test]
fn test_insecure_transport_detection() {
    let mut headers = HeaderMap::new();
    assert!(!is_insecure(&headers));
    headers.insert("x-forwarded-proto", HeaderValue::from_static("HTTP"));
    assert!(is_insecure(&headers));
    headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
    assert!(!is_insecure(&headers));
}
