//! Shared test utilities for resbus API tests.

// Allow dead_code because helpers are used across different test files,
// but each test binary is analyzed independently.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{HeaderMap, Request, StatusCode};
use tower::ServiceExt;

use resbus_api::http::{create_router, AppState};
use resbus_storage::MemoryResourceStore;

/// Mount prefix used by all API tests.
pub const BASE_PATH: &str = "/asdf/qwer";

/// Create a test app with in-memory storage mounted at `BASE_PATH`.
pub fn create_test_app(store: &Arc<MemoryResourceStore>) -> axum::Router {
    create_router(AppState::new(Arc::clone(store), BASE_PATH))
}

/// Send a request and return status, headers and body text.
pub async fn send(
    app: axum::Router,
    method: &str,
    uri: &str,
    body: &[u8],
) -> (StatusCode, HeaderMap, String) {
    send_with_content_type(app, method, uri, None, body).await
}

/// Send a request with an explicit Content-Type header.
pub async fn send_with_content_type(
    app: axum::Router,
    method: &str,
    uri: &str,
    content_type: Option<&str>,
    body: &[u8],
) -> (StatusCode, HeaderMap, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(content_type) = content_type {
        builder = builder.header("content-type", content_type);
    }
    let response = app
        .oneshot(builder.body(Body::from(body.to_vec())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, String::from_utf8_lossy(&bytes).to_string())
}

/// Wait until the mock server has recorded at least `count` requests.
///
/// Hook deliveries are detached tasks, so tests have to wait for them to
/// land instead of asserting immediately.
pub async fn wait_for_requests(
    server: &wiremock::MockServer,
    count: usize,
) -> Vec<wiremock::Request> {
    for _ in 0..200 {
        if let Some(requests) = server.received_requests().await {
            if requests.len() >= count {
                return requests;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected at least {count} requests at the mock server");
}
