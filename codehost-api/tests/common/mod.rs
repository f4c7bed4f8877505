//! Common test utilities and helpers for codehost-api tests
//!
//! Wraps the orchestrator test harness (in-memory SQLite, mock engine) in an
//! axum app and offers request helpers for the tests.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    Router,
};
use codehost_orchestrator::test_utils::TestHarness;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceExt; // for `oneshot`

pub struct TestClient {
    pub harness: TestHarness,
    pub app: Router,
}

impl TestClient {
    pub async fn new() -> Self {
        let harness = TestHarness::new().await;
        let app = codehost_api::create_app(harness.orchestrator.clone());
        Self { harness, app }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request")
    }

    pub async fn get(&self, uri: &str, user: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("GET")
                .uri(uri)
                .header("x-user", user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn post(&self, uri: &str, user: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("x-user", user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn delete(&self, uri: &str, user: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .header("x-user", user)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn send_json(&self, method: &str, uri: &str, user: &str, body: Value) -> Response<Body> {
        self.send(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .header("x-user", user)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    /// Create a workspace through the API and return its id.
    pub async fn create_workspace(&self, user: &str, name: &str, start: bool) -> i64 {
        let response = self
            .send_json(
                "POST",
                "/api/v1/workspaces",
                user,
                json!({ "name": name, "project_id": 1, "tech": "react", "start": start }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let body: Value = extract_json_body(response).await;
        body["id"].as_i64().expect("workspace id")
    }
}

/// Extract JSON body from response
pub async fn extract_json_body<T: DeserializeOwned>(response: Response<Body>) -> T {
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body_bytes).expect("Failed to parse JSON response")
}
