//! Shared test helpers for API integration tests.
#![allow(dead_code)]

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, TimeZone, Utc};
use eventide_engine::{ConsistencyLevel, EngineConfig, EventStore, EventStoreBuilder};
use eventide_test_support::FixedClock;
use http_body_util::BodyExt;
use tower::ServiceExt;

use eventide_api::build_router;
use eventide_api::state::AppState;

/// Fixed timestamp used across all integration tests.
pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
}

/// Engine configuration for route tests: strong consistency so read models
/// reflect an append as soon as its request returns.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        consistency_level: ConsistencyLevel::Strong,
        ..EngineConfig::default()
    }
}

/// Builder with a deterministic clock and the test configuration.
pub fn test_builder() -> EventStoreBuilder {
    EventStore::builder(test_config()).with_clock(Arc::new(FixedClock(fixed_now())))
}

/// Build the full app router over an in-memory store. Uses the same route
/// structure as `main.rs`.
pub fn build_test_app() -> (Router, Arc<EventStore>) {
    build_test_app_with(test_builder())
}

/// Build the full app router over a store built from `builder`.
pub fn build_test_app_with(builder: EventStoreBuilder) -> (Router, Arc<EventStore>) {
    let store = builder.build().unwrap();
    let app = build_router(AppState::new(Arc::clone(&store)));
    (app, store)
}

/// Send a request and return the status with the JSON body, or `Null` for
/// an empty body.
pub async fn send(
    app: Router,
    method: &str,
    uri: &str,
    body: Option<&serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap()
    };

    (status, json)
}

/// Send a POST request with a JSON body and return the response.
pub async fn post_json(
    app: Router,
    uri: &str,
    body: &serde_json::Value,
) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri, Some(body)).await
}

/// Send a GET request and return the response.
pub async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri, None).await
}

/// Send a request and return only the status. For responses whose body is
/// not JSON, such as extractor rejections.
pub async fn status_of(app: Router, method: &str, uri: &str) -> StatusCode {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    app.oneshot(request).await.unwrap().status()
}

/// Appends events to `account/{id}` through the API.
pub async fn append(app: Router, aggregate_id: &str, events: serde_json::Value) -> serde_json::Value {
    let (status, json) = post_json(
        app,
        &format!("/api/v1/streams/account/{aggregate_id}/events"),
        &serde_json::json!({ "events": events }),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "append failed: {json}");
    json
}
