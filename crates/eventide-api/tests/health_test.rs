//! Integration tests for the health and metrics endpoints.

mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_health_returns_200_with_status_ok() {
    let (app, _store) = common::build_test_app();

    let (status, json) = common::get_json(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(json["version"].is_string());
    assert_eq!(json["fanout_backlog"], 0);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _store) = common::build_test_app();

    let status = common::status_of(app, "GET", "/api/v1/nonexistent").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_reflect_appended_events() {
    // Arrange
    let (app, _store) = common::build_test_app();
    common::append(
        app.clone(),
        "a-1",
        json!([{"event_type": "Opened", "data": {}}, {"event_type": "Deposited", "data": {"balance": 10}}]),
    )
    .await;
    common::append(app.clone(), "a-2", json!([{"event_type": "Opened", "data": {}}])).await;

    // Act
    let (status, json) = common::get_json(app, "/metrics").await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total_events"], 3);
    assert_eq!(json["active_streams"], 2);
    assert_eq!(json["replication_lag"], 0);
    assert!(json["storage_size"].as_u64().unwrap() > 0);
}
