//! Integration tests for the stream routes.

mod common;

use axum::http::StatusCode;
use serde_json::json;

#[tokio::test]
async fn test_append_then_fold_aggregate_round_trip() {
    // Arrange
    let (app, _store) = common::build_test_app();

    // Act
    let appended = common::append(
        app.clone(),
        "a-1",
        json!([
            {"event_type": "Opened", "data": {"owner": "ada"}},
            {"event_type": "Deposited", "data": {"balance": 10}}
        ]),
    )
    .await;
    let (status, json) = common::get_json(app, "/api/v1/streams/account/a-1").await;

    // Assert
    assert_eq!(appended["event_ids"].as_array().unwrap().len(), 2);
    assert_eq!(appended["version"], 2);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["key"]["aggregate_type"], "account");
    assert_eq!(json["key"]["aggregate_id"], "a-1");
    assert_eq!(json["version"], 2);
    assert_eq!(json["state"]["owner"], "ada");
    assert_eq!(json["state"]["balance"], 10);
}

#[tokio::test]
async fn test_get_aggregate_at_earlier_version() {
    let (app, _store) = common::build_test_app();
    common::append(
        app.clone(),
        "a-1",
        json!([
            {"event_type": "Deposited", "data": {"balance": 10}},
            {"event_type": "Deposited", "data": {"balance": 25}}
        ]),
    )
    .await;

    let (status, json) = common::get_json(app, "/api/v1/streams/account/a-1?version=1").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["version"], 1);
    assert_eq!(json["state"]["balance"], 10);
}

#[tokio::test]
async fn test_stale_expected_version_returns_409() {
    // Arrange
    let (app, _store) = common::build_test_app();
    common::append(app.clone(), "a-1", json!([{"event_type": "Opened", "data": {}}])).await;

    // Act
    let (status, json) = common::post_json(
        app,
        "/api/v1/streams/account/a-1/events",
        &json!({
            "events": [{"event_type": "Deposited", "data": {"balance": 5}}],
            "expected_version": 0
        }),
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "concurrency_conflict");
    assert!(json["message"].as_str().unwrap().contains("expected version 0"));
}

#[tokio::test]
async fn test_matching_expected_version_appends() {
    let (app, _store) = common::build_test_app();
    common::append(app.clone(), "a-1", json!([{"event_type": "Opened", "data": {}}])).await;

    let (status, json) = common::post_json(
        app,
        "/api/v1/streams/account/a-1/events",
        &json!({
            "events": [{"event_type": "Deposited", "data": {"balance": 5}}],
            "expected_version": 1
        }),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["version"], 2);
}

#[tokio::test]
async fn test_get_nonexistent_aggregate_returns_404() {
    let (app, _store) = common::build_test_app();

    let (status, json) = common::get_json(app, "/api/v1/streams/account/missing").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "aggregate_not_found");
    assert_eq!(json["message"], "aggregate not found: account/missing");
}

#[tokio::test]
async fn test_stream_events_honor_version_range_and_limit() {
    // Arrange
    let (app, _store) = common::build_test_app();
    common::append(
        app.clone(),
        "a-1",
        json!([
            {"event_type": "Opened", "data": {}},
            {"event_type": "Deposited", "data": {"balance": 10}},
            {"event_type": "Deposited", "data": {"balance": 20}},
            {"event_type": "Deposited", "data": {"balance": 30}}
        ]),
    )
    .await;

    // Act
    let (status, json) = common::get_json(
        app,
        "/api/v1/streams/account/a-1/events?from_version=2&to_version=4&limit=2",
    )
    .await;

    // Assert
    assert_eq!(status, StatusCode::OK);
    let versions: Vec<i64> = json
        .as_array()
        .unwrap()
        .iter()
        .map(|event| event["aggregate_version"].as_i64().unwrap())
        .collect();
    assert_eq!(versions, vec![2, 3]);
}

#[tokio::test]
async fn test_manual_snapshot_is_created_and_readable() {
    // Arrange
    let (app, _store) = common::build_test_app();
    common::append(
        app.clone(),
        "a-1",
        json!([
            {"event_type": "Opened", "data": {"owner": "ada"}},
            {"event_type": "Deposited", "data": {"balance": 10}}
        ]),
    )
    .await;

    // Act
    let (created_status, created) =
        common::send(app.clone(), "POST", "/api/v1/streams/account/a-1/snapshot", None).await;
    let (status, json) = common::get_json(app, "/api/v1/streams/account/a-1/snapshot").await;

    // Assert
    assert_eq!(created_status, StatusCode::CREATED);
    assert_eq!(created["version"], 2);
    assert_eq!(created["metadata"]["reason"], "manual");
    assert_eq!(created["data"]["balance"], 10);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], created["id"]);
}

#[tokio::test]
async fn test_snapshot_of_unknown_stream_returns_404() {
    let (app, _store) = common::build_test_app();

    let (status, json) =
        common::send(app, "POST", "/api/v1/streams/account/missing/snapshot", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "stream_not_found");
}

#[tokio::test]
async fn test_missing_snapshot_returns_404() {
    let (app, _store) = common::build_test_app();
    common::append(app.clone(), "a-1", json!([{"event_type": "Opened", "data": {}}])).await;

    let (status, json) = common::get_json(app, "/api/v1/streams/account/a-1/snapshot").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "snapshot_not_found");
}

#[tokio::test]
async fn test_append_after_shutdown_returns_503() {
    let (app, store) = common::build_test_app();
    store.shutdown().await;

    let (status, json) = common::post_json(
        app,
        "/api/v1/streams/account/a-1/events",
        &json!({"events": [{"event_type": "Opened", "data": {}}]}),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "shutting_down");
}
