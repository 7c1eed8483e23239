//! Integration tests for the subscription routes.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use eventide_engine::SubscriptionSpec;
use eventide_test_support::RecordingSubscriptionHandler;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn test_list_and_get_subscription() {
    // Arrange
    let (app, store) = common::build_test_app();
    let id = store
        .subscribe(
            SubscriptionSpec::new(Arc::new(RecordingSubscriptionHandler::new()))
                .event_types(["Opened"]),
        )
        .await
        .unwrap();

    // Act
    let (list_status, list) = common::get_json(app.clone(), "/api/v1/subscriptions").await;
    let (status, json) = common::get_json(app, &format!("/api/v1/subscriptions/{id}")).await;

    // Assert
    assert_eq!(list_status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], id.to_string());
    assert_eq!(json["status"], "active");
    assert_eq!(json["event_types"], json!(["Opened"]));
    assert_eq!(json["position"], 0);
}

#[tokio::test]
async fn test_reset_recovers_errored_subscription() {
    // Arrange
    let (app, store) = common::build_test_app();
    let handler = Arc::new(RecordingSubscriptionHandler::new());
    let id = store
        .subscribe(SubscriptionSpec::new(handler.clone()).max_retries(1))
        .await
        .unwrap();
    common::append(app.clone(), "a-1", json!([{"event_type": "Opened", "data": {}}])).await;
    handler.set_failing(true);
    store.tick_subscriptions().await;
    let (_, errored) = common::get_json(app.clone(), &format!("/api/v1/subscriptions/{id}")).await;
    handler.set_failing(false);

    // Act
    let (status, json) =
        common::send(app, "POST", &format!("/api/v1/subscriptions/{id}/reset"), None).await;
    store.tick_subscriptions().await;

    // Assert
    assert_eq!(errored["status"], "error");
    assert_eq!(errored["error_count"], 1);
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "active");
    assert_eq!(json["error_count"], 0);
    assert_eq!(handler.batches().len(), 1);
}

#[tokio::test]
async fn test_pause_and_resume_subscription() {
    let (app, store) = common::build_test_app();
    let id = store
        .subscribe(SubscriptionSpec::new(Arc::new(RecordingSubscriptionHandler::new())))
        .await
        .unwrap();

    let (paused_status, paused) =
        common::send(app.clone(), "POST", &format!("/api/v1/subscriptions/{id}/pause"), None)
            .await;
    let (resumed_status, resumed) = common::send(
        app.clone(),
        "POST",
        &format!("/api/v1/subscriptions/{id}/resume"),
        None,
    )
    .await;
    let (again_status, again) =
        common::send(app, "POST", &format!("/api/v1/subscriptions/{id}/resume"), None).await;

    assert_eq!(paused_status, StatusCode::OK);
    assert_eq!(paused["status"], "paused");
    assert_eq!(resumed_status, StatusCode::OK);
    assert_eq!(resumed["status"], "active");
    assert_eq!(again_status, StatusCode::BAD_REQUEST);
    assert_eq!(again["error"], "validation_error");
}

#[tokio::test]
async fn test_delete_subscription_returns_204_then_404() {
    let (app, store) = common::build_test_app();
    let id = store
        .subscribe(SubscriptionSpec::new(Arc::new(RecordingSubscriptionHandler::new())))
        .await
        .unwrap();

    let (status, body) =
        common::send(app.clone(), "DELETE", &format!("/api/v1/subscriptions/{id}"), None).await;
    let (missing_status, missing) =
        common::get_json(app, &format!("/api/v1/subscriptions/{id}")).await;

    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    assert_eq!(missing_status, StatusCode::NOT_FOUND);
    assert_eq!(missing["error"], "subscription_not_found");
}

#[tokio::test]
async fn test_reset_unknown_subscription_returns_404() {
    let (app, _store) = common::build_test_app();

    let (status, json) = common::send(
        app,
        "POST",
        &format!("/api/v1/subscriptions/{}/reset", Uuid::new_v4()),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"], "subscription_not_found");
}

#[tokio::test]
async fn test_malformed_subscription_id_returns_400() {
    let (app, _store) = common::build_test_app();

    let status = common::status_of(app, "GET", "/api/v1/subscriptions/not-a-uuid").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}
