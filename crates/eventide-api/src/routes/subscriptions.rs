//! Subscription status and operator controls.
//!
//! Subscriptions are created in-process with their handlers; this surface
//! only inspects and steers them.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get, routing::post};
use eventide_engine::SubscriptionInfo;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ApiError, Resource};
use crate::state::AppState;

/// GET /
async fn list_subscriptions(State(state): State<AppState>) -> Json<Vec<SubscriptionInfo>> {
    Json(state.store.list_subscriptions().await)
}

/// GET /{id}
async fn get_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    state
        .store
        .get_subscription(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(Resource::Subscription, id))
}

/// POST /{id}/pause
#[instrument(skip(state))]
async fn pause_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    Ok(Json(state.store.pause_subscription(id).await?))
}

/// POST /{id}/resume
#[instrument(skip(state))]
async fn resume_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    Ok(Json(state.store.resume_subscription(id).await?))
}

/// POST /{id}/reset - clears the error state
#[instrument(skip(state))]
async fn reset_subscription(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionInfo>, ApiError> {
    let info = state.store.reset_subscription(id).await?;
    info!(subscription_id = %id, "subscription reset by operator");
    Ok(Json(info))
}

/// DELETE /{id}
#[instrument(skip(state))]
async fn unsubscribe(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.store.unsubscribe(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Returns the router for subscriptions.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_subscriptions))
        .route("/{id}", get(get_subscription).delete(unsubscribe))
        .route("/{id}/pause", post(pause_subscription))
        .route("/{id}/resume", post(resume_subscription))
        .route("/{id}/reset", post(reset_subscription))
}
