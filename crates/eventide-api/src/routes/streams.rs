//! Routes for aggregate streams: append, read, fold and snapshot.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventide_core::event::{DomainEvent, NewEvent};
use eventide_core::snapshot::Snapshot;
use eventide_engine::{Aggregate, EventQuery};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ApiError, Resource};
use crate::state::AppState;

/// Request body for POST /{aggregate_type}/{aggregate_id}/events.
#[derive(Debug, Deserialize)]
pub struct AppendEventsRequest {
    /// Events to append, in order.
    pub events: Vec<NewEvent>,
    /// Version the caller last saw; omitted to skip the check.
    #[serde(default)]
    pub expected_version: Option<i64>,
}

/// Response body returned after events are appended.
#[derive(Debug, Serialize)]
pub struct AppendEventsResponse {
    /// IDs of the appended events.
    pub event_ids: Vec<Uuid>,
    /// Stream version after the append.
    pub version: i64,
}

/// Query parameters for GET /{aggregate_type}/{aggregate_id}.
#[derive(Debug, Deserialize)]
pub struct AggregateParams {
    /// Fold only up to this version.
    pub version: Option<i64>,
}

/// Query parameters for GET /{aggregate_type}/{aggregate_id}/events.
#[derive(Debug, Deserialize)]
pub struct StreamEventsParams {
    pub from_version: Option<i64>,
    pub to_version: Option<i64>,
    pub limit: Option<usize>,
}

/// POST /{aggregate_type}/{aggregate_id}/events
#[instrument(skip(state, request), fields(count = request.events.len()))]
async fn append_events(
    State(state): State<AppState>,
    Path((aggregate_type, aggregate_id)): Path<(String, String)>,
    Json(request): Json<AppendEventsRequest>,
) -> Result<(StatusCode, Json<AppendEventsResponse>), ApiError> {
    let appended = state
        .store
        .append_events(
            &aggregate_id,
            &aggregate_type,
            request.events,
            request.expected_version,
        )
        .await?;

    let version = match appended.last() {
        Some(event) => event.aggregate_version,
        None => state
            .store
            .get_events(&EventQuery::all().stream(&aggregate_type, &aggregate_id))
            .await
            .last()
            .map_or(0, |event| event.aggregate_version),
    };
    info!(version, "events appended over http");

    Ok((
        StatusCode::CREATED,
        Json(AppendEventsResponse {
            event_ids: appended.iter().map(|event| event.id).collect(),
            version,
        }),
    ))
}

/// GET /{aggregate_type}/{aggregate_id}/events
async fn stream_events(
    State(state): State<AppState>,
    Path((aggregate_type, aggregate_id)): Path<(String, String)>,
    Query(params): Query<StreamEventsParams>,
) -> Json<Vec<DomainEvent>> {
    let query = EventQuery {
        limit: params.limit,
        ..EventQuery::all()
            .stream(aggregate_type, aggregate_id)
            .versions(params.from_version, params.to_version)
    };
    let events = state.store.get_events(&query).await;
    Json(events.iter().map(|event| event.as_ref().clone()).collect())
}

/// GET /{aggregate_type}/{aggregate_id}
async fn get_aggregate(
    State(state): State<AppState>,
    Path((aggregate_type, aggregate_id)): Path<(String, String)>,
    Query(params): Query<AggregateParams>,
) -> Result<Json<Aggregate>, ApiError> {
    state
        .store
        .get_aggregate(&aggregate_id, &aggregate_type, params.version)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(Resource::Aggregate, format!("{aggregate_type}/{aggregate_id}"))
        })
}

/// GET /{aggregate_type}/{aggregate_id}/snapshot
async fn get_snapshot(
    State(state): State<AppState>,
    Path((aggregate_type, aggregate_id)): Path<(String, String)>,
) -> Result<Json<Snapshot>, ApiError> {
    state
        .store
        .get_snapshot(&aggregate_id, &aggregate_type)
        .await
        .map(Json)
        .ok_or_else(|| {
            ApiError::not_found(Resource::Snapshot, format!("{aggregate_type}/{aggregate_id}"))
        })
}

/// POST /{aggregate_type}/{aggregate_id}/snapshot
#[instrument(skip(state))]
async fn create_snapshot(
    State(state): State<AppState>,
    Path((aggregate_type, aggregate_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Snapshot>), ApiError> {
    let snapshot = state
        .store
        .create_snapshot(&aggregate_id, &aggregate_type)
        .await?;
    Ok((StatusCode::CREATED, Json(snapshot)))
}

/// Returns the router for aggregate streams.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{aggregate_type}/{aggregate_id}", get(get_aggregate))
        .route(
            "/{aggregate_type}/{aggregate_id}/events",
            get(stream_events).post(append_events),
        )
        .route(
            "/{aggregate_type}/{aggregate_id}/snapshot",
            get(get_snapshot).post(create_snapshot),
        )
}
