//! Global log queries and replay.

use axum::extract::{Query, State};
use axum::{Json, Router, routing::get, routing::post};
use chrono::{DateTime, Utc};
use eventide_core::event::DomainEvent;
use eventide_engine::EventQuery;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Query parameters for GET /.
#[derive(Debug, Deserialize)]
pub struct EventsParams {
    pub aggregate_type: Option<String>,
    pub aggregate_id: Option<String>,
    /// Comma-separated event types.
    pub event_type: Option<String>,
    pub correlation_id: Option<Uuid>,
    pub caused_by: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

impl EventsParams {
    fn into_query(self) -> EventQuery {
        EventQuery {
            aggregate_type: self.aggregate_type,
            aggregate_id: self.aggregate_id,
            event_types: self.event_type.map(|types| {
                types
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(ToOwned::to_owned)
                    .collect()
            }),
            correlation_id: self.correlation_id,
            caused_by: self.caused_by,
            from_timestamp: self.from,
            to_timestamp: self.to,
            limit: Some(self.limit),
            ..EventQuery::all()
        }
    }
}

/// Request body for POST /replay.
#[derive(Debug, Deserialize)]
pub struct ReplayRequest {
    pub from: DateTime<Utc>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub event_types: Option<Vec<String>>,
}

/// Response body for POST /replay.
#[derive(Debug, Serialize)]
pub struct ReplayResponse {
    /// Events re-published to handlers and projections.
    pub replayed: usize,
}

/// GET / - retained events in global append order
async fn list_events(
    State(state): State<AppState>,
    Query(params): Query<EventsParams>,
) -> Json<Vec<DomainEvent>> {
    let events = state.store.get_events(&params.into_query()).await;
    Json(events.iter().map(|event| event.as_ref().clone()).collect())
}

/// POST /replay
#[instrument(skip(state, request), fields(from = %request.from))]
async fn replay(
    State(state): State<AppState>,
    Json(request): Json<ReplayRequest>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let replayed = state
        .store
        .replay(request.from, request.to, request.event_types)
        .await?;
    Ok(Json(ReplayResponse { replayed }))
}

/// POST /archive/drain - archived events, released from the engine
#[instrument(skip(state))]
async fn drain_archive(State(state): State<AppState>) -> Json<Vec<DomainEvent>> {
    let drained = state.store.drain_archive().await;
    Json(drained.iter().map(|event| event.as_ref().clone()).collect())
}

/// Returns the router for global log queries and replay.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_events))
        .route("/replay", post(replay))
        .route("/archive/drain", post(drain_archive))
}
