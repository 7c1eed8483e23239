//! Routes for starting and inspecting sagas.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get};
use eventide_core::command::Command;
use eventide_core::error::EventStoreError;
use eventide_engine::{Saga, SagaStep};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{ApiError, Resource};
use crate::state::AppState;

/// A command as submitted over HTTP.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    #[serde(default)]
    pub data: Value,
}

impl CommandRequest {
    fn into_command(self, correlation_id: Uuid) -> Command {
        Command::new(
            self.command_type,
            self.aggregate_type,
            self.aggregate_id,
            self.data,
        )
        .correlated_with(correlation_id)
    }
}

/// One step of a saga start request.
#[derive(Debug, Deserialize)]
pub struct StepRequest {
    pub name: String,
    pub command: CommandRequest,
    #[serde(default)]
    pub compensation: Option<CommandRequest>,
    /// Overrides the engine's default step timeout.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct StartSagaRequest {
    pub saga_type: String,
    #[serde(default)]
    pub data: Value,
    pub steps: Vec<StepRequest>,
}

impl StartSagaRequest {
    fn into_steps(self, correlation_id: Uuid) -> (String, Value, Vec<SagaStep>) {
        let steps = self
            .steps
            .into_iter()
            .map(|step| {
                let mut saga_step =
                    SagaStep::new(step.name, step.command.into_command(correlation_id));
                if let Some(compensation) = step.compensation {
                    saga_step =
                        saga_step.with_compensation(compensation.into_command(correlation_id));
                }
                if let Some(timeout_ms) = step.timeout_ms {
                    saga_step = saga_step.with_timeout(Duration::from_millis(timeout_ms));
                }
                saga_step
            })
            .collect();
        (self.saga_type, self.data, steps)
    }
}

/// POST / - runs a saga until it completes, fails or waits on events
#[instrument(skip(state, request), fields(saga_type = %request.saga_type, steps = request.steps.len()))]
async fn start_saga(
    State(state): State<AppState>,
    Json(request): Json<StartSagaRequest>,
) -> Result<(StatusCode, Json<Saga>), ApiError> {
    let correlation_id = Uuid::new_v4();
    info!(%correlation_id, "starting saga over http");

    let (saga_type, data, steps) = request.into_steps(correlation_id);
    let id = state.store.start_saga(&saga_type, data, steps).await?;
    let saga = state
        .store
        .get_saga(id)
        .await
        .ok_or(EventStoreError::SagaNotFound(id))?;
    Ok((StatusCode::CREATED, Json(saga)))
}

/// GET /
async fn list_sagas(State(state): State<AppState>) -> Json<Vec<Saga>> {
    Json(state.store.list_sagas().await)
}

/// GET /{id}
async fn get_saga(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Saga>, ApiError> {
    state
        .store
        .get_saga(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(Resource::Saga, id))
}

/// Returns the router for sagas.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sagas).post(start_saga))
        .route("/{id}", get(get_saga))
}
