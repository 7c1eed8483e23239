//! Routes for projections and their read models.

use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Json, Router, routing::get, routing::post};
use eventide_core::event::EventData;
use eventide_engine::{ProjectionConfig, ProjectionStatus, ReadModel};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::error::{ApiError, Resource};
use crate::state::AppState;

/// Request body for POST /.
#[derive(Debug, Deserialize)]
pub struct CreateProjectionRequest {
    pub name: String,
    pub event_types: Vec<String>,
    #[serde(default)]
    pub build_from_snapshot: bool,
    #[serde(default)]
    pub rebuild_on_start: bool,
    pub batch_size: Option<usize>,
    pub checkpoint_frequency: Option<u64>,
}

impl From<CreateProjectionRequest> for ProjectionConfig {
    fn from(request: CreateProjectionRequest) -> Self {
        let mut config = ProjectionConfig::new(request.name, request.event_types)
            .build_from_snapshot(request.build_from_snapshot)
            .rebuild_on_start(request.rebuild_on_start);
        if let Some(batch_size) = request.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(frequency) = request.checkpoint_frequency {
            config = config.checkpoint_frequency(frequency);
        }
        config
    }
}

/// Turns query-string pairs into a read model predicate. Values that parse
/// as JSON (numbers, booleans, quoted strings) match typed fields; anything
/// else matches as a plain string.
fn predicate_from(params: HashMap<String, String>) -> EventData {
    params
        .into_iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
            (key, value)
        })
        .collect()
}

/// POST /
#[instrument(skip(state, request), fields(projection = %request.name))]
async fn create_projection(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectionRequest>,
) -> Result<(StatusCode, Json<ProjectionStatus>), ApiError> {
    let name = request.name.clone();
    state.store.create_projection(request.into()).await?;
    info!("projection created over http");

    let status = state
        .store
        .projection_status(&name)
        .await
        .ok_or_else(|| ApiError::not_found(Resource::Projection, &name))?;
    Ok((StatusCode::CREATED, Json(status)))
}

/// GET /{name}
async fn projection_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionStatus>, ApiError> {
    state
        .store
        .projection_status(&name)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(Resource::Projection, name))
}

/// POST /{name}/rebuild
#[instrument(skip(state))]
async fn rebuild_projection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProjectionStatus>, ApiError> {
    Ok(Json(state.store.rebuild_projection(&name).await?))
}

/// DELETE /{name}
#[instrument(skip(state))]
async fn remove_projection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.store.remove_projection(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /{name}/read-models - every query parameter must match
async fn query_read_models(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ReadModel>>, ApiError> {
    if state.store.projection_status(&name).await.is_none() {
        return Err(ApiError::not_found(Resource::Projection, name));
    }
    let predicate = predicate_from(params);
    Ok(Json(state.store.query_read_models(&name, &predicate).await))
}

/// GET /{name}/read-models/{id}
async fn get_read_model(
    State(state): State<AppState>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<ReadModel>, ApiError> {
    state
        .store
        .get_read_model(&name, &id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found(Resource::ReadModel, format!("{name}/{id}")))
}

/// Returns the router for projections.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_projection))
        .route("/{name}", get(projection_status).delete(remove_projection))
        .route("/{name}/rebuild", post(rebuild_projection))
        .route("/{name}/read-models", get(query_read_models))
        .route("/{name}/read-models/{id}", get(get_read_model))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_predicate_parses_json_values_and_falls_back_to_strings() {
        let params = HashMap::from([
            ("plan".to_owned(), "pro".to_owned()),
            ("seats".to_owned(), "3".to_owned()),
            ("active".to_owned(), "true".to_owned()),
            ("code".to_owned(), "\"42\"".to_owned()),
        ]);

        let predicate = predicate_from(params);

        assert_eq!(predicate["plan"], json!("pro"));
        assert_eq!(predicate["seats"], json!(3));
        assert_eq!(predicate["active"], json!(true));
        assert_eq!(predicate["code"], json!("42"));
    }

    #[test]
    fn test_create_request_overrides_defaults() {
        let request: CreateProjectionRequest = serde_json::from_value(json!({
            "name": "plans",
            "event_types": ["PlanChanged"],
            "checkpoint_frequency": 5
        }))
        .unwrap();

        let config = ProjectionConfig::from(request);

        assert_eq!(config.name, "plans");
        assert!(config.event_types.contains("PlanChanged"));
        assert_eq!(config.checkpoint_frequency, 5);
        assert_eq!(config.batch_size, 100);
        assert!(!config.rebuild_on_start);
    }
}
