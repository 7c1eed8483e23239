//! Engine metrics scrape endpoint.

use axum::extract::State;
use axum::{Json, Router, routing::get};
use eventide_engine::EngineMetrics;

use crate::state::AppState;

/// GET /metrics
async fn metrics(State(state): State<AppState>) -> Json<EngineMetrics> {
    Json(state.store.get_metrics().await)
}

/// Returns the metrics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}
