//! Eventide API: the operator HTTP surface over an [`EventStore`].
//!
//! [`EventStore`]: eventide_engine::EventStore

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod error;
pub mod executor;
pub mod routes;
pub mod state;

use state::AppState;

/// Builds the full application router. Shared by the binary and the
/// integration tests so both see the same route structure.
pub fn build_router(app_state: AppState) -> Router {
    // TODO: Replace CorsLayer::permissive() with restricted origins for production.
    Router::new()
        .merge(routes::health::router())
        .merge(routes::metrics::router())
        .nest("/api/v1/streams", routes::streams::router())
        .nest("/api/v1/events", routes::events::router())
        .nest("/api/v1/subscriptions", routes::subscriptions::router())
        .nest("/api/v1/projections", routes::projections::router())
        .nest("/api/v1/sagas", routes::sagas::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}
