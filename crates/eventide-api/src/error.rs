//! Eventide API: error types.

use std::fmt;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use eventide_core::error::EventStoreError;
use serde::Serialize;
use thiserror::Error;

/// Startup and runtime errors for the API server.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required environment variable is missing or invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Network binding or I/O error.
    #[error("server error: {0}")]
    Server(#[from] std::io::Error),

    /// The engine failed to build, hydrate or reach its repository.
    #[error("engine error: {0}")]
    Engine(#[from] EventStoreError),
}

/// Kinds of resources a read endpoint can miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Aggregate,
    Snapshot,
    Subscription,
    Projection,
    ReadModel,
    Saga,
}

impl Resource {
    fn code(self) -> &'static str {
        match self {
            Self::Aggregate => "aggregate_not_found",
            Self::Snapshot => "snapshot_not_found",
            Self::Subscription => "subscription_not_found",
            Self::Projection => "projection_not_found",
            Self::ReadModel => "read_model_not_found",
            Self::Saga => "saga_not_found",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Aggregate => "aggregate",
            Self::Snapshot => "snapshot",
            Self::Subscription => "subscription",
            Self::Projection => "projection",
            Self::ReadModel => "read model",
            Self::Saga => "saga",
        };
        f.write_str(name)
    }
}

/// JSON body returned for error responses.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code.
    pub error: &'static str,
    /// Human-readable error message.
    pub message: String,
}

/// HTTP-layer error that implements `IntoResponse`.
#[derive(Debug, Error)]
pub enum ApiError {
    /// An error reported by the engine.
    #[error(transparent)]
    Engine(#[from] EventStoreError),

    /// A read path found nothing.
    #[error("{resource} not found: {id}")]
    NotFound {
        /// What was looked up.
        resource: Resource,
        /// The identifier that was looked up.
        id: String,
    },
}

impl ApiError {
    /// Shorthand for [`ApiError::NotFound`].
    pub fn not_found(resource: Resource, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound { resource, .. } => (StatusCode::NOT_FOUND, resource.code()),
            Self::Engine(err) => match err {
                EventStoreError::ConcurrencyConflict { .. } => {
                    (StatusCode::CONFLICT, "concurrency_conflict")
                }
                EventStoreError::ProjectionExists(_) => (StatusCode::CONFLICT, "projection_exists"),
                EventStoreError::StreamNotFound { .. } => {
                    (StatusCode::NOT_FOUND, "stream_not_found")
                }
                EventStoreError::SubscriptionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "subscription_not_found")
                }
                EventStoreError::ProjectionNotFound(_) => {
                    (StatusCode::NOT_FOUND, "projection_not_found")
                }
                EventStoreError::SagaNotFound(_) => (StatusCode::NOT_FOUND, "saga_not_found"),
                EventStoreError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
                EventStoreError::Infrastructure(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "infrastructure_error")
                }
                EventStoreError::Shutdown => (StatusCode::SERVICE_UNAVAILABLE, "shutting_down"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let body = ErrorBody {
            error: error_code,
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
