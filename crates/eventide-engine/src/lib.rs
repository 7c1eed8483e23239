//! Eventide Engine: the event-sourcing engine.
//!
//! An append-only log with per-aggregate versioning and optimistic
//! concurrency, snapshots with stream trimming, a retention sweeper,
//! projections with checkpoints and rebuild, subscription cursors over the
//! global log, and sagas with reverse-order compensation. [`EventStore`] is
//! the single entry point composing all of them.

pub mod arena;
pub mod config;
mod fanout;
pub mod folders;
pub mod handlers;
pub mod log;
pub mod metrics;
pub mod projection;
pub mod query;
pub mod retention;
pub mod saga;
pub mod snapshot;
pub mod store;
pub mod subscription;

pub use config::{ConsistencyLevel, EngineConfig, RetentionPolicy};
pub use fanout::Lane;
pub use handlers::ALL_EVENT_TYPES;
pub use metrics::EngineMetrics;
pub use projection::{ProjectionConfig, ProjectionStatus, ReadModel};
pub use query::EventQuery;
pub use retention::RetentionReport;
pub use saga::{Saga, SagaStatus, SagaStep, StepStatus};
pub use store::{Aggregate, EventStore, EventStoreBuilder};
pub use subscription::{StartPosition, SubscriptionInfo, SubscriptionSpec, SubscriptionStatus, TickReport};
