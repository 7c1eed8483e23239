//! Route modules organized by engine component.

pub mod events;
pub mod health;
pub mod metrics;
pub mod projections;
pub mod sagas;
pub mod streams;
pub mod subscriptions;
