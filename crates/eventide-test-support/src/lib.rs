//! Shared test mocks and utilities for the Eventide engine.

mod clock;
mod executor;
mod handlers;
mod repository;

pub use clock::{FixedClock, ManualClock};
pub use executor::ScriptedCommandExecutor;
pub use handlers::{RecordingEventHandler, RecordingSubscriptionHandler};
pub use repository::{FailingEventRepository, RecordingEventRepository};
