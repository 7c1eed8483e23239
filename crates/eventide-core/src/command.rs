//! Commands and the outbound command executor contract.
//!
//! The engine never interprets commands. Sagas hand them to the
//! application-supplied [`CommandExecutor`], which mutates aggregates and
//! reports the events it produced.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::EventStoreError;
use crate::event::{DomainEvent, EventData, to_event_data};

/// A request to mutate an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Unique command identifier.
    pub id: Uuid,
    /// Command type name, e.g. `"ReserveInventory"`.
    pub command_type: String,
    /// Type of the target aggregate.
    pub aggregate_type: String,
    /// Target aggregate.
    pub aggregate_id: String,
    /// Command payload.
    pub data: EventData,
    /// Correlation ID for tracing.
    pub correlation_id: Option<Uuid>,
}

impl Command {
    /// Creates a new command with a fresh id.
    pub fn new(
        command_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            command_type: command_type.into(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            data: to_event_data(data),
            correlation_id: None,
        }
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn correlated_with(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Outcome of executing a [`Command`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Whether the command was accepted.
    pub success: bool,
    /// Events produced by the command.
    #[serde(default)]
    pub events: Vec<DomainEvent>,
    /// Rejection reason when `success` is false.
    #[serde(default)]
    pub error: Option<String>,
}

impl CommandResult {
    /// A successful result carrying the produced events.
    #[must_use]
    pub fn succeeded(events: Vec<DomainEvent>) -> Self {
        Self {
            success: true,
            events,
            error: None,
        }
    }

    /// A rejected command.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            events: Vec::new(),
            error: Some(reason.into()),
        }
    }
}

/// Executes commands on behalf of the engine (saga steps and compensations).
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `command`. A transport failure is an `Err`; a business
    /// rejection is an `Ok` result with `success == false`.
    async fn execute(&self, command: &Command) -> Result<CommandResult, EventStoreError>;
}
