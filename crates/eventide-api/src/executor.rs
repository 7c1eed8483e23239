//! Outbound saga command dispatch over HTTP.
//!
//! POSTs each [`Command`] as JSON to a configured endpoint and expects a
//! [`CommandResult`] back. A business rejection travels as a 2xx response
//! with `success == false`; anything else is a transport failure.

use std::time::Duration;

use async_trait::async_trait;
use eventide_core::command::{Command, CommandExecutor, CommandResult};
use eventide_core::error::EventStoreError;
use reqwest::Client;
use tracing::{debug, instrument, warn};

/// [`CommandExecutor`] that dispatches commands to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct HttpCommandExecutor {
    client: Client,
    endpoint: String,
}

impl HttpCommandExecutor {
    /// Creates an executor posting to `endpoint` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty endpoint, `Infrastructure` when the HTTP
    /// client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, EventStoreError> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(EventStoreError::Validation(
                "command endpoint must not be empty".into(),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EventStoreError::Infrastructure(format!("http client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// The endpoint commands are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CommandExecutor for HttpCommandExecutor {
    #[instrument(
        skip(self, command),
        fields(command_type = %command.command_type, command_id = %command.id)
    )]
    async fn execute(&self, command: &Command) -> Result<CommandResult, EventStoreError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(command)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "command dispatch failed");
                EventStoreError::Infrastructure(format!("command dispatch failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = %status, "command endpoint rejected request");
            return Err(EventStoreError::Infrastructure(format!(
                "command endpoint returned {status}"
            )));
        }

        let result: CommandResult = response.json().await.map_err(|e| {
            EventStoreError::Infrastructure(format!("invalid command result: {e}"))
        })?;
        debug!(
            success = result.success,
            events = result.events.len(),
            "command executed"
        );
        Ok(result)
    }
}
