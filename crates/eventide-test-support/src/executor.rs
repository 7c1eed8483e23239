//! Scripted command executor for saga tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use eventide_core::command::{Command, CommandExecutor, CommandResult};
use eventide_core::error::EventStoreError;
use eventide_core::event::DomainEvent;

#[derive(Debug, Clone)]
enum Script {
    Reject(String),
    TransportError(String),
    Delay(Duration),
    Produce(Vec<DomainEvent>),
    Hang,
}

/// A command executor that succeeds by default and follows per-command-type
/// scripts otherwise. Records the type of every command it receives, in
/// order.
#[derive(Debug, Default)]
pub struct ScriptedCommandExecutor {
    scripts: Mutex<HashMap<String, Script>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedCommandExecutor {
    /// Create an executor that accepts every command.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self, command_type: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(command_type.to_owned(), script);
    }

    /// Reject `command_type` with `reason` (`success == false`).
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn reject(&self, command_type: &str, reason: &str) {
        self.script(command_type, Script::Reject(reason.to_owned()));
    }

    /// Fail `command_type` with an infrastructure error.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn fail_transport(&self, command_type: &str, reason: &str) {
        self.script(command_type, Script::TransportError(reason.to_owned()));
    }

    /// Succeed on `command_type` after sleeping for `delay`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn delay(&self, command_type: &str, delay: Duration) {
        self.script(command_type, Script::Delay(delay));
    }

    /// Never answer `command_type`.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn hang(&self, command_type: &str) {
        self.script(command_type, Script::Hang);
    }

    /// Succeed on `command_type` reporting `events` as produced.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn produce(&self, command_type: &str, events: Vec<DomainEvent>) {
        self.script(command_type, Script::Produce(events));
    }

    /// Command types received so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommandExecutor for ScriptedCommandExecutor {
    async fn execute(&self, command: &Command) -> Result<CommandResult, EventStoreError> {
        self.executed
            .lock()
            .unwrap()
            .push(command.command_type.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&command.command_type)
            .cloned();
        match script {
            None => Ok(CommandResult::succeeded(Vec::new())),
            Some(Script::Reject(reason)) => Ok(CommandResult::failed(reason)),
            Some(Script::TransportError(reason)) => Err(EventStoreError::Infrastructure(reason)),
            Some(Script::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(CommandResult::succeeded(Vec::new()))
            }
            Some(Script::Produce(events)) => Ok(CommandResult::succeeded(events)),
            Some(Script::Hang) => {
                std::future::pending::<()>().await;
                Ok(CommandResult::succeeded(Vec::new()))
            }
        }
    }
}
