//! Saga orchestrator.
//!
//! A saga runs its steps strictly in declared order through the
//! application's [`CommandExecutor`]. Steps advance either on a successful
//! command result or when an appended event's type matches the current
//! step's command type; both paths go through the same state transitions.
//! Only one task drives a saga at a time: the driver marks the current step
//! `executing` under the lock and applies the result only if the step is
//! still the one it started.
//!
//! When a step fails (a rejection, a transport error or a timeout) and it
//! declares a compensation, every completed step's compensation runs in
//! reverse declared order on a best-effort basis. The saga ends `failed`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use eventide_core::clock::Clock;
use eventide_core::command::{Command, CommandExecutor, CommandResult};
use eventide_core::error::{EventStoreError, HandlerError};
use eventide_core::event::{DomainEvent, EventData, to_event_data};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::arena::Registry;

/// Saga lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SagaStatus {
    Active,
    Compensating,
    Completed,
    Failed,
}

/// Step lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Compensated,
}

/// One step of a saga.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    /// Step name.
    pub name: String,
    /// Command dispatched when the step executes.
    pub command: Command,
    /// Command undoing the step.
    pub compensation: Option<Command>,
    /// Current status.
    pub status: StepStatus,
    /// Per-step timeout; the orchestrator default applies when absent.
    pub timeout_ms: Option<u64>,
    /// Failure reason of a failed step.
    pub error: Option<String>,
}

impl SagaStep {
    /// A pending step without compensation.
    pub fn new(name: impl Into<String>, command: Command) -> Self {
        Self {
            name: name.into(),
            command,
            compensation: None,
            status: StepStatus::Pending,
            timeout_ms: None,
            error: None,
        }
    }

    /// Sets the compensation command.
    #[must_use]
    pub fn with_compensation(mut self, compensation: Command) -> Self {
        self.compensation = Some(compensation);
        self
    }

    /// Sets the step timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }
}

/// A running or finished saga instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Saga {
    pub id: Uuid,
    pub saga_type: String,
    pub status: SagaStatus,
    /// Index of the step being executed (the last step once completed).
    pub current_step: usize,
    pub data: EventData,
    pub steps: Vec<SagaStep>,
    /// Events produced by compensation commands.
    pub compensation_events: Vec<DomainEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

enum Next {
    Continue,
    Compensate,
    Stop,
}

/// Runs sagas.
pub struct SagaOrchestrator {
    sagas: RwLock<Registry<Uuid, Saga>>,
    executor: Arc<dyn CommandExecutor>,
    default_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl SagaOrchestrator {
    /// Creates an orchestrator dispatching through `executor`.
    #[must_use]
    pub fn new(executor: Arc<dyn CommandExecutor>, default_timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            sagas: RwLock::new(Registry::new()),
            executor,
            default_timeout,
            clock,
        }
    }

    /// Creates a saga and executes its steps until it completes, fails, or
    /// hands progression to the event-driven path.
    ///
    /// # Errors
    ///
    /// Returns `EventStoreError::Validation` for an empty step list.
    pub async fn start(
        self: &Arc<Self>,
        saga_type: impl Into<String>,
        data: Value,
        steps: Vec<SagaStep>,
    ) -> Result<Uuid, EventStoreError> {
        let saga_type = saga_type.into();
        if steps.is_empty() {
            return Err(EventStoreError::Validation(format!(
                "saga {saga_type} must declare at least one step"
            )));
        }
        let now = self.clock.now();
        let id = Uuid::new_v4();
        let saga = Saga {
            id,
            saga_type,
            status: SagaStatus::Active,
            current_step: 0,
            data: to_event_data(data),
            steps: steps
                .into_iter()
                .map(|step| SagaStep {
                    status: StepStatus::Pending,
                    error: None,
                    ..step
                })
                .collect(),
            compensation_events: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        info!(saga_id = %id, saga_type = %saga.saga_type, steps = saga.steps.len(), "saga started");
        self.sagas.write().await.insert(id, saga);

        Arc::clone(self).drive(id).await;
        Ok(id)
    }

    /// One saga.
    pub async fn get(&self, id: Uuid) -> Option<Saga> {
        self.sagas.read().await.get_by_key(&id).cloned()
    }

    /// Every saga, oldest first.
    pub async fn list(&self) -> Vec<Saga> {
        let mut all: Vec<Saga> = self.sagas.read().await.values().cloned().collect();
        all.sort_by_key(|saga| (saga.created_at, saga.id));
        all
    }

    /// Number of sagas.
    pub async fn count(&self) -> usize {
        self.sagas.read().await.len()
    }

    /// Event-driven progression: an event whose type equals the command type
    /// of an active saga's current step completes that step, whichever
    /// aggregate emitted it. Sagas with steps left are driven on.
    pub async fn on_event(self: &Arc<Self>, event: &DomainEvent) {
        let now = self.clock.now();
        let advanced: Vec<Uuid> = {
            let mut sagas = self.sagas.write().await;
            sagas
                .values_mut()
                .filter(|saga| saga.status == SagaStatus::Active)
                .filter_map(|saga| {
                    let index = saga.current_step;
                    let step = saga.steps.get(index)?;
                    let matches = step.command.command_type == event.event_type
                        && matches!(step.status, StepStatus::Pending | StepStatus::Executing);
                    if !matches {
                        return None;
                    }
                    debug!(saga_id = %saga.id, step = %step.name, event_id = %event.id, "step completed by event");
                    complete_step(saga, index, now).then_some(saga.id)
                })
                .collect()
        };
        for id in advanced {
            tokio::spawn(Arc::clone(self).drive(id));
        }
    }

    async fn drive(self: Arc<Self>, id: Uuid) {
        loop {
            let Some((index, command, timeout)) = self.begin_step(id).await else {
                return;
            };
            let outcome = self.execute(&command, timeout).await;

            let next = {
                let now = self.clock.now();
                let mut sagas = self.sagas.write().await;
                let Some(saga) = sagas.get_by_key_mut(&id) else {
                    return;
                };
                let still_current = saga.status == SagaStatus::Active
                    && saga.current_step == index
                    && saga.steps[index].status == StepStatus::Executing;
                if !still_current {
                    debug!(saga_id = %id, step = index, "step already settled, result ignored");
                    return;
                }
                match outcome {
                    Ok(_) => {
                        if complete_step(saga, index, now) {
                            Next::Continue
                        } else {
                            info!(saga_id = %id, "saga completed");
                            Next::Stop
                        }
                    }
                    Err(e) => {
                        saga.updated_at = now;
                        let step = &mut saga.steps[index];
                        step.status = StepStatus::Failed;
                        step.error = Some(e.to_string());
                        warn!(saga_id = %id, step = %step.name, error = %e, "saga step failed");
                        if step.compensation.is_some() {
                            saga.status = SagaStatus::Compensating;
                            Next::Compensate
                        } else {
                            saga.status = SagaStatus::Failed;
                            Next::Stop
                        }
                    }
                }
            };

            match next {
                Next::Continue => {}
                Next::Compensate => {
                    self.compensate(id).await;
                    return;
                }
                Next::Stop => return,
            }
        }
    }

    /// Marks the current step executing and returns what to run, or `None`
    /// when there is nothing for this driver to do.
    async fn begin_step(&self, id: Uuid) -> Option<(usize, Command, Duration)> {
        let now = self.clock.now();
        let mut sagas = self.sagas.write().await;
        let saga = sagas.get_by_key_mut(&id)?;
        if saga.status != SagaStatus::Active {
            return None;
        }
        let index = saga.current_step;
        let step = saga.steps.get_mut(index)?;
        if step.status != StepStatus::Pending {
            return None;
        }
        step.status = StepStatus::Executing;
        saga.updated_at = now;
        let timeout = step
            .timeout_ms
            .map_or(self.default_timeout, Duration::from_millis);
        debug!(saga_id = %id, step = %step.name, command_type = %step.command.command_type, "executing saga step");
        Some((index, step.command.clone(), timeout))
    }

    async fn execute(&self, command: &Command, timeout: Duration) -> Result<CommandResult, HandlerError> {
        match tokio::time::timeout(timeout, self.executor.execute(command)).await {
            Err(_) => Err(HandlerError::Timeout(timeout)),
            Ok(Err(e)) => Err(HandlerError::failed(e.to_string())),
            Ok(Ok(result)) if result.success => Ok(result),
            Ok(Ok(result)) => Err(HandlerError::failed(
                result.error.unwrap_or_else(|| "command rejected".to_owned()),
            )),
        }
    }

    async fn compensate(&self, id: Uuid) {
        let pending: Vec<(usize, Command, Duration)> = {
            let sagas = self.sagas.read().await;
            let Some(saga) = sagas.get_by_key(&id) else {
                return;
            };
            saga.steps
                .iter()
                .enumerate()
                .rev()
                .filter(|(_, step)| step.status == StepStatus::Completed)
                .filter_map(|(index, step)| {
                    let timeout = step
                        .timeout_ms
                        .map_or(self.default_timeout, Duration::from_millis);
                    step.compensation.clone().map(|command| (index, command, timeout))
                })
                .collect()
        };
        info!(saga_id = %id, compensations = pending.len(), "saga compensating");

        for (index, command, timeout) in pending {
            let outcome = self.execute(&command, timeout).await;
            let now = self.clock.now();
            let mut sagas = self.sagas.write().await;
            let Some(saga) = sagas.get_by_key_mut(&id) else {
                return;
            };
            match outcome {
                Ok(result) => {
                    saga.steps[index].status = StepStatus::Compensated;
                    saga.compensation_events.extend(result.events);
                    debug!(saga_id = %id, step = %saga.steps[index].name, "step compensated");
                }
                Err(e) => {
                    warn!(
                        saga_id = %id,
                        step = %saga.steps[index].name,
                        command_type = %command.command_type,
                        error = %e,
                        "compensation failed, continuing"
                    );
                }
            }
            saga.updated_at = now;
        }

        let mut sagas = self.sagas.write().await;
        if let Some(saga) = sagas.get_by_key_mut(&id) {
            saga.status = SagaStatus::Failed;
            saga.updated_at = self.clock.now();
        }
        info!(saga_id = %id, "saga failed after compensation");
    }
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaOrchestrator")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

/// Completes step `index` and moves to the next one. Returns `true` when
/// steps remain.
fn complete_step(saga: &mut Saga, index: usize, now: DateTime<Utc>) -> bool {
    saga.steps[index].status = StepStatus::Completed;
    saga.updated_at = now;
    if index + 1 < saga.steps.len() {
        saga.current_step = index + 1;
        true
    } else {
        saga.status = SagaStatus::Completed;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventide_test_support::{FixedClock, ScriptedCommandExecutor};
    use serde_json::json;

    fn orchestrator(executor: Arc<ScriptedCommandExecutor>) -> Arc<SagaOrchestrator> {
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
        Arc::new(SagaOrchestrator::new(executor, Duration::from_secs(5), Arc::new(clock)))
    }

    fn step(name: &str, command_type: &str) -> SagaStep {
        SagaStep::new(name, Command::new(command_type, "order", "o-1", json!({})))
    }

    #[tokio::test]
    async fn test_start_runs_every_step_in_order() {
        // Arrange
        let executor = Arc::new(ScriptedCommandExecutor::new());
        let sagas = orchestrator(executor.clone());

        // Act
        let id = sagas
            .start(
                "checkout",
                json!({"order": "o-1"}),
                vec![step("reserve", "ReserveStock"), step("charge", "ChargeCard")],
            )
            .await
            .unwrap();

        // Assert
        let saga = sagas.get(id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert_eq!(saga.current_step, 1);
        assert!(saga.steps.iter().all(|s| s.status == StepStatus::Completed));
        assert_eq!(executor.executed(), vec!["ReserveStock", "ChargeCard"]);
    }

    #[tokio::test]
    async fn test_failed_step_without_compensation_fails_saga() {
        let executor = Arc::new(ScriptedCommandExecutor::new());
        executor.reject("ChargeCard", "card declined");
        let sagas = orchestrator(executor.clone());

        let id = sagas
            .start("checkout", json!({}), vec![step("reserve", "ReserveStock").with_compensation(
                Command::new("ReleaseStock", "order", "o-1", json!({})),
            ), step("charge", "ChargeCard")])
            .await
            .unwrap();

        let saga = sagas.get(id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.steps[0].status, StepStatus::Completed);
        assert_eq!(saga.steps[1].status, StepStatus::Failed);
        assert_eq!(saga.steps[1].error.as_deref(), Some("handler failed: card declined"));
        assert_eq!(executor.executed(), vec!["ReserveStock", "ChargeCard"]);
    }

    #[tokio::test]
    async fn test_empty_steps_are_rejected() {
        let sagas = orchestrator(Arc::new(ScriptedCommandExecutor::new()));

        let result = sagas.start("checkout", json!({}), Vec::new()).await;

        assert!(matches!(result, Err(EventStoreError::Validation(_))));
    }
}
