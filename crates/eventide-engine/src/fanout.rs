//! Post-append fan-out.
//!
//! Every committed batch is published as an immutable [`EventBatch`] onto one
//! unbounded lane per consumer (event handlers, projections, saga matcher).
//! Each lane is drained by its own task, so a slow or failing consumer never
//! stalls the writer or the other lanes. Each batch runs in a nested task so a
//! panicking handler is contained to that batch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use eventide_core::event::DomainEvent;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::handlers::HandlerRegistry;
use crate::projection::ProjectionEngine;
use crate::saga::SagaOrchestrator;

/// Immutable batch of committed events shared by every lane.
pub type EventBatch = Arc<[Arc<DomainEvent>]>;

/// Fan-out lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    /// Type-scoped event handlers.
    Handlers,
    /// Projection engine.
    Projections,
    /// Saga step matching.
    Sagas,
}

impl Lane {
    /// Every lane, in dispatch order.
    pub const ALL: [Lane; 3] = [Lane::Handlers, Lane::Projections, Lane::Sagas];

    fn as_str(self) -> &'static str {
        match self {
            Lane::Handlers => "handlers",
            Lane::Projections => "projections",
            Lane::Sagas => "sagas",
        }
    }
}

#[derive(Clone)]
enum Consumer {
    Handlers(Arc<HandlerRegistry>),
    Projections(Arc<ProjectionEngine>),
    Sagas(Arc<SagaOrchestrator>),
}

impl Consumer {
    fn lane(&self) -> Lane {
        match self {
            Consumer::Handlers(_) => Lane::Handlers,
            Consumer::Projections(_) => Lane::Projections,
            Consumer::Sagas(_) => Lane::Sagas,
        }
    }

    async fn consume(&self, batch: &EventBatch) {
        for event in batch.iter() {
            match self {
                Consumer::Handlers(handlers) => handlers.dispatch(event).await,
                Consumer::Projections(projections) => projections.process_event(event).await,
                Consumer::Sagas(sagas) => sagas.on_event(event).await,
            }
        }
    }
}

struct LaneState {
    lane: Lane,
    sender: mpsc::UnboundedSender<EventBatch>,
    published: AtomicU64,
    processed: watch::Receiver<u64>,
}

/// Publisher side of the fan-out and owner of the consumer tasks.
pub(crate) struct FanOut {
    lanes: Vec<LaneState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FanOut {
    /// Spawns one consumer task per lane.
    pub(crate) fn spawn(
        handlers: Arc<HandlerRegistry>,
        projections: Arc<ProjectionEngine>,
        sagas: Arc<SagaOrchestrator>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let consumers = [
            Consumer::Handlers(handlers),
            Consumer::Projections(projections),
            Consumer::Sagas(sagas),
        ];

        let mut lanes = Vec::with_capacity(consumers.len());
        let mut tasks = Vec::with_capacity(consumers.len());
        for consumer in consumers {
            let (sender, receiver) = mpsc::unbounded_channel();
            let (processed_tx, processed) = watch::channel(0);
            lanes.push(LaneState {
                lane: consumer.lane(),
                sender,
                published: AtomicU64::new(0),
                processed,
            });
            tasks.push(tokio::spawn(run_lane(
                consumer,
                receiver,
                processed_tx,
                shutdown.subscribe(),
            )));
        }

        Self {
            lanes,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    /// Publishes `batch` onto the selected lanes.
    pub(crate) fn publish(&self, batch: &EventBatch, lanes: &[Lane]) {
        for state in self.lanes.iter().filter(|state| lanes.contains(&state.lane)) {
            state.published.fetch_add(1, Ordering::AcqRel);
            if state.sender.send(Arc::clone(batch)).is_err() {
                debug!(lane = state.lane.as_str(), "fan-out lane closed, batch dropped");
            }
        }
    }

    /// Waits until every lane has processed everything published before the
    /// call. Returns early for lanes whose consumer has stopped.
    pub(crate) async fn settle(&self) {
        for state in &self.lanes {
            let target = state.published.load(Ordering::Acquire);
            let mut processed = state.processed.clone();
            if processed.wait_for(|done| *done >= target).await.is_err() {
                debug!(lane = state.lane.as_str(), "fan-out lane stopped before settling");
            }
        }
    }

    /// Batches published but not yet processed, summed over all lanes.
    pub(crate) fn backlog(&self) -> u64 {
        self.lanes
            .iter()
            .map(|state| {
                state
                    .published
                    .load(Ordering::Acquire)
                    .saturating_sub(*state.processed.borrow())
            })
            .sum()
    }

    /// Stops the consumer tasks after they drain what is already queued.
    pub(crate) async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "fan-out consumer task failed");
            }
        }
    }
}

async fn run_lane(
    consumer: Consumer,
    mut receiver: mpsc::UnboundedReceiver<EventBatch>,
    processed: watch::Sender<u64>,
    mut shutdown: watch::Receiver<bool>,
) {
    let lane = consumer.lane().as_str();
    info!(lane, "fan-out consumer started");
    loop {
        tokio::select! {
            next = receiver.recv() => {
                let Some(batch) = next else { break };
                consume_isolated(&consumer, batch).await;
                processed.send_modify(|count| *count += 1);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    while let Ok(batch) = receiver.try_recv() {
                        consume_isolated(&consumer, batch).await;
                        processed.send_modify(|count| *count += 1);
                    }
                    break;
                }
            }
        }
    }
    info!(lane, "fan-out consumer stopped");
}

async fn consume_isolated(consumer: &Consumer, batch: EventBatch) {
    let task_consumer = consumer.clone();
    let size = batch.len();
    let outcome = tokio::spawn(async move { task_consumer.consume(&batch).await }).await;
    if let Err(e) = outcome {
        error!(lane = consumer.lane().as_str(), batch_size = size, error = %e, "fan-out consumer panicked");
    }
}
