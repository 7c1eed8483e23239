//! Aggregate state folding.
//!
//! Aggregate state is reconstructed by folding a stream's events in version
//! order. Aggregate types with a known event vocabulary register a
//! [`TypedFolder`] with one transition per event type; anything else falls
//! back to [`MergeFolder`], which shallow-merges each event's payload into the
//! running state.

use std::collections::HashMap;
use std::fmt;

use crate::event::{DomainEvent, EventData};

/// Folded aggregate state.
pub type AggregateState = EventData;

/// Applies events to aggregate state.
pub trait AggregateFolder: Send + Sync {
    /// Apply one event to the running state.
    fn fold(&self, state: &mut AggregateState, event: &DomainEvent);
}

/// Shallow merge: every top-level key of `data` overwrites the same key in
/// `state`.
pub fn merge_into(state: &mut AggregateState, data: &EventData) {
    for (key, value) in data {
        state.insert(key.clone(), value.clone());
    }
}

/// Compatibility fold for schemaless events: `state = merge(state, event.data)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeFolder;

impl AggregateFolder for MergeFolder {
    fn fold(&self, state: &mut AggregateState, event: &DomainEvent) {
        merge_into(state, &event.data);
    }
}

/// A state transition for one event type.
pub type Transition = Box<dyn Fn(&mut AggregateState, &DomainEvent) + Send + Sync>;

/// Routes each event type to its own transition; unknown types are merged.
#[derive(Default)]
pub struct TypedFolder {
    transitions: HashMap<String, Transition>,
}

impl TypedFolder {
    /// Creates an empty folder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the transition for `event_type`.
    #[must_use]
    pub fn on<F>(mut self, event_type: impl Into<String>, transition: F) -> Self
    where
        F: Fn(&mut AggregateState, &DomainEvent) + Send + Sync + 'static,
    {
        self.transitions
            .insert(event_type.into(), Box::new(transition));
        self
    }
}

impl fmt::Debug for TypedFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.transitions.keys().collect();
        types.sort();
        f.debug_struct("TypedFolder")
            .field("event_types", &types)
            .finish()
    }
}

impl AggregateFolder for TypedFolder {
    fn fold(&self, state: &mut AggregateState, event: &DomainEvent) {
        match self.transitions.get(&event.event_type) {
            Some(transition) => transition(state, event),
            None => merge_into(state, &event.data),
        }
    }
}

/// Folds `events` on top of `seed`.
pub fn fold_events<'a, I>(folder: &dyn AggregateFolder, seed: AggregateState, events: I) -> AggregateState
where
    I: IntoIterator<Item = &'a DomainEvent>,
{
    events.into_iter().fold(seed, |mut state, event| {
        folder.fold(&mut state, event);
        state
    })
}
