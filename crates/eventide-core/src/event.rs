//! Domain event record and its metadata.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Schemaless key/value payload carried by events, commands and folded state.
pub type EventData = serde_json::Map<String, Value>;

/// Converts an arbitrary JSON value into an [`EventData`] map.
///
/// Objects are taken as-is; any other value is wrapped under a `"value"` key.
#[must_use]
pub fn to_event_data(value: Value) -> EventData {
    match value {
        Value::Object(map) => map,
        Value::Null => EventData::new(),
        other => {
            let mut map = EventData::new();
            map.insert("value".to_owned(), other);
            map
        }
    }
}

/// Identifies one aggregate stream: `(aggregate_type, aggregate_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    /// Aggregate type, e.g. `"user"`.
    pub aggregate_type: String,
    /// Aggregate identifier within its type.
    pub aggregate_id: String,
}

impl StreamKey {
    /// Creates a new stream key.
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

/// Metadata attached to every domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Component that produced the event.
    pub source: String,
    /// Actor (user, service account) on whose behalf the event was produced.
    pub actor_id: Option<String>,
    /// Distributed trace identifier.
    pub trace_id: Option<String>,
    /// Payload schema version.
    pub schema_version: u32,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            source: "eventide".to_owned(),
            actor_id: None,
            trace_id: None,
            schema_version: 1,
        }
    }
}

/// An immutable, appended domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Type name used for routing, projections and saga matching.
    pub event_type: String,
    /// Aggregate this event belongs to.
    pub aggregate_id: String,
    /// Type of the aggregate this event belongs to.
    pub aggregate_type: String,
    /// 1-based version within the aggregate stream.
    pub aggregate_version: i64,
    /// Time the event was appended.
    pub timestamp: DateTime<Utc>,
    /// Event payload.
    pub data: EventData,
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event or command that caused this event.
    pub caused_by: Option<Uuid>,
    /// Correlation ID tracing a business transaction through its effects.
    pub correlation_id: Option<Uuid>,
}

impl DomainEvent {
    /// Returns the stream this event belongs to.
    #[must_use]
    pub fn stream_key(&self) -> StreamKey {
        StreamKey::new(&self.aggregate_type, &self.aggregate_id)
    }

    /// Approximate stored size: the compact JSON encoding of the payload.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        serde_json::to_vec(&self.data).map_or(0, |bytes| bytes.len())
    }
}

/// An event as supplied by a caller of `append_events`, before the store
/// assigns its id, version and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Event type name.
    pub event_type: String,
    /// Event payload.
    pub data: EventData,
    /// Event metadata.
    #[serde(default)]
    pub metadata: EventMetadata,
    /// Event or command that caused this event.
    #[serde(default)]
    pub caused_by: Option<Uuid>,
    /// Correlation ID.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
}

impl NewEvent {
    /// Creates a new event with default metadata.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data: to_event_data(data),
            metadata: EventMetadata::default(),
            caused_by: None,
            correlation_id: None,
        }
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Sets the causation id.
    #[must_use]
    pub fn caused_by(mut self, cause: Uuid) -> Self {
        self.caused_by = Some(cause);
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn correlated_with(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_event_data_keeps_objects() {
        let data = to_event_data(json!({"name": "Ada", "age": 36}));

        assert_eq!(data.len(), 2);
        assert_eq!(data["name"], "Ada");
    }

    #[test]
    fn test_to_event_data_wraps_scalars() {
        let data = to_event_data(json!(42));

        assert_eq!(data["value"], 42);
        assert!(to_event_data(Value::Null).is_empty());
    }

    #[test]
    fn test_new_event_builder_sets_causation_and_correlation() {
        let cause = Uuid::new_v4();
        let correlation = Uuid::new_v4();

        let event = NewEvent::new("UserRegistered", json!({"email": "a@b.c"}))
            .caused_by(cause)
            .correlated_with(correlation);

        assert_eq!(event.caused_by, Some(cause));
        assert_eq!(event.correlation_id, Some(correlation));
        assert_eq!(event.metadata.schema_version, 1);
    }

    #[test]
    fn test_stream_key_display() {
        assert_eq!(StreamKey::new("user", "user-1").to_string(), "user/user-1");
    }
}
