//! Point-in-time event queries.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use eventide_core::event::DomainEvent;
use uuid::Uuid;

/// Filter over the global log. All set filters must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Only events of this aggregate.
    pub aggregate_id: Option<String>,
    /// Only events of this aggregate type.
    pub aggregate_type: Option<String>,
    /// Only events whose type is in the set.
    pub event_types: Option<HashSet<String>>,
    /// Minimum aggregate version (inclusive).
    pub from_version: Option<i64>,
    /// Maximum aggregate version (inclusive).
    pub to_version: Option<i64>,
    /// Earliest timestamp (inclusive).
    pub from_timestamp: Option<DateTime<Utc>>,
    /// Latest timestamp (inclusive).
    pub to_timestamp: Option<DateTime<Utc>>,
    /// Only events carrying this correlation id.
    pub correlation_id: Option<Uuid>,
    /// Only events caused by this event or command.
    pub caused_by: Option<Uuid>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl EventQuery {
    /// Matches every event.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Restricts to one stream.
    #[must_use]
    pub fn stream(mut self, aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Restricts to an aggregate id regardless of type.
    #[must_use]
    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Restricts to the given event types.
    #[must_use]
    pub fn event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    /// Restricts to an inclusive version range.
    #[must_use]
    pub fn versions(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.from_version = from;
        self.to_version = to;
        self
    }

    /// Restricts to an inclusive timestamp range.
    #[must_use]
    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.from_timestamp = from;
        self.to_timestamp = to;
        self
    }

    /// Restricts to a correlation id.
    #[must_use]
    pub fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Restricts to a causation id.
    #[must_use]
    pub fn caused_by(mut self, cause: Uuid) -> Self {
        self.caused_by = Some(cause);
        self
    }

    /// Caps the result size.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether `event` passes every filter.
    #[must_use]
    pub fn matches(&self, event: &DomainEvent) -> bool {
        self.aggregate_id
            .as_ref()
            .is_none_or(|id| *id == event.aggregate_id)
            && self
                .aggregate_type
                .as_ref()
                .is_none_or(|ty| *ty == event.aggregate_type)
            && self
                .event_types
                .as_ref()
                .is_none_or(|types| types.contains(&event.event_type))
            && self.from_version.is_none_or(|v| event.aggregate_version >= v)
            && self.to_version.is_none_or(|v| event.aggregate_version <= v)
            && self.from_timestamp.is_none_or(|t| event.timestamp >= t)
            && self.to_timestamp.is_none_or(|t| event.timestamp <= t)
            && self
                .correlation_id
                .is_none_or(|id| event.correlation_id == Some(id))
            && self.caused_by.is_none_or(|id| event.caused_by == Some(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use eventide_core::event::{EventMetadata, EventData};

    fn event(aggregate_id: &str, event_type: &str, version: i64) -> DomainEvent {
        DomainEvent {
            id: Uuid::new_v4(),
            event_type: event_type.to_owned(),
            aggregate_id: aggregate_id.to_owned(),
            aggregate_type: "order".to_owned(),
            aggregate_version: version,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap(),
            data: EventData::new(),
            metadata: EventMetadata::default(),
            caused_by: None,
            correlation_id: None,
        }
    }

    #[test]
    fn test_empty_query_matches_everything() {
        assert!(EventQuery::all().matches(&event("o-1", "OrderPlaced", 1)));
    }

    #[test]
    fn test_filters_compose_with_and_semantics() {
        let query = EventQuery::all()
            .stream("order", "o-1")
            .event_types(["OrderPlaced"])
            .versions(Some(2), None);

        assert!(query.matches(&event("o-1", "OrderPlaced", 2)));
        assert!(!query.matches(&event("o-1", "OrderPlaced", 1)));
        assert!(!query.matches(&event("o-2", "OrderPlaced", 2)));
        assert!(!query.matches(&event("o-1", "OrderCancelled", 2)));
    }

    #[test]
    fn test_timestamp_and_correlation_filters() {
        let correlation = Uuid::new_v4();
        let mut correlated = event("o-1", "OrderPlaced", 1);
        correlated.correlation_id = Some(correlation);
        let at = correlated.timestamp;

        let query = EventQuery::all()
            .between(Some(at - Duration::minutes(1)), Some(at))
            .correlation_id(correlation);

        assert!(query.matches(&correlated));
        assert!(!query.matches(&event("o-1", "OrderPlaced", 1)));
    }
}
