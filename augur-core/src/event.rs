//! Domain event envelopes.
//!
//! [`Event`] is the pre-append form of a domain fact: it has an identity, a
//! name, an opaque payload, and metadata, but no version. The store assigns
//! the version on append, producing a [`RecordedEvent`]. This is the boundary
//! between "the aggregate produced a fact" and "the fact is durable".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Reserved metadata key carrying the owning aggregate's identifier.
pub const AGGREGATE_ID: &str = "aggregate_id";

/// Reserved metadata key carrying the owning aggregate's type.
pub const AGGREGATE_TYPE: &str = "aggregate_type";

/// Event metadata: a string-to-scalar mapping.
///
/// Values are [`serde_json::Value`]s; by convention they are scalars
/// (strings, numbers, booleans). The keys [`AGGREGATE_ID`] and
/// [`AGGREGATE_TYPE`] are reserved for the stream strategies.
pub type Metadata = BTreeMap<String, Value>;

/// A domain event that has not yet been appended to a stream.
///
/// Versionless by design: versions are assigned by the store at append time
/// so that they are strictly increasing per physical stream regardless of
/// how many aggregates share that stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique event identifier.
    pub id: Uuid,
    /// Event name, used for projection dispatch.
    pub name: String,
    /// Opaque payload; serialization format is the caller's concern.
    pub payload: Value,
    /// String-to-scalar metadata.
    pub metadata: Metadata,
    /// When the fact occurred.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Create an event with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            payload,
            metadata: Metadata::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata entry, returning the modified event.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Override the occurrence timestamp.
    ///
    /// Merge ordering across streams is only as consistent as this
    /// timestamp source, so tests and importers of historical data set it
    /// explicitly.
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Look up a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Promote this event to its recorded form at the given version.
    #[must_use]
    pub fn record(self, version: u64) -> RecordedEvent {
        RecordedEvent {
            id: self.id,
            name: self.name,
            payload: self.payload,
            metadata: self.metadata,
            version,
            created_at: self.created_at,
        }
    }
}

/// An event as persisted in a stream, with its store-assigned version.
///
/// Immutable once appended; versions within one stream form a gapless run
/// starting at 1.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Event name.
    pub name: String,
    /// Opaque payload.
    pub payload: Value,
    /// String-to-scalar metadata.
    pub metadata: Metadata,
    /// Position within the physical stream, starting at 1.
    pub version: u64,
    /// When the fact occurred.
    pub created_at: DateTime<Utc>,
}

impl RecordedEvent {
    /// Look up a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Look up a metadata value as a string.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn new_event_has_fresh_identity_and_empty_metadata() {
        let a = Event::new("funds-deposited", json!({"amount": 10}));
        let b = Event::new("funds-deposited", json!({"amount": 10}));
        assert_ne!(a.id, b.id);
        assert!(a.metadata.is_empty());
    }

    #[test]
    fn with_metadata_accumulates_entries() {
        let event = Event::new("funds-deposited", json!({}))
            .with_metadata(AGGREGATE_ID, json!("acc-1"))
            .with_metadata(AGGREGATE_TYPE, json!("account"));
        assert_eq!(event.metadata_value(AGGREGATE_ID), Some(&json!("acc-1")));
        assert_eq!(
            event.metadata_value(AGGREGATE_TYPE),
            Some(&json!("account"))
        );
    }

    #[test]
    fn record_preserves_envelope_and_sets_version() {
        let event = Event::new("funds-deposited", json!({"amount": 10}));
        let id = event.id;
        let recorded = event.record(7);
        assert_eq!(recorded.id, id);
        assert_eq!(recorded.version, 7);
        assert_eq!(recorded.name, "funds-deposited");
    }

    #[test]
    fn metadata_str_rejects_non_string_values() {
        let recorded = Event::new("e", json!({}))
            .with_metadata("count", json!(3))
            .record(1);
        assert_eq!(recorded.metadata_str("count"), None);
        assert_eq!(recorded.metadata_value("count"), Some(&json!(3)));
    }
}
