//! Stream naming strategies.
//!
//! A [`StreamStrategy`] decides how aggregate events map onto physical
//! streams: one stream per aggregate, one per aggregate type, a single
//! system-wide stream, or a stream shared by the subtypes of a declared
//! supertype. The shared variants tag events with the reserved metadata
//! keys so reads can filter a mixed stream back apart.
//!
//! Shared streams must exist before the first write; only
//! [`StreamStrategy::PerAggregate`] creates its stream implicitly when an
//! aggregate is registered.

use serde_json::json;
use thiserror::Error;

use crate::{
    aggregate::{AggregateType, AggregateTypeError},
    event::{AGGREGATE_ID, AGGREGATE_TYPE, Event, RecordedEvent},
    metadata::{MatcherError, MetadataMatcher},
    store::{StoreError, Stream, StreamName, StreamStore},
};

/// Default name of the system-wide stream used by
/// [`StreamStrategy::single_stream`].
pub const DEFAULT_SINGLE_STREAM: &str = "event_stream";

/// Errors raised by strategy operations.
#[derive(Debug, Error)]
pub enum StrategyError {
    /// The underlying store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// A shared-stream event is missing its `aggregate_type` tag.
    #[error("event in stream `{0}` has no `aggregate_type` tag")]
    MissingTypeTag(StreamName),
    /// The recovered runtime type is not valid for the declared type.
    #[error(transparent)]
    Type(#[from] AggregateTypeError),
    /// A read filter could not be constructed.
    #[error(transparent)]
    Matcher(#[from] MatcherError),
}

/// How aggregate events map onto physical streams.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamStrategy {
    /// One stream per aggregate instance, named `«type»-«id»`.
    ///
    /// No metadata tagging; the stream itself is the filter.
    PerAggregate,
    /// One stream per aggregate type, named after the type.
    ///
    /// Events are tagged with `aggregate_id`; reads filter on it.
    PerType,
    /// One system-wide stream for every aggregate.
    ///
    /// Events are tagged with `aggregate_id` and `aggregate_type`; reads
    /// filter on both.
    SingleStream {
        /// The shared stream's name.
        stream: StreamName,
    },
    /// Subtypes of a declared supertype share the supertype's stream.
    ///
    /// Events are tagged with `aggregate_id` and the concrete
    /// `aggregate_type`; a read filters by id and reports the concrete
    /// type it found.
    SharedSubclass {
        /// Types allowed in the stream besides the declared supertype.
        subtypes: Vec<AggregateType>,
    },
}

impl StreamStrategy {
    /// The single-stream strategy over the default stream name.
    #[must_use]
    pub fn single_stream() -> Self {
        Self::SingleStream {
            stream: StreamName::new_unchecked(DEFAULT_SINGLE_STREAM),
        }
    }

    /// The physical stream for `id` under the declared type.
    #[must_use]
    pub fn stream_name(&self, declared: &AggregateType, id: &str) -> StreamName {
        match self {
            Self::PerAggregate => StreamName::new_unchecked(format!("{declared}-{id}")),
            Self::PerType | Self::SharedSubclass { .. } => {
                StreamName::new_unchecked(declared.as_str())
            }
            Self::SingleStream { stream } => stream.clone(),
        }
    }

    /// Check a runtime type against the declared type.
    ///
    /// Under [`SharedSubclass`](Self::SharedSubclass) any registered
    /// subtype passes; every other strategy requires equality.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateTypeError::Mismatch`] naming both types.
    pub fn assert_aggregate_type(
        &self,
        declared: &AggregateType,
        runtime: &AggregateType,
    ) -> Result<(), AggregateTypeError> {
        let allowed = match self {
            Self::SharedSubclass { subtypes } => {
                runtime == declared || subtypes.contains(runtime)
            }
            _ => runtime == declared,
        };
        if allowed {
            Ok(())
        } else {
            Err(AggregateTypeError::Mismatch {
                declared: declared.clone(),
                actual: runtime.clone(),
            })
        }
    }

    fn tag(&self, event: Event, runtime: &AggregateType, id: &str) -> Event {
        match self {
            Self::PerAggregate => event,
            Self::PerType => event.with_metadata(AGGREGATE_ID, json!(id)),
            Self::SingleStream { .. } | Self::SharedSubclass { .. } => event
                .with_metadata(AGGREGATE_ID, json!(id))
                .with_metadata(AGGREGATE_TYPE, json!(runtime.as_str())),
        }
    }

    fn tag_all(&self, events: Vec<Event>, runtime: &AggregateType, id: &str) -> Vec<Event> {
        events
            .into_iter()
            .map(|event| self.tag(event, runtime, id))
            .collect()
    }

    fn read_matcher(&self, id: &str, declared: &AggregateType) -> Result<Option<MetadataMatcher>, MatcherError> {
        match self {
            Self::PerAggregate => Ok(None),
            Self::PerType | Self::SharedSubclass { .. } => {
                Ok(Some(MetadataMatcher::new().and_metadata_eq(AGGREGATE_ID, json!(id))?))
            }
            Self::SingleStream { .. } => Ok(Some(
                MetadataMatcher::new()
                    .and_metadata_eq(AGGREGATE_ID, json!(id))?
                    .and_metadata_eq(AGGREGATE_TYPE, json!(declared.as_str()))?,
            )),
        }
    }

    /// First write for an aggregate.
    ///
    /// Creates the stream under [`PerAggregate`](Self::PerAggregate);
    /// appends to the pre-created shared stream otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Store`] when the per-aggregate stream
    /// already exists or a shared stream is missing.
    #[tracing::instrument(skip(self, store, events), fields(aggregate_type = %runtime, aggregate_id = id, event_count = events.len()))]
    pub fn register<S: StreamStore>(
        &self,
        store: &S,
        declared: &AggregateType,
        runtime: &AggregateType,
        id: &str,
        events: Vec<Event>,
    ) -> Result<(), StrategyError> {
        let name = self.stream_name(declared, id);
        let events = self.tag_all(events, runtime, id);
        match self {
            Self::PerAggregate => store.create(Stream::new(name, events))?,
            _ => store.append_to(&name, events, None)?,
        }
        Ok(())
    }

    /// Append further events for an existing aggregate.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::Store`] on a missing stream or a failed
    /// expected-version check.
    #[tracing::instrument(skip(self, store, events), fields(aggregate_type = %runtime, aggregate_id = id, event_count = events.len()))]
    pub fn append_events<S: StreamStore>(
        &self,
        store: &S,
        declared: &AggregateType,
        runtime: &AggregateType,
        id: &str,
        events: Vec<Event>,
        expected_version: Option<u64>,
    ) -> Result<(), StrategyError> {
        let name = self.stream_name(declared, id);
        let events = self.tag_all(events, runtime, id);
        store.append_to(&name, events, expected_version)?;
        Ok(())
    }

    /// Read an aggregate's events at or after `from_version`.
    ///
    /// Returns the concrete runtime type alongside the events. Under the
    /// shared-stream strategies the type is recovered from the first
    /// matching event's `aggregate_type` tag; elsewhere it is the declared
    /// type. `None` means the stream is missing or holds no matching
    /// events.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::MissingTypeTag`] when a shared-stream
    /// event carries no type tag, or [`StrategyError::Type`] when the
    /// recovered type is not valid for the declared type.
    #[tracing::instrument(skip(self, store), fields(aggregate_id = id))]
    pub fn read<S: StreamStore>(
        &self,
        store: &S,
        declared: &AggregateType,
        id: &str,
        from_version: u64,
    ) -> Result<Option<(AggregateType, Vec<RecordedEvent>)>, StrategyError> {
        let name = self.stream_name(declared, id);
        let matcher = self.read_matcher(id, declared)?;
        let Some(stream) = store.load(&name, from_version, None, matcher.as_ref())? else {
            return Ok(None);
        };
        let Some(first) = stream.events.first() else {
            return Ok(None);
        };

        let resolved = match self {
            Self::PerAggregate | Self::PerType => declared.clone(),
            Self::SingleStream { .. } | Self::SharedSubclass { .. } => {
                let tag = first
                    .metadata_str(AGGREGATE_TYPE)
                    .ok_or_else(|| StrategyError::MissingTypeTag(name.clone()))?;
                let runtime = AggregateType::new(tag).map_err(StrategyError::Type)?;
                self.assert_aggregate_type(declared, &runtime)?;
                runtime
            }
        };
        tracing::trace!(events_read = stream.events.len(), resolved = %resolved, "aggregate events read");
        Ok(Some((resolved, stream.events)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::inmemory;

    fn kind(s: &str) -> AggregateType {
        AggregateType::new(s).unwrap()
    }

    fn event(name: &str) -> Event {
        Event::new(name, json!({}))
    }

    #[test]
    fn per_aggregate_combines_type_and_id() {
        let strategy = StreamStrategy::PerAggregate;
        assert_eq!(
            strategy.stream_name(&kind("account"), "a-1").as_str(),
            "account-a-1"
        );
    }

    #[test]
    fn per_aggregate_register_creates_the_stream() {
        let store = inmemory::Store::new();
        let strategy = StreamStrategy::PerAggregate;
        let account = kind("account");
        strategy
            .register(&store, &account, &account, "a-1", vec![event("opened")])
            .unwrap();

        let (resolved, events) = strategy.read(&store, &account, "a-1", 1).unwrap().unwrap();
        assert_eq!(resolved, account);
        assert_eq!(events.len(), 1);
        assert!(events[0].metadata.is_empty());
    }

    #[test]
    fn per_type_isolates_aggregates_by_id_tag() {
        let store = inmemory::Store::new();
        let strategy = StreamStrategy::PerType;
        let account = kind("account");
        store
            .create(Stream::new(StreamName::new("account").unwrap(), Vec::new()))
            .unwrap();

        strategy
            .register(&store, &account, &account, "a-1", vec![event("opened")])
            .unwrap();
        strategy
            .register(&store, &account, &account, "a-2", vec![event("opened"), event("closed")])
            .unwrap();

        let (_, events) = strategy.read(&store, &account, "a-2", 1).unwrap().unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.metadata_str(AGGREGATE_ID) == Some("a-2")));
    }

    #[test]
    fn shared_stream_register_requires_precreated_stream() {
        let store = inmemory::Store::new();
        let strategy = StreamStrategy::single_stream();
        let account = kind("account");
        let result = strategy.register(&store, &account, &account, "a-1", vec![event("opened")]);
        assert!(matches!(
            result,
            Err(StrategyError::Store(StoreError::StreamNotFound(_)))
        ));
    }

    #[test]
    fn single_stream_filters_by_id_and_type() {
        let store = inmemory::Store::new();
        let strategy = StreamStrategy::single_stream();
        store
            .create(Stream::new(
                StreamName::new(DEFAULT_SINGLE_STREAM).unwrap(),
                Vec::new(),
            ))
            .unwrap();

        let account = kind("account");
        let invoice = kind("invoice");
        strategy
            .register(&store, &account, &account, "x-1", vec![event("opened")])
            .unwrap();
        strategy
            .register(&store, &invoice, &invoice, "x-1", vec![event("issued")])
            .unwrap();

        let (resolved, events) = strategy.read(&store, &account, "x-1", 1).unwrap().unwrap();
        assert_eq!(resolved, account);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name, "opened");
    }

    #[test]
    fn shared_subclass_recovers_concrete_type() {
        let store = inmemory::Store::new();
        let vehicle = kind("vehicle");
        let car = kind("car");
        let strategy = StreamStrategy::SharedSubclass {
            subtypes: vec![car.clone()],
        };
        store
            .create(Stream::new(StreamName::new("vehicle").unwrap(), Vec::new()))
            .unwrap();

        strategy
            .register(&store, &vehicle, &car, "v-1", vec![event("registered")])
            .unwrap();

        let (resolved, events) = strategy.read(&store, &vehicle, "v-1", 1).unwrap().unwrap();
        assert_eq!(resolved, car);
        assert_eq!(events[0].metadata_str(AGGREGATE_TYPE), Some("car"));
    }

    #[test]
    fn shared_subclass_rejects_unregistered_subtype() {
        let vehicle = kind("vehicle");
        let strategy = StreamStrategy::SharedSubclass {
            subtypes: vec![kind("car")],
        };
        assert!(strategy.assert_aggregate_type(&vehicle, &kind("boat")).is_err());
        assert!(strategy.assert_aggregate_type(&vehicle, &kind("car")).is_ok());
        assert!(strategy.assert_aggregate_type(&vehicle, &vehicle).is_ok());
    }

    #[test]
    fn untagged_single_stream_event_is_invisible() {
        let store = inmemory::Store::new();
        let strategy = StreamStrategy::single_stream();
        let account = kind("account");
        let stray = event("opened").with_metadata(AGGREGATE_ID, json!("a-1"));
        store
            .create(Stream::new(
                StreamName::new(DEFAULT_SINGLE_STREAM).unwrap(),
                vec![stray],
            ))
            .unwrap();

        // The id matches but the type tag is absent, so the matcher drops it.
        let result = strategy.read(&store, &account, "a-1", 1).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn untagged_subclass_event_fails_type_recovery() {
        let store = inmemory::Store::new();
        let vehicle = kind("vehicle");
        let strategy = StreamStrategy::SharedSubclass {
            subtypes: vec![kind("car")],
        };
        let stray = event("registered").with_metadata(AGGREGATE_ID, json!("v-1"));
        store
            .create(Stream::new(StreamName::new("vehicle").unwrap(), vec![stray]))
            .unwrap();

        let result = strategy.read(&store, &vehicle, "v-1", 1);
        assert!(matches!(result, Err(StrategyError::MissingTypeTag(_))));
    }

    #[test]
    fn read_missing_aggregate_returns_none() {
        let store = inmemory::Store::new();
        let strategy = StreamStrategy::PerAggregate;
        assert!(strategy.read(&store, &kind("account"), "nope", 1).unwrap().is_none());
    }
}
