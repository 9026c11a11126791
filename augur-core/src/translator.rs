//! Bridging between domain objects and event streams.
//!
//! An [`AggregateTranslator`] is the repository's only view of a domain
//! type: it extracts identity, version, type, and pending events, and it
//! rebuilds instances from recorded history. [`EventSourcedTranslator`]
//! covers any [`EventSourced`] type for free; [`ConfigurableTranslator`]
//! assembles the same capabilities from injected closures for domain types
//! that cannot or should not implement the trait.

use thiserror::Error;

use crate::{
    aggregate::{AggregateType, EventSourced},
    event::{Event, RecordedEvent},
};

/// Errors raised while translating between aggregates and events.
#[derive(Debug, Error)]
pub enum TranslationError {
    /// Reconstitution was attempted with no events.
    #[error("cannot reconstitute an aggregate from an empty history")]
    EmptyHistory,
    /// The history belongs to a different aggregate type than requested.
    #[error("history is for aggregate type `{actual}` but `{requested}` was requested")]
    TypeMismatch {
        /// The type the caller asked for.
        requested: AggregateType,
        /// The type the history actually belongs to.
        actual: AggregateType,
    },
    /// A configurable translator was used without the needed capability.
    #[error("translator has no `{0}` capability configured")]
    MissingCapability(&'static str),
}

/// Capability set the repository needs from a domain type.
///
/// All methods take the translator by reference so one translator instance
/// can serve a whole repository.
pub trait AggregateTranslator<A> {
    /// The aggregate's identity.
    fn extract_aggregate_id(&self, aggregate: &A) -> Result<String, TranslationError>;

    /// The version of the last recorded event the aggregate has applied.
    fn extract_aggregate_version(&self, aggregate: &A) -> Result<u64, TranslationError>;

    /// The aggregate's runtime type.
    fn extract_aggregate_type(&self, aggregate: &A) -> Result<AggregateType, TranslationError>;

    /// Drain the events produced since the last commit.
    fn extract_pending_events(&self, aggregate: &mut A) -> Result<Vec<Event>, TranslationError>;

    /// Rebuild an instance of `aggregate_type` from recorded history.
    ///
    /// # Errors
    ///
    /// Fails with [`TranslationError::EmptyHistory`] when `events` is empty,
    /// or [`TranslationError::TypeMismatch`] when the history belongs to a
    /// different type.
    fn reconstitute_from_history(
        &self,
        aggregate_type: &AggregateType,
        events: Vec<RecordedEvent>,
    ) -> Result<A, TranslationError>;

    /// Apply further recorded events to an existing instance.
    fn replay_events(
        &self,
        aggregate: &mut A,
        events: Vec<RecordedEvent>,
    ) -> Result<(), TranslationError>;
}

/// The default translator for [`EventSourced`] types.
///
/// Reconstitution starts from `A::default()` and applies the history in
/// order; replay applies in order. Either way the aggregate's version ends
/// up at the last applied event's stream version.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventSourcedTranslator;

fn apply_all<A: EventSourced>(aggregate: &mut A, events: Vec<RecordedEvent>) {
    for event in events {
        aggregate.apply(&event);
        aggregate.set_version(event.version);
    }
}

impl<A: EventSourced> AggregateTranslator<A> for EventSourcedTranslator {
    fn extract_aggregate_id(&self, aggregate: &A) -> Result<String, TranslationError> {
        Ok(aggregate.aggregate_id())
    }

    fn extract_aggregate_version(&self, aggregate: &A) -> Result<u64, TranslationError> {
        Ok(aggregate.version())
    }

    fn extract_aggregate_type(&self, _aggregate: &A) -> Result<AggregateType, TranslationError> {
        Ok(AggregateType::of::<A>())
    }

    fn extract_pending_events(&self, aggregate: &mut A) -> Result<Vec<Event>, TranslationError> {
        Ok(aggregate.pop_pending_events())
    }

    fn reconstitute_from_history(
        &self,
        aggregate_type: &AggregateType,
        events: Vec<RecordedEvent>,
    ) -> Result<A, TranslationError> {
        if events.is_empty() {
            return Err(TranslationError::EmptyHistory);
        }
        let declared = AggregateType::of::<A>();
        if *aggregate_type != declared {
            return Err(TranslationError::TypeMismatch {
                requested: aggregate_type.clone(),
                actual: declared,
            });
        }
        let mut aggregate = A::default();
        apply_all(&mut aggregate, events);
        Ok(aggregate)
    }

    fn replay_events(
        &self,
        aggregate: &mut A,
        events: Vec<RecordedEvent>,
    ) -> Result<(), TranslationError> {
        apply_all(aggregate, events);
        Ok(())
    }
}

type IdFn<A> = Box<dyn Fn(&A) -> String>;
type VersionFn<A> = Box<dyn Fn(&A) -> u64>;
type TypeFn<A> = Box<dyn Fn(&A) -> AggregateType>;
type PendingFn<A> = Box<dyn Fn(&mut A) -> Vec<Event>>;
type ReconstituteFn<A> =
    Box<dyn Fn(&AggregateType, Vec<RecordedEvent>) -> Result<A, TranslationError>>;
type ReplayFn<A> = Box<dyn Fn(&mut A, Vec<RecordedEvent>)>;

/// A translator assembled from injected closures.
///
/// Each capability is an optional slot; calls against an unconfigured slot
/// fail with [`TranslationError::MissingCapability`] naming the slot. This
/// keeps domain types free of any library trait: identity extraction,
/// reconstitution, and event adaption live in the closures instead.
pub struct ConfigurableTranslator<A> {
    id: Option<IdFn<A>>,
    version: Option<VersionFn<A>>,
    aggregate_type: Option<TypeFn<A>>,
    pending: Option<PendingFn<A>>,
    reconstitute: Option<ReconstituteFn<A>>,
    replay: Option<ReplayFn<A>>,
}

impl<A> ConfigurableTranslator<A> {
    /// Create a translator with no capabilities configured.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: None,
            version: None,
            aggregate_type: None,
            pending: None,
            reconstitute: None,
            replay: None,
        }
    }

    /// Configure identity extraction.
    #[must_use]
    pub fn with_aggregate_id(mut self, f: impl Fn(&A) -> String + 'static) -> Self {
        self.id = Some(Box::new(f));
        self
    }

    /// Configure version extraction.
    #[must_use]
    pub fn with_aggregate_version(mut self, f: impl Fn(&A) -> u64 + 'static) -> Self {
        self.version = Some(Box::new(f));
        self
    }

    /// Configure runtime type extraction.
    #[must_use]
    pub fn with_aggregate_type(mut self, f: impl Fn(&A) -> AggregateType + 'static) -> Self {
        self.aggregate_type = Some(Box::new(f));
        self
    }

    /// Configure draining of pending events.
    #[must_use]
    pub fn with_pending_events(mut self, f: impl Fn(&mut A) -> Vec<Event> + 'static) -> Self {
        self.pending = Some(Box::new(f));
        self
    }

    /// Configure reconstitution from history.
    #[must_use]
    pub fn with_reconstitution(
        mut self,
        f: impl Fn(&AggregateType, Vec<RecordedEvent>) -> Result<A, TranslationError> + 'static,
    ) -> Self {
        self.reconstitute = Some(Box::new(f));
        self
    }

    /// Configure replay of further events onto an instance.
    #[must_use]
    pub fn with_replay(mut self, f: impl Fn(&mut A, Vec<RecordedEvent>) + 'static) -> Self {
        self.replay = Some(Box::new(f));
        self
    }
}

impl<A> Default for ConfigurableTranslator<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> AggregateTranslator<A> for ConfigurableTranslator<A> {
    fn extract_aggregate_id(&self, aggregate: &A) -> Result<String, TranslationError> {
        let f = self
            .id
            .as_ref()
            .ok_or(TranslationError::MissingCapability("aggregate-id"))?;
        Ok(f(aggregate))
    }

    fn extract_aggregate_version(&self, aggregate: &A) -> Result<u64, TranslationError> {
        let f = self
            .version
            .as_ref()
            .ok_or(TranslationError::MissingCapability("aggregate-version"))?;
        Ok(f(aggregate))
    }

    fn extract_aggregate_type(&self, aggregate: &A) -> Result<AggregateType, TranslationError> {
        let f = self
            .aggregate_type
            .as_ref()
            .ok_or(TranslationError::MissingCapability("aggregate-type"))?;
        Ok(f(aggregate))
    }

    fn extract_pending_events(&self, aggregate: &mut A) -> Result<Vec<Event>, TranslationError> {
        let f = self
            .pending
            .as_ref()
            .ok_or(TranslationError::MissingCapability("pending-events"))?;
        Ok(f(aggregate))
    }

    fn reconstitute_from_history(
        &self,
        aggregate_type: &AggregateType,
        events: Vec<RecordedEvent>,
    ) -> Result<A, TranslationError> {
        let f = self
            .reconstitute
            .as_ref()
            .ok_or(TranslationError::MissingCapability("reconstitution"))?;
        f(aggregate_type, events)
    }

    fn replay_events(
        &self,
        aggregate: &mut A,
        events: Vec<RecordedEvent>,
    ) -> Result<(), TranslationError> {
        let f = self
            .replay
            .as_ref()
            .ok_or(TranslationError::MissingCapability("replay"))?;
        f(aggregate, events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[derive(Debug, Default, PartialEq)]
    struct Counter {
        id: String,
        count: i64,
        version: u64,
        pending: Vec<Event>,
    }

    impl EventSourced for Counter {
        const KIND: &'static str = "counter";

        fn aggregate_id(&self) -> String {
            self.id.clone()
        }

        fn version(&self) -> u64 {
            self.version
        }

        fn set_version(&mut self, version: u64) {
            self.version = version;
        }

        fn apply(&mut self, event: &RecordedEvent) {
            match event.name.as_str() {
                "created" => {
                    self.id = event
                        .payload
                        .get("id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                }
                "incremented" => self.count += 1,
                _ => {}
            }
        }

        fn pop_pending_events(&mut self) -> Vec<Event> {
            std::mem::take(&mut self.pending)
        }
    }

    fn history() -> Vec<RecordedEvent> {
        vec![
            Event::new("created", json!({"id": "c-1"})).record(1),
            Event::new("incremented", json!({})).record(2),
            Event::new("incremented", json!({})).record(3),
        ]
    }

    #[test]
    fn reconstitute_replays_history_in_order() {
        let translator = EventSourcedTranslator;
        let counter: Counter = translator
            .reconstitute_from_history(&AggregateType::of::<Counter>(), history())
            .unwrap();
        assert_eq!(counter.id, "c-1");
        assert_eq!(counter.count, 2);
        assert_eq!(counter.version, 3);
    }

    #[test]
    fn reconstitute_rejects_empty_history() {
        let translator = EventSourcedTranslator;
        let result: Result<Counter, _> =
            translator.reconstitute_from_history(&AggregateType::of::<Counter>(), Vec::new());
        assert!(matches!(result, Err(TranslationError::EmptyHistory)));
    }

    #[test]
    fn reconstitute_rejects_foreign_type() {
        let translator = EventSourcedTranslator;
        let other = AggregateType::new("invoice").unwrap();
        let result: Result<Counter, _> = translator.reconstitute_from_history(&other, history());
        assert!(matches!(result, Err(TranslationError::TypeMismatch { .. })));
    }

    #[test]
    fn replay_adopts_last_event_version() {
        let translator = EventSourcedTranslator;
        let mut counter = Counter {
            id: "c-1".to_string(),
            count: 2,
            version: 3,
            pending: Vec::new(),
        };
        let later = vec![Event::new("incremented", json!({})).record(7)];
        translator.replay_events(&mut counter, later).unwrap();
        assert_eq!(counter.count, 3);
        assert_eq!(counter.version, 7);
    }

    #[test]
    fn pending_events_drain_once() {
        let translator = EventSourcedTranslator;
        let mut counter = Counter {
            pending: vec![Event::new("incremented", json!({}))],
            ..Counter::default()
        };
        assert_eq!(translator.extract_pending_events(&mut counter).unwrap().len(), 1);
        assert!(translator.extract_pending_events(&mut counter).unwrap().is_empty());
    }

    #[test]
    fn configurable_translator_reports_missing_capability() {
        let translator: ConfigurableTranslator<Counter> = ConfigurableTranslator::new();
        let counter = Counter::default();
        match translator.extract_aggregate_id(&counter) {
            Err(TranslationError::MissingCapability(slot)) => assert_eq!(slot, "aggregate-id"),
            other => panic!("expected missing capability, got {other:?}"),
        }
    }

    #[test]
    fn configurable_translator_uses_injected_closures() {
        let translator = ConfigurableTranslator::new()
            .with_aggregate_id(|c: &Counter| c.id.clone())
            .with_aggregate_version(|c: &Counter| c.version)
            .with_aggregate_type(|_| AggregateType::new("counter").unwrap());

        let counter = Counter {
            id: "c-9".to_string(),
            version: 4,
            ..Counter::default()
        };
        assert_eq!(translator.extract_aggregate_id(&counter).unwrap(), "c-9");
        assert_eq!(translator.extract_aggregate_version(&counter).unwrap(), 4);
        assert_eq!(
            translator.extract_aggregate_type(&counter).unwrap().as_str(),
            "counter"
        );
    }
}
