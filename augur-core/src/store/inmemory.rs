//! In-memory stream store implementation for testing.
//!
//! This module provides [`Store`], a thread-safe in-memory implementation of
//! [`StreamStore`](super::StreamStore) suitable for unit tests and examples.
//!
//! # Example
//!
//! ```
//! use augur_core::store::inmemory;
//!
//! let store = inmemory::Store::new();
//! ```

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use crate::{
    event::{Event, RecordedEvent},
    metadata::MetadataMatcher,
    store::{
        ConcurrencyConflict, EventIterator, RecordedStream, StoreError, Stream, StreamName,
        StreamStore,
    },
};

/// In-memory stream store that keeps streams in a hash map.
///
/// Cloning the store clones a handle to the same underlying streams, so a
/// store can be shared between a repository and a projection in one test.
///
/// Versions are derived from each stream's last event, so a deleted and
/// recreated stream restarts at version 1.
#[derive(Clone)]
pub struct Store {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<StreamName, Vec<RecordedEvent>>,
}

impl Store {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Names of all existing streams, in no particular order.
    #[must_use]
    pub fn stream_names(&self) -> Vec<StreamName> {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        inner.streams.keys().cloned().collect()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

fn record_all(events: Vec<Event>, last_version: u64) -> Vec<RecordedEvent> {
    events
        .into_iter()
        .zip(last_version + 1..)
        .map(|(event, version)| event.record(version))
        .collect()
}

fn matches(matcher: Option<&MetadataMatcher>, event: &RecordedEvent) -> bool {
    matcher.is_none_or(|m| m.matches(event))
}

impl StreamStore for Store {
    #[tracing::instrument(skip(self, stream), fields(stream = %stream.name, event_count = stream.events.len()))]
    fn create(&self, stream: Stream) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        if inner.streams.contains_key(&stream.name) {
            return Err(StoreError::StreamAlreadyExists(stream.name));
        }
        let recorded = record_all(stream.events, 0);
        tracing::debug!(events_recorded = recorded.len(), "stream created");
        inner.streams.insert(stream.name, recorded);
        Ok(())
    }

    fn has_stream(&self, name: &StreamName) -> bool {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        inner.streams.contains_key(name)
    }

    #[tracing::instrument(skip(self))]
    fn delete(&self, name: &StreamName) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        if inner.streams.remove(name).is_none() {
            return Err(StoreError::StreamNotFound(name.clone()));
        }
        tracing::debug!(stream = %name, "stream deleted");
        Ok(())
    }

    #[tracing::instrument(skip(self, events), fields(stream = %name, event_count = events.len()))]
    fn append_to(
        &self,
        name: &StreamName,
        events: Vec<Event>,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("in-memory store lock poisoned");
        let Some(stream) = inner.streams.get_mut(name) else {
            return Err(StoreError::StreamNotFound(name.clone()));
        };

        let current = stream.last().map(|e| e.version);
        if let Some(expected) = expected_version
            && current.unwrap_or(0) != expected
        {
            tracing::debug!(?expected_version, ?current, "version mismatch, rejecting append");
            return Err(ConcurrencyConflict {
                expected: Some(expected),
                actual: current,
            }
            .into());
        }

        let appended = events.len();
        stream.extend(record_all(events, current.unwrap_or(0)));
        drop(inner);
        tracing::debug!(events_appended = appended, "events appended to stream");
        Ok(())
    }

    fn load(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<Option<RecordedStream>, StoreError> {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        let Some(stream) = inner.streams.get(name) else {
            return Ok(None);
        };
        let events = stream
            .iter()
            .filter(|e| e.version >= from_version && matches(matcher, e))
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(Some(RecordedStream {
            name: name.clone(),
            events,
        }))
    }

    fn load_reverse(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<Option<RecordedStream>, StoreError> {
        let inner = self.inner.read().expect("in-memory store lock poisoned");
        let Some(stream) = inner.streams.get(name) else {
            return Ok(None);
        };
        let events = stream
            .iter()
            .rev()
            .filter(|e| e.version <= from_version && matches(matcher, e))
            .take(count.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(Some(RecordedStream {
            name: name.clone(),
            events,
        }))
    }

    fn load_events(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventIterator<'_>, StoreError> {
        let stream = self
            .load(name, from_version, count, matcher)?
            .ok_or_else(|| StoreError::StreamNotFound(name.clone()))?;
        Ok(Box::new(stream.events.into_iter()))
    }

    fn load_events_reverse(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventIterator<'_>, StoreError> {
        let stream = self
            .load_reverse(name, from_version, count, matcher)?
            .ok_or_else(|| StoreError::StreamNotFound(name.clone()))?;
        Ok(Box::new(stream.events.into_iter()))
    }
}
