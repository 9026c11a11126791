//! Persistence layer abstractions.
//!
//! This module describes the storage contract ([`StreamStore`]), stream
//! naming and shapes ([`StreamName`], [`Stream`], [`RecordedStream`]),
//! the error taxonomy ([`StoreError`], [`ConcurrencyConflict`]), and a
//! reference in-memory implementation.
//!
//! A stream is an append-only, strictly version-ordered sequence of events
//! under one name. Streams are created explicitly: appending to a stream
//! that does not exist is an error, not an implicit create. The store owns
//! the atomicity of the expected-version check; this crate adds no locking
//! of its own above it.

use std::fmt;

use thiserror::Error;

use crate::{
    event::{Event, RecordedEvent},
    metadata::MetadataMatcher,
};

pub mod inmemory;

/// Maximum stream name length, in bytes.
pub const MAX_STREAM_NAME_LEN: usize = 200;

/// Error raised when constructing a [`StreamName`] from invalid input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InvalidStreamName {
    /// The name was empty.
    #[error("stream name cannot be empty")]
    Empty,
    /// The name exceeded [`MAX_STREAM_NAME_LEN`] bytes.
    #[error("stream name exceeds {MAX_STREAM_NAME_LEN} bytes: `{0}`")]
    TooLong(String),
}

/// Validated name of one physical stream.
///
/// Non-empty and at most [`MAX_STREAM_NAME_LEN`] bytes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamName(String);

impl StreamName {
    /// Validate and construct a stream name.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidStreamName`] when the name is empty or too long.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidStreamName> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidStreamName::Empty);
        }
        if name.len() > MAX_STREAM_NAME_LEN {
            return Err(InvalidStreamName::TooLong(name));
        }
        Ok(Self(name))
    }

    /// Construct without validation, for names known to be valid.
    pub(crate) fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for StreamName {
    type Err = InvalidStreamName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A named batch of not-yet-recorded events, the input to
/// [`StreamStore::create`].
#[derive(Clone, Debug)]
pub struct Stream {
    /// The stream name.
    pub name: StreamName,
    /// Events to record on creation; may be empty.
    pub events: Vec<Event>,
}

impl Stream {
    /// Create a stream value.
    #[must_use]
    pub fn new(name: StreamName, events: Vec<Event>) -> Self {
        Self { name, events }
    }
}

/// A named, ordered batch of recorded events, the output of
/// [`StreamStore::load`].
#[derive(Clone, Debug)]
pub struct RecordedStream {
    /// The stream name.
    pub name: StreamName,
    /// Events in the requested order.
    pub events: Vec<RecordedEvent>,
}

/// Error indicating an expected-version mismatch during append.
///
/// Two units of work raced on the same stream; exactly one won. The caller
/// decides the policy (typically reload and retry) — the core never retries.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{}", format_conflict(.expected.as_ref(), .actual.as_ref()))]
pub struct ConcurrencyConflict {
    /// The version the appender expected the stream to be at.
    /// `None` or `Some(0)` indicates an empty stream was expected.
    pub expected: Option<u64>,
    /// The stream's actual last version. `None` indicates an empty stream.
    pub actual: Option<u64>,
}

fn format_conflict(expected: Option<&u64>, actual: Option<&u64>) -> String {
    match (
        expected.filter(|v| **v > 0),
        actual.filter(|v| **v > 0),
    ) {
        (None, Some(actual)) => format!(
            "concurrency conflict: expected an empty stream, found version {actual} (hint: \
             another process wrote first; reload and retry)"
        ),
        (Some(expected), Some(actual)) => format!(
            "concurrency conflict: expected version {expected}, found {actual} (hint: stream was \
             modified; reload and retry)"
        ),
        (Some(expected), None) => format!(
            "concurrency conflict: expected version {expected}, found an empty stream (hint: \
             stream was truncated or recreated; reload and retry)"
        ),
        (None, None) => "concurrency conflict: unexpected empty state".to_string(),
    }
}

/// Errors raised by [`StreamStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The target stream does not exist.
    #[error("stream `{0}` was not found")]
    StreamNotFound(StreamName),
    /// A stream with this name already exists.
    #[error("stream `{0}` already exists")]
    StreamAlreadyExists(StreamName),
    /// The expected version did not match at write time.
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyConflict),
}

/// Lazily-evaluated, finite sequence of recorded events.
pub type EventIterator<'a> = Box<dyn Iterator<Item = RecordedEvent> + 'a>;

/// Abstraction over the append-only event log, per stream name.
///
/// Versions are assigned by the store at append time and form a gapless,
/// strictly increasing run starting at 1 within each physical stream. The
/// optional `expected_version` on [`append_to`](Self::append_to) is the
/// optimistic-concurrency hook: when present, the append fails with
/// [`StoreError::Concurrency`] unless it equals the stream's current last
/// version.
pub trait StreamStore {
    /// Create a new stream, recording any initial events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamAlreadyExists`] when the name is taken.
    fn create(&self, stream: Stream) -> Result<(), StoreError>;

    /// Whether a stream with this name exists.
    fn has_stream(&self, name: &StreamName) -> bool;

    /// Delete a stream and all of its events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamNotFound`] when the stream is absent.
    fn delete(&self, name: &StreamName) -> Result<(), StoreError>;

    /// Append events to an existing stream.
    ///
    /// An empty batch performs the expected-version check but records
    /// nothing. An `expected_version` of `Some(0)` asserts the stream
    /// holds no events yet, matching the version a fresh aggregate
    /// reports.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamNotFound`] when the stream is absent, or
    /// [`StoreError::Concurrency`] when `expected_version` is present and
    /// does not match the stream's last version.
    fn append_to(
        &self,
        name: &StreamName,
        events: Vec<Event>,
        expected_version: Option<u64>,
    ) -> Result<(), StoreError>;

    /// Load events with version ≥ `from_version`, in version order.
    ///
    /// Returns `Ok(None)` when the stream does not exist; an existing
    /// stream with no matching events yields an empty
    /// [`RecordedStream`].
    ///
    /// # Errors
    ///
    /// Returns a store-specific failure; the in-memory store is
    /// infallible here.
    fn load(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<Option<RecordedStream>, StoreError>;

    /// Load events with version ≤ `from_version`, newest first.
    ///
    /// Pass `u64::MAX` to read from the end.
    ///
    /// # Errors
    ///
    /// As for [`load`](Self::load).
    fn load_reverse(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<Option<RecordedStream>, StoreError>;

    /// Lazily iterate events with version ≥ `from_version`, in version
    /// order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamNotFound`] when the stream is absent.
    fn load_events(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventIterator<'_>, StoreError>;

    /// Lazily iterate events with version ≤ `from_version`, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StreamNotFound`] when the stream is absent.
    fn load_events_reverse(
        &self,
        name: &StreamName,
        from_version: u64,
        count: Option<usize>,
        matcher: Option<&MetadataMatcher>,
    ) -> Result<EventIterator<'_>, StoreError>;
}
