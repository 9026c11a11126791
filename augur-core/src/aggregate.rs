//! Aggregate identity and the event-sourced capability contract.
//!
//! [`AggregateType`] names a class of aggregates at runtime; it keys stream
//! names and the `aggregate_type` metadata tag. [`EventSourced`] is the
//! capability contract the default translator works against: anything that
//! can report its identity and version, replay recorded events, and hand
//! over the events it has produced since the last commit.

use std::fmt;

use thiserror::Error;

use crate::event::{Event, RecordedEvent};

/// Errors concerning aggregate type identity.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AggregateTypeError {
    /// The type name was empty.
    #[error("aggregate type cannot be empty")]
    Empty,
    /// The runtime type did not match what the repository was declared for.
    #[error("aggregate type mismatch: declared `{declared}`, found `{actual}`")]
    Mismatch {
        /// The type the repository handles.
        declared: AggregateType,
        /// The type observed at runtime.
        actual: AggregateType,
    },
}

/// Runtime name of an aggregate class.
///
/// Use lowercase, kebab-case for consistency: `"product"`, `"user-account"`,
/// etc. The name participates in stream names, so it is subject to their
/// length limit in practice.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateType(String);

impl AggregateType {
    /// Validate and construct an aggregate type name.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateTypeError::Empty`] when the name is empty.
    pub fn new(name: impl Into<String>) -> Result<Self, AggregateTypeError> {
        let name = name.into();
        if name.is_empty() {
            return Err(AggregateTypeError::Empty);
        }
        Ok(Self(name))
    }

    /// The declared type of an [`EventSourced`] implementation.
    #[must_use]
    pub fn of<A: EventSourced>() -> Self {
        Self(A::KIND.to_string())
    }

    /// The name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AggregateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AggregateType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Capability contract for event-sourced aggregates.
///
/// Implementations keep three pieces of bookkeeping next to their domain
/// state: the aggregate id, the version of the last recorded event applied,
/// and the events produced since the last commit. The repository and the
/// default translator drive everything else.
///
/// `Default` is the blank pre-history state used for reconstitution.
///
/// ```ignore
/// #[derive(Default)]
/// struct Account {
///     id: String,
///     balance: i64,
///     version: u64,
///     pending: Vec<Event>,
/// }
///
/// impl EventSourced for Account {
///     const KIND: &'static str = "account";
///
///     fn aggregate_id(&self) -> String {
///         self.id.clone()
///     }
///     // ...
/// }
/// ```
pub trait EventSourced: Default + Sized {
    /// Aggregate type identifier.
    ///
    /// Combined with the aggregate id to form stream names. Use lowercase,
    /// kebab-case: `"product"`, `"user-account"`, etc.
    const KIND: &'static str;

    /// This instance's identity.
    fn aggregate_id(&self) -> String;

    /// Version of the last recorded event applied to this instance.
    ///
    /// Zero before any history has been replayed.
    fn version(&self) -> u64;

    /// Record a new version after replay.
    fn set_version(&mut self, version: u64);

    /// Mutate state with one recorded event.
    ///
    /// Called during replay in version order. Implementations update domain
    /// state only; version bookkeeping is the caller's job via
    /// [`set_version`](Self::set_version).
    fn apply(&mut self, event: &RecordedEvent);

    /// Drain the events produced since the last commit.
    ///
    /// After this call the instance holds no pending events.
    fn pop_pending_events(&mut self) -> Vec<Event>;
}
