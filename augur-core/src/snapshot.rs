//! Snapshot support for optimised aggregate loading.
//!
//! Snapshots persist aggregate state at a point in time, reducing the number
//! of events that need to be replayed when loading an aggregate. This module
//! provides:
//!
//! - [`Snapshot`] - Point-in-time aggregate state
//! - [`SnapshotStore`] - Trait for snapshot persistence with policy
//! - [`NoSnapshots`] - No-op implementation; this is the default when
//!   [`AggregateRepository::with_snapshots`](crate::repository::AggregateRepository::with_snapshots)
//!   is not called
//! - [`inmemory`] - In-memory reference implementation with configurable
//!   policy

use std::convert::Infallible;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::aggregate::AggregateType;

pub mod inmemory;

/// Point-in-time snapshot of aggregate state.
///
/// The `version` field is the stream version of the last event folded into
/// the state. When loading an aggregate, only events after this version need
/// to be replayed, so it never exceeds the aggregate's latest persisted
/// version.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// The aggregate's runtime type.
    pub aggregate_type: AggregateType,
    /// The aggregate's identity.
    pub aggregate_id: String,
    /// Serialized aggregate state.
    pub state: Value,
    /// Stream version of the last event folded into `state`.
    pub version: u64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    /// Create a snapshot timestamped now.
    #[must_use]
    pub fn new(
        aggregate_type: AggregateType,
        aggregate_id: impl Into<String>,
        state: Value,
        version: u64,
    ) -> Self {
        Self {
            aggregate_type,
            aggregate_id: aggregate_id.into(),
            state,
            version,
            created_at: Utc::now(),
        }
    }
}

/// Result of offering a snapshot to a store.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SnapshotOffer {
    /// The snapshot store declined to store the snapshot.
    Declined,
    /// The snapshot store stored the snapshot.
    Stored,
}

/// Trait for snapshot persistence with built-in policy.
///
/// Implementations decide both *how* to store snapshots and *when* to accept
/// them: [`save`](Self::save) may decline an offered snapshot (for example
/// when one at the same or a newer version already exists) and reports the
/// decision through [`SnapshotOffer`].
pub trait SnapshotStore {
    /// Error type for snapshot operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Offer a snapshot for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn save(&self, snapshot: Snapshot) -> Result<SnapshotOffer, Self::Error>;

    /// Load the most recent snapshot for an aggregate.
    ///
    /// Returns `Ok(None)` if no snapshot exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn load(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &str,
    ) -> Result<Option<Snapshot>, Self::Error>;

    /// Remove any stored snapshot for an aggregate.
    ///
    /// Removing a missing snapshot is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage fails.
    fn remove(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &str,
    ) -> Result<(), Self::Error>;
}

/// No-op snapshot store.
///
/// Always returns `None` from `load()` and silently declines all offered
/// snapshots. This is the default when snapshots are not needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSnapshots;

impl SnapshotStore for NoSnapshots {
    type Error = Infallible;

    fn save(&self, _snapshot: Snapshot) -> Result<SnapshotOffer, Self::Error> {
        Ok(SnapshotOffer::Declined)
    }

    fn load(
        &self,
        _aggregate_type: &AggregateType,
        _aggregate_id: &str,
    ) -> Result<Option<Snapshot>, Self::Error> {
        Ok(None)
    }

    fn remove(
        &self,
        _aggregate_type: &AggregateType,
        _aggregate_id: &str,
    ) -> Result<(), Self::Error> {
        Ok(())
    }
}
