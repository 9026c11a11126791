//! In-memory snapshot store implementation.

use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{Arc, RwLock},
};

use crate::aggregate::AggregateType;

use super::{Snapshot, SnapshotOffer, SnapshotStore};

/// Snapshot store policy for when to accept snapshot offers.
///
/// - [`SnapshotPolicy::Always`]: accept every offered snapshot (high storage
///   cost, minimal replay)
/// - [`SnapshotPolicy::EveryNEvents`]: accept a snapshot only when it is at
///   least N versions ahead of the stored one (balanced approach)
/// - [`SnapshotPolicy::Never`]: never accept snapshots (load-only mode)
///
/// Regardless of policy, an offer at or below the stored snapshot's version
/// is declined, so a stale writer can never roll a snapshot backwards.
#[derive(Clone, Debug)]
pub enum SnapshotPolicy {
    /// Accept every offered snapshot.
    Always,
    /// Accept only when at least N versions ahead of the stored snapshot.
    EveryNEvents(u64),
    /// Never accept snapshots (load-only mode).
    Never,
}

impl SnapshotPolicy {
    /// Whether a snapshot should be accepted, given how many versions ahead
    /// of the stored one it is.
    #[must_use]
    pub const fn should_snapshot(&self, versions_ahead: u64) -> bool {
        match self {
            Self::Always => true,
            Self::EveryNEvents(threshold) => versions_ahead >= *threshold,
            Self::Never => false,
        }
    }
}

type SnapshotKey = (AggregateType, String);
type SharedSnapshots = Arc<RwLock<HashMap<SnapshotKey, Snapshot>>>;

/// In-memory snapshot store with configurable policy.
///
/// This is a reference implementation suitable for testing and development.
/// Production systems should implement [`SnapshotStore`] with durable
/// storage. Cloning the store clones a handle to the same snapshots.
#[derive(Clone, Debug)]
pub struct Store {
    snapshots: SharedSnapshots,
    policy: SnapshotPolicy,
}

impl Store {
    /// Create a snapshot store that accepts every offer.
    #[must_use]
    pub fn always() -> Self {
        Self::with_policy(SnapshotPolicy::Always)
    }

    /// Create a snapshot store that accepts an offer every N versions.
    ///
    /// Recommended for most use cases. Start with `n = 50-100` and tune
    /// based on your aggregate's replay cost.
    #[must_use]
    pub fn every(n: u64) -> Self {
        Self::with_policy(SnapshotPolicy::EveryNEvents(n))
    }

    /// Create a snapshot store that never accepts offers (load-only).
    #[must_use]
    pub fn never() -> Self {
        Self::with_policy(SnapshotPolicy::Never)
    }

    fn with_policy(policy: SnapshotPolicy) -> Self {
        Self {
            snapshots: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::always()
    }
}

impl SnapshotStore for Store {
    type Error = Infallible;

    #[tracing::instrument(skip(self, snapshot), fields(aggregate_type = %snapshot.aggregate_type, aggregate_id = %snapshot.aggregate_id, version = snapshot.version))]
    fn save(&self, snapshot: Snapshot) -> Result<SnapshotOffer, Self::Error> {
        let key = (snapshot.aggregate_type.clone(), snapshot.aggregate_id.clone());
        let offer = {
            let mut snapshots = self.snapshots.write().expect("snapshot store lock poisoned");
            let versions_ahead = match snapshots.get(&key) {
                Some(existing) if existing.version >= snapshot.version => None,
                Some(existing) => Some(snapshot.version - existing.version),
                None => Some(snapshot.version),
            };
            match versions_ahead {
                Some(ahead) if self.policy.should_snapshot(ahead) => {
                    snapshots.insert(key, snapshot);
                    SnapshotOffer::Stored
                }
                _ => SnapshotOffer::Declined,
            }
        };
        tracing::debug!(?offer, "snapshot offer evaluated");
        Ok(offer)
    }

    #[tracing::instrument(skip(self))]
    fn load(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &str,
    ) -> Result<Option<Snapshot>, Self::Error> {
        let key = (aggregate_type.clone(), aggregate_id.to_string());
        let snapshot = {
            let snapshots = self.snapshots.read().expect("snapshot store lock poisoned");
            snapshots.get(&key).cloned()
        };
        tracing::trace!(found = snapshot.is_some(), "snapshot lookup");
        Ok(snapshot)
    }

    fn remove(
        &self,
        aggregate_type: &AggregateType,
        aggregate_id: &str,
    ) -> Result<(), Self::Error> {
        let key = (aggregate_type.clone(), aggregate_id.to_string());
        let mut snapshots = self.snapshots.write().expect("snapshot store lock poisoned");
        snapshots.remove(&key);
        Ok(())
    }
}
