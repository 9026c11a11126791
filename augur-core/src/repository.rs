//! Aggregate repository: identity map and unit of work.
//!
//! An [`AggregateRepository`] fronts a [`StreamStore`] for one declared
//! aggregate type. Within one unit of work every id resolves to the same
//! shared handle (read-your-writes); [`commit`](AggregateRepository::commit)
//! drains each cached aggregate's pending events into its stream and drops
//! the map, [`clear`](AggregateRepository::clear) drops it without writing.
//!
//! Repositories are single-threaded by construction: handles are
//! `Rc<RefCell<A>>`, so a repository cannot cross threads. Concurrency
//! control lives in the store's expected-version check, not here.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::{
    aggregate::{AggregateType, AggregateTypeError},
    snapshot::{NoSnapshots, Snapshot, SnapshotOffer, SnapshotStore},
    store::StreamStore,
    strategy::{StrategyError, StreamStrategy},
    translator::{AggregateTranslator, TranslationError},
};

/// Shared handle to a cached aggregate.
pub type AggregateHandle<A> = Rc<RefCell<A>>;

/// Errors raised by repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A strategy or store operation failed.
    #[error(transparent)]
    Strategy(#[from] StrategyError),
    /// The translator could not bridge the aggregate.
    #[error(transparent)]
    Translation(#[from] TranslationError),
    /// The aggregate's runtime type is not valid for this repository.
    #[error(transparent)]
    Type(#[from] AggregateTypeError),
    /// The snapshot store failed.
    #[error("snapshot store failed: {0}")]
    Snapshot(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// Snapshot state could not be encoded or decoded.
    #[error("snapshot state codec failed: {0}")]
    SnapshotCodec(#[from] serde_json::Error),
}

/// Marker wrapping a snapshot store once snapshots are enabled.
///
/// Keeps the snapshot-free and snapshot-enabled repository surfaces in
/// separate impl blocks, so the serde bounds on the aggregate apply only
/// when snapshots are actually in play.
#[derive(Clone, Copy, Debug, Default)]
pub struct Snapshots<SS>(SS);

/// Repository for one declared aggregate type.
///
/// Generic over the stream store `S`, the aggregate `A`, its translator
/// `T`, and the snapshot configuration (defaulting to [`NoSnapshots`]).
pub struct AggregateRepository<S, A, T, SS = NoSnapshots> {
    store: S,
    aggregate_type: AggregateType,
    strategy: StreamStrategy,
    translator: T,
    identity_map: RefCell<HashMap<String, AggregateHandle<A>>>,
    snapshots: SS,
}

impl<S, A, T> AggregateRepository<S, A, T> {
    /// Create a repository without snapshot support.
    pub fn new(
        store: S,
        aggregate_type: AggregateType,
        strategy: StreamStrategy,
        translator: T,
    ) -> Self {
        Self {
            store,
            aggregate_type,
            strategy,
            translator,
            identity_map: RefCell::new(HashMap::new()),
            snapshots: NoSnapshots,
        }
    }

    /// Enable snapshot support.
    ///
    /// The snapshot-enabled repository additionally requires the aggregate
    /// to be `Serialize + DeserializeOwned`.
    #[must_use]
    pub fn with_snapshots<SS>(self, snapshots: SS) -> AggregateRepository<S, A, T, Snapshots<SS>> {
        AggregateRepository {
            store: self.store,
            aggregate_type: self.aggregate_type,
            strategy: self.strategy,
            translator: self.translator,
            identity_map: self.identity_map,
            snapshots: Snapshots(snapshots),
        }
    }
}

impl<S, A, T, SS> AggregateRepository<S, A, T, SS>
where
    S: StreamStore,
    T: AggregateTranslator<A>,
{
    /// The declared aggregate type.
    #[must_use]
    pub fn aggregate_type(&self) -> &AggregateType {
        &self.aggregate_type
    }

    /// The aggregate's version, as seen by the translator.
    ///
    /// Useful for callers asserting optimistic-concurrency expectations
    /// against the store directly.
    pub fn extract_aggregate_version(&self, aggregate: &A) -> Result<u64, RepositoryError> {
        Ok(self.translator.extract_aggregate_version(aggregate)?)
    }

    /// Register a new aggregate and cache it for this unit of work.
    ///
    /// Asserts the runtime type against the declared type, drains the
    /// aggregate's pending events, and performs the strategy's first write.
    /// The returned handle is the one later
    /// [`get_aggregate_root`](Self::get_aggregate_root) calls will hand out.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Type`] on a type mismatch, or the
    /// strategy's failure when the first write is rejected.
    #[tracing::instrument(skip(self, aggregate))]
    pub fn add_aggregate_root(&self, mut aggregate: A) -> Result<AggregateHandle<A>, RepositoryError> {
        let runtime = self.translator.extract_aggregate_type(&aggregate)?;
        self.strategy
            .assert_aggregate_type(&self.aggregate_type, &runtime)?;
        let id = self.translator.extract_aggregate_id(&aggregate)?;
        let events = self.translator.extract_pending_events(&mut aggregate)?;
        tracing::debug!(aggregate_id = %id, event_count = events.len(), "registering aggregate");
        self.strategy
            .register(&self.store, &self.aggregate_type, &runtime, &id, events)?;
        Ok(self.cache(id, aggregate))
    }

    /// Write every cached aggregate's pending events, then end the unit of
    /// work.
    ///
    /// The identity map is dropped before any write happens, so it is empty
    /// afterwards whether or not the writes succeed. Store failures
    /// propagate unmodified; appends that already happened stay committed
    /// (there is no cross-stream atomicity).
    ///
    /// # Errors
    ///
    /// Returns the first strategy or translation failure.
    #[tracing::instrument(skip(self))]
    pub fn commit(&self) -> Result<(), RepositoryError> {
        let map = std::mem::take(&mut *self.identity_map.borrow_mut());
        for (id, handle) in map {
            let mut aggregate = handle.borrow_mut();
            let events = self.translator.extract_pending_events(&mut aggregate)?;
            if events.is_empty() {
                continue;
            }
            let runtime = self.translator.extract_aggregate_type(&aggregate)?;
            tracing::debug!(aggregate_id = %id, event_count = events.len(), "committing aggregate");
            self.strategy.append_events(
                &self.store,
                &self.aggregate_type,
                &runtime,
                &id,
                events,
                None,
            )?;
        }
        Ok(())
    }

    /// End the unit of work without writing anything.
    pub fn clear(&self) {
        self.identity_map.borrow_mut().clear();
    }

    fn cached(&self, id: &str) -> Option<AggregateHandle<A>> {
        self.identity_map.borrow().get(id).map(Rc::clone)
    }

    fn cache(&self, id: String, aggregate: A) -> AggregateHandle<A> {
        let handle = Rc::new(RefCell::new(aggregate));
        self.identity_map
            .borrow_mut()
            .insert(id, Rc::clone(&handle));
        handle
    }

    fn read_from(&self, id: &str, from_version: u64) -> Result<Option<A>, RepositoryError> {
        let Some((resolved, events)) =
            self.strategy
                .read(&self.store, &self.aggregate_type, id, from_version)?
        else {
            return Ok(None);
        };
        let aggregate = self.translator.reconstitute_from_history(&resolved, events)?;
        Ok(Some(aggregate))
    }
}

impl<S, A, T> AggregateRepository<S, A, T, NoSnapshots>
where
    S: StreamStore,
    T: AggregateTranslator<A>,
{
    /// Fetch an aggregate by id.
    ///
    /// A cached instance is returned as-is: repeated calls within one unit
    /// of work yield the identical handle. Otherwise the aggregate is
    /// reconstituted from its full history and cached. `Ok(None)` means no
    /// events exist for this id.
    ///
    /// # Errors
    ///
    /// Returns the strategy's read failure or the translator's
    /// reconstitution failure.
    #[tracing::instrument(skip(self))]
    pub fn get_aggregate_root(&self, id: &str) -> Result<Option<AggregateHandle<A>>, RepositoryError> {
        if let Some(handle) = self.cached(id) {
            tracing::trace!(aggregate_id = id, "identity map hit");
            return Ok(Some(handle));
        }
        let Some(aggregate) = self.read_from(id, 1)? else {
            return Ok(None);
        };
        Ok(Some(self.cache(id.to_string(), aggregate)))
    }
}

impl<S, A, T, SS> AggregateRepository<S, A, T, Snapshots<SS>>
where
    S: StreamStore,
    T: AggregateTranslator<A>,
    SS: SnapshotStore,
    A: Serialize + DeserializeOwned,
{
    /// Fetch an aggregate by id, using snapshots when available.
    ///
    /// A snapshot hit decodes the stored state and replays only the events
    /// recorded after the snapshot's version. Cached instances and misses
    /// behave as in the snapshot-free variant.
    ///
    /// # Errors
    ///
    /// As the snapshot-free variant, plus [`RepositoryError::Snapshot`] and
    /// [`RepositoryError::SnapshotCodec`] for snapshot failures.
    #[tracing::instrument(skip(self))]
    pub fn get_aggregate_root(&self, id: &str) -> Result<Option<AggregateHandle<A>>, RepositoryError> {
        if let Some(handle) = self.cached(id) {
            tracing::trace!(aggregate_id = id, "identity map hit");
            return Ok(Some(handle));
        }

        let snapshot = self
            .snapshots
            .0
            .load(&self.aggregate_type, id)
            .map_err(|e| RepositoryError::Snapshot(Box::new(e)))?;
        if let Some(snapshot) = snapshot {
            tracing::debug!(aggregate_id = id, snapshot_version = snapshot.version, "snapshot hit");
            let mut aggregate: A = serde_json::from_value(snapshot.state)?;
            if let Some((_, events)) =
                self.strategy
                    .read(&self.store, &self.aggregate_type, id, snapshot.version + 1)?
            {
                self.translator.replay_events(&mut aggregate, events)?;
            }
            return Ok(Some(self.cache(id.to_string(), aggregate)));
        }

        let Some(aggregate) = self.read_from(id, 1)? else {
            return Ok(None);
        };
        Ok(Some(self.cache(id.to_string(), aggregate)))
    }

    /// Snapshot an aggregate's committed state.
    ///
    /// Reads fresh from the store, bypassing the identity map, so pending
    /// uncommitted events never leak into the snapshot and the stored
    /// version is the last committed one. A later load then replays
    /// exactly the events recorded after that version. `Ok(None)` means no
    /// events exist for this id.
    ///
    /// # Errors
    ///
    /// Returns the strategy's read failure, the translator's
    /// reconstitution failure, or snapshot encoding and storage failures.
    #[tracing::instrument(skip(self))]
    pub fn take_snapshot(&self, id: &str) -> Result<Option<SnapshotOffer>, RepositoryError> {
        let Some(aggregate) = self.read_from(id, 1)? else {
            return Ok(None);
        };
        let version = self.translator.extract_aggregate_version(&aggregate)?;
        let state = serde_json::to_value(&aggregate)?;
        let snapshot = Snapshot::new(self.aggregate_type.clone(), id, state, version);
        let offer = self
            .snapshots
            .0
            .save(snapshot)
            .map_err(|e| RepositoryError::Snapshot(Box::new(e)))?;
        tracing::debug!(aggregate_id = id, version, ?offer, "snapshot taken");
        Ok(Some(offer))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::{
        aggregate::EventSourced,
        event::{Event, RecordedEvent},
        snapshot,
        store::inmemory,
        translator::EventSourcedTranslator,
    };

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Account {
        id: String,
        balance: i64,
        version: u64,
        #[serde(skip)]
        pending: Vec<Event>,
    }

    impl Account {
        fn open(id: &str) -> Self {
            let mut account = Self::default();
            let event = Event::new("opened", json!({"id": id}));
            account.apply(&event.clone().record(0));
            account.pending.push(event);
            account
        }

        fn deposit(&mut self, amount: i64) {
            let event = Event::new("deposited", json!({"amount": amount}));
            self.apply(&event.clone().record(self.version));
            self.pending.push(event);
        }
    }

    impl EventSourced for Account {
        const KIND: &'static str = "account";

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
                "opened" => {
                    self.id = event
                        .payload
                        .get("id")
                        .and_then(serde_json::Value::as_str)
                        .unwrap_or_default()
                        .to_string();
                }
                "deposited" => {
                    self.balance += event
                        .payload
                        .get("amount")
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or_default();
                }
                _ => {}
            }
        }

        fn pop_pending_events(&mut self) -> Vec<Event> {
            std::mem::take(&mut self.pending)
        }
    }

    fn repository(
        store: inmemory::Store,
    ) -> AggregateRepository<inmemory::Store, Account, EventSourcedTranslator> {
        AggregateRepository::new(
            store,
            AggregateType::of::<Account>(),
            StreamStrategy::PerAggregate,
            EventSourcedTranslator,
        )
    }

    #[test]
    fn add_writes_and_caches() {
        let store = inmemory::Store::new();
        let repo = repository(store.clone());

        let handle = repo.add_aggregate_root(Account::open("a-1")).unwrap();
        assert_eq!(handle.borrow().balance, 0);

        let cached = repo.get_aggregate_root("a-1").unwrap().unwrap();
        assert!(Rc::ptr_eq(&handle, &cached));
    }

    #[test]
    fn repeated_get_returns_identical_handle() {
        let store = inmemory::Store::new();
        {
            let repo = repository(store.clone());
            repo.add_aggregate_root(Account::open("a-1")).unwrap();
            repo.commit().unwrap();
        }

        let repo = repository(store);
        let first = repo.get_aggregate_root("a-1").unwrap().unwrap();
        let second = repo.get_aggregate_root("a-1").unwrap().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn get_missing_returns_none() {
        let repo = repository(inmemory::Store::new());
        assert!(repo.get_aggregate_root("nope").unwrap().is_none());
    }

    #[test]
    fn commit_drains_pending_events_and_identity_map() {
        let store = inmemory::Store::new();
        let repo = repository(store.clone());

        let handle = repo.add_aggregate_root(Account::open("a-1")).unwrap();
        handle.borrow_mut().deposit(10);
        handle.borrow_mut().deposit(5);
        repo.commit().unwrap();

        // The map is gone, so the next get replays from the store.
        let fresh = repo.get_aggregate_root("a-1").unwrap().unwrap();
        assert!(!Rc::ptr_eq(&handle, &fresh));
        assert_eq!(fresh.borrow().balance, 15);
        assert_eq!(fresh.borrow().version, 3);
    }

    #[test]
    fn clear_discards_uncommitted_changes() {
        let store = inmemory::Store::new();
        let repo = repository(store.clone());

        repo.add_aggregate_root(Account::open("a-1")).unwrap();
        repo.commit().unwrap();

        let handle = repo.get_aggregate_root("a-1").unwrap().unwrap();
        handle.borrow_mut().deposit(100);
        repo.clear();

        let fresh = repo.get_aggregate_root("a-1").unwrap().unwrap();
        assert_eq!(fresh.borrow().balance, 0);
    }

    #[test]
    fn foreign_type_registration_is_rejected() {
        let store = inmemory::Store::new();
        let repo: AggregateRepository<_, Account, _> = AggregateRepository::new(
            store,
            AggregateType::new("invoice").unwrap(),
            StreamStrategy::PerAggregate,
            EventSourcedTranslator,
        );

        let result = repo.add_aggregate_root(Account::open("a-1"));
        assert!(matches!(result, Err(RepositoryError::Type(_))));
    }

    #[test]
    fn snapshot_hit_replays_only_later_events() {
        let store = inmemory::Store::new();
        let snapshots = snapshot::inmemory::Store::always();
        {
            let repo = repository(store.clone()).with_snapshots(snapshots.clone());
            let handle = repo.add_aggregate_root(Account::open("a-1")).unwrap();
            handle.borrow_mut().deposit(10);
            repo.commit().unwrap();

            let offer = repo.take_snapshot("a-1").unwrap().unwrap();
            assert_eq!(offer, SnapshotOffer::Stored);
            repo.clear();

            let handle = repo.get_aggregate_root("a-1").unwrap().unwrap();
            handle.borrow_mut().deposit(20);
            repo.commit().unwrap();
        }

        let repo = repository(store).with_snapshots(snapshots.clone());
        let handle = repo.get_aggregate_root("a-1").unwrap().unwrap();
        assert_eq!(handle.borrow().balance, 30);
        assert_eq!(handle.borrow().version, 3);

        let stored = snapshots
            .load(&AggregateType::of::<Account>(), "a-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);
    }

    #[test]
    fn take_snapshot_captures_only_committed_state() {
        let store = inmemory::Store::new();
        let snapshots = snapshot::inmemory::Store::always();
        let repo = repository(store.clone()).with_snapshots(snapshots.clone());

        let handle = repo.add_aggregate_root(Account::open("a-1")).unwrap();
        handle.borrow_mut().deposit(10);
        repo.commit().unwrap();

        // A pending deposit sits in the identity map when the snapshot is
        // taken; only the two committed events may end up in it.
        let handle = repo.get_aggregate_root("a-1").unwrap().unwrap();
        handle.borrow_mut().deposit(5);
        let offer = repo.take_snapshot("a-1").unwrap().unwrap();
        assert_eq!(offer, SnapshotOffer::Stored);

        let stored = snapshots
            .load(&AggregateType::of::<Account>(), "a-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.version, 2);
        repo.commit().unwrap();

        // The deposit committed after the snapshot is replayed once, not
        // folded twice.
        let repo = repository(store).with_snapshots(snapshots);
        let reloaded = repo.get_aggregate_root("a-1").unwrap().unwrap();
        assert_eq!(reloaded.borrow().balance, 15);
        assert_eq!(reloaded.borrow().version, 3);
    }

    #[test]
    fn take_snapshot_for_missing_aggregate_returns_none() {
        let repo = repository(inmemory::Store::new())
            .with_snapshots(snapshot::inmemory::Store::always());
        assert!(repo.take_snapshot("nope").unwrap().is_none());
    }
}
