//! Projection fold engines.
//!
//! A projection folds recorded events into a read-side state. Two engines
//! share one configuration surface:
//!
//! - [`Query`] is transient: state lives only in memory and nothing is
//!   written back to the store.
//! - [`Projector`] is durable: it has a name, its handlers can emit events
//!   through an [`Emitter`], and a persist hook fires on a configurable
//!   cadence so state and positions can be checkpointed.
//!
//! Both engines read each source stream from its last consumed position and
//! dispatch in chronological order, merging multiple sources by timestamp
//! via [`MergedStreamIterator`](crate::merge::MergedStreamIterator).
//! Configuration mistakes (double init, mixed handler forms, running with
//! no sources) are [`ConfigurationError`]s and fatal.

use std::collections::{BTreeMap, HashMap};

use nonempty::NonEmpty;
use thiserror::Error;

use crate::{
    event::{Event, RecordedEvent},
    merge::MergedStreamIterator,
    store::{InvalidStreamName, StoreError, Stream, StreamName, StreamStore},
};

/// Default number of handled events between persist-hook invocations.
pub const DEFAULT_PERSIST_BLOCK_SIZE: usize = 1000;

/// Last consumed version per source stream.
///
/// Versions are 1-based, so `0` means "nothing consumed yet" and reads
/// start at `position + 1`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Positions(BTreeMap<StreamName, u64>);

impl Positions {
    /// An empty cursor.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last consumed version for a stream, `0` when unseen.
    #[must_use]
    pub fn get(&self, name: &StreamName) -> u64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    /// Record the last consumed version for a stream.
    pub fn set(&mut self, name: StreamName, version: u64) {
        self.0.insert(name, version);
    }

    /// Iterate over all recorded positions.
    pub fn iter(&self) -> impl Iterator<Item = (&StreamName, u64)> {
        self.0.iter().map(|(name, version)| (name, *version))
    }

    /// Drop every recorded position.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

/// Errors from misusing the projection configuration surface.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// `init` was called twice.
    #[error("an initialization callback was already provided")]
    InitAlreadySet,
    /// Source streams were declared twice.
    #[error("source streams were already declared")]
    SourcesAlreadySet,
    /// Per-event handlers and a catch-all handler were mixed.
    #[error("a catch-all handler cannot be combined with per-event handlers")]
    MixedHandlers,
    /// Two handlers were registered for one event name.
    #[error("a handler for `{0}` was already provided")]
    DuplicateHandler(String),
    /// `run` was called with no sources declared.
    #[error("no source streams were declared")]
    NoSources,
    /// `run` was called with no handlers configured.
    #[error("no handlers were configured")]
    NoHandlers,
}

/// Errors raised while running a projection.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// The projection was misconfigured.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// A store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The projection name is not a valid stream name.
    #[error(transparent)]
    InvalidName(#[from] InvalidStreamName),
}

fn read_source<S: StreamStore>(
    store: &S,
    name: &StreamName,
    position: u64,
) -> Result<Vec<RecordedEvent>, StoreError> {
    // A missing source reads as empty so projections can be wired up
    // before their producers.
    Ok(store
        .load(name, position + 1, None, None)?
        .map(|stream| stream.events)
        .unwrap_or_default())
}

fn merged_batches(
    batches: Vec<(StreamName, Vec<RecordedEvent>)>,
) -> Vec<(StreamName, RecordedEvent)> {
    let sources = NonEmpty::from_vec(
        batches
            .into_iter()
            .map(|(name, events)| (name, events.into_iter()))
            .collect::<Vec<_>>(),
    );
    match sources {
        Some(sources) if sources.len() > 1 => MergedStreamIterator::new(sources)
            .map(|m| (m.stream, m.event))
            .collect(),
        Some(sources) => {
            let (name, events) = sources.head;
            events.map(|event| (name.clone(), event)).collect()
        }
        None => Vec::new(),
    }
}

type InitFn<State> = Box<dyn Fn() -> State>;
type QueryHandler<State> = Box<dyn FnMut(State, &RecordedEvent) -> State>;

/// Transient projection: fold events into an in-memory state.
///
/// ```ignore
/// let mut query = Query::new(store)
///     .init(|| 0_i64)?
///     .from_stream(StreamName::new("account-a-1")?)?
///     .when("deposited", |count, _event| count + 1)?;
/// query.run()?;
/// assert_eq!(*query.state(), 2);
/// ```
pub struct Query<S, State> {
    store: S,
    state: State,
    init: Option<InitFn<State>>,
    sources: Vec<StreamName>,
    handlers: HashMap<String, QueryHandler<State>>,
    catch_all: Option<QueryHandler<State>>,
    positions: Positions,
}

impl<S, State> std::fmt::Debug for Query<S, State> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sources", &self.sources)
            .field("positions", &self.positions)
            .finish_non_exhaustive()
    }
}

impl<S, State: Default> Query<S, State> {
    /// Create an unconfigured query over a store.
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: State::default(),
            init: None,
            sources: Vec::new(),
            handlers: HashMap::new(),
            catch_all: None,
            positions: Positions::new(),
        }
    }

    /// Provide the initial state instead of `State::default()`.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::InitAlreadySet`] on a second call.
    pub fn init(mut self, f: impl Fn() -> State + 'static) -> Result<Self, ConfigurationError> {
        if self.init.is_some() {
            return Err(ConfigurationError::InitAlreadySet);
        }
        self.state = f();
        self.init = Some(Box::new(f));
        Ok(self)
    }

    /// Read from a single source stream.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::SourcesAlreadySet`] when sources
    /// were already declared.
    pub fn from_stream(mut self, name: StreamName) -> Result<Self, ConfigurationError> {
        if !self.sources.is_empty() {
            return Err(ConfigurationError::SourcesAlreadySet);
        }
        self.sources.push(name);
        Ok(self)
    }

    /// Read from several source streams, merged chronologically.
    ///
    /// # Errors
    ///
    /// As [`from_stream`](Self::from_stream).
    pub fn from_streams(
        mut self,
        names: impl IntoIterator<Item = StreamName>,
    ) -> Result<Self, ConfigurationError> {
        if !self.sources.is_empty() {
            return Err(ConfigurationError::SourcesAlreadySet);
        }
        self.sources.extend(names);
        Ok(self)
    }

    /// Register a fold handler for one event name.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::MixedHandlers`] when a catch-all is
    /// already registered, or [`ConfigurationError::DuplicateHandler`] on a
    /// repeated name.
    pub fn when(
        mut self,
        event_name: impl Into<String>,
        handler: impl FnMut(State, &RecordedEvent) -> State + 'static,
    ) -> Result<Self, ConfigurationError> {
        if self.catch_all.is_some() {
            return Err(ConfigurationError::MixedHandlers);
        }
        let event_name = event_name.into();
        if self.handlers.contains_key(&event_name) {
            return Err(ConfigurationError::DuplicateHandler(event_name));
        }
        self.handlers.insert(event_name, Box::new(handler));
        Ok(self)
    }

    /// Register a catch-all fold handler for every event.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::MixedHandlers`] when per-event
    /// handlers exist or a catch-all was already registered.
    pub fn when_any(
        mut self,
        handler: impl FnMut(State, &RecordedEvent) -> State + 'static,
    ) -> Result<Self, ConfigurationError> {
        if !self.handlers.is_empty() || self.catch_all.is_some() {
            return Err(ConfigurationError::MixedHandlers);
        }
        self.catch_all = Some(Box::new(handler));
        Ok(self)
    }

    /// Restore the cursor before a run.
    #[must_use]
    pub fn with_positions(mut self, positions: Positions) -> Self {
        self.positions = positions;
        self
    }

    /// Restore the state before a run.
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// The current folded state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The current cursor.
    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    /// Forget all progress: state back to initial, cursor zeroed.
    pub fn reset(&mut self) {
        self.state = self.init.as_ref().map_or_else(State::default, |f| f());
        self.positions.clear();
    }
}

impl<S: StreamStore, State: Default> Query<S, State> {
    /// Fold every unconsumed event into the state, one synchronous pass.
    ///
    /// Each source is read from its position + 1; unmatched events advance
    /// the cursor without touching the state.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::NoSources`] or
    /// [`ConfigurationError::NoHandlers`] when unconfigured, or a
    /// [`StoreError`] from reading.
    #[tracing::instrument(skip(self), fields(source_count = self.sources.len()))]
    pub fn run(&mut self) -> Result<(), ProjectionError> {
        if self.sources.is_empty() {
            return Err(ConfigurationError::NoSources.into());
        }
        if self.handlers.is_empty() && self.catch_all.is_none() {
            return Err(ConfigurationError::NoHandlers.into());
        }

        let mut batches = Vec::with_capacity(self.sources.len());
        for name in &self.sources {
            let events = read_source(&self.store, name, self.positions.get(name))?;
            batches.push((name.clone(), events));
        }

        let mut state = std::mem::take(&mut self.state);
        let mut dispatched = 0_usize;
        for (stream, event) in merged_batches(batches) {
            let version = event.version;
            if let Some(handler) = self.catch_all.as_mut() {
                state = handler(state, &event);
            } else if let Some(handler) = self.handlers.get_mut(&event.name) {
                state = handler(state, &event);
            }
            self.positions.set(stream, version);
            dispatched += 1;
        }
        self.state = state;
        tracing::debug!(dispatched, "query pass complete");
        Ok(())
    }
}

/// Append side handed to [`Projector`] handlers.
///
/// [`emit`](Self::emit) writes to the projection's own output stream;
/// [`link_to`](Self::link_to) writes to an arbitrary stream, creating it on
/// first use.
pub struct Emitter<'a, S> {
    store: &'a S,
    output: &'a StreamName,
}

impl<S: StreamStore> Emitter<'_, S> {
    /// Append an event to the projection's output stream.
    ///
    /// # Errors
    ///
    /// Propagates the store's append failure.
    pub fn emit(&mut self, event: Event) -> Result<(), StoreError> {
        self.store.append_to(self.output, vec![event], None)
    }

    /// Append an event to an arbitrary stream, creating it if missing.
    ///
    /// # Errors
    ///
    /// Propagates the store's create or append failure.
    pub fn link_to(&mut self, stream: &StreamName, event: Event) -> Result<(), StoreError> {
        if self.store.has_stream(stream) {
            self.store.append_to(stream, vec![event], None)
        } else {
            self.store.create(Stream::new(stream.clone(), vec![event]))
        }
    }
}

/// Tuning knobs for a [`Projector`].
#[derive(Clone, Copy, Debug)]
pub struct ProjectorOptions {
    /// Handled events between persist-hook invocations.
    pub persist_block_size: usize,
}

impl Default for ProjectorOptions {
    fn default() -> Self {
        Self {
            persist_block_size: DEFAULT_PERSIST_BLOCK_SIZE,
        }
    }
}

type ProjectorHandler<S, State> =
    Box<dyn FnMut(State, &RecordedEvent, &mut Emitter<'_, S>) -> Result<State, StoreError>>;
type PersistHook<State> = Box<dyn FnMut(&State, &Positions)>;

/// Durable projection: a named fold whose handlers can emit events and
/// whose progress is checkpointed through a persist hook.
///
/// The projection's name doubles as its output stream name; the stream is
/// created at construction when absent. The persist hook fires after every
/// [`persist_block_size`](ProjectorOptions::persist_block_size) handled
/// events (events a registered handler actually ran for; unhandled events
/// advance the cursor without counting) and once more at end-of-run when
/// the final batch is partial (an exact-boundary final batch was already
/// persisted).
pub struct Projector<S, State> {
    store: S,
    name: String,
    output: StreamName,
    options: ProjectorOptions,
    state: State,
    init: Option<InitFn<State>>,
    sources: Vec<StreamName>,
    handlers: HashMap<String, ProjectorHandler<S, State>>,
    catch_all: Option<ProjectorHandler<S, State>>,
    persist_hook: Option<PersistHook<State>>,
    positions: Positions,
}

impl<S: StreamStore, State: Default> Projector<S, State> {
    /// Create a named projector over a store with default options.
    ///
    /// # Errors
    ///
    /// Fails when `name` is not a valid stream name or the output stream
    /// cannot be created.
    pub fn new(store: S, name: impl Into<String>) -> Result<Self, ProjectionError> {
        Self::with_options(store, name, ProjectorOptions::default())
    }

    /// Create a named projector with explicit options.
    ///
    /// # Errors
    ///
    /// As [`new`](Self::new).
    pub fn with_options(
        store: S,
        name: impl Into<String>,
        options: ProjectorOptions,
    ) -> Result<Self, ProjectionError> {
        let name = name.into();
        let output = StreamName::new(name.clone())?;
        if !store.has_stream(&output) {
            store.create(Stream::new(output.clone(), Vec::new()))?;
        }
        Ok(Self {
            store,
            name,
            output,
            options,
            state: State::default(),
            init: None,
            sources: Vec::new(),
            handlers: HashMap::new(),
            catch_all: None,
            persist_hook: None,
            positions: Positions::new(),
        })
    }

    /// The projection's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provide the initial state instead of `State::default()`.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::InitAlreadySet`] on a second call.
    pub fn init(mut self, f: impl Fn() -> State + 'static) -> Result<Self, ConfigurationError> {
        if self.init.is_some() {
            return Err(ConfigurationError::InitAlreadySet);
        }
        self.state = f();
        self.init = Some(Box::new(f));
        Ok(self)
    }

    /// Read from a single source stream.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::SourcesAlreadySet`] when sources
    /// were already declared.
    pub fn from_stream(mut self, name: StreamName) -> Result<Self, ConfigurationError> {
        if !self.sources.is_empty() {
            return Err(ConfigurationError::SourcesAlreadySet);
        }
        self.sources.push(name);
        Ok(self)
    }

    /// Read from several source streams, merged chronologically.
    ///
    /// # Errors
    ///
    /// As [`from_stream`](Self::from_stream).
    pub fn from_streams(
        mut self,
        names: impl IntoIterator<Item = StreamName>,
    ) -> Result<Self, ConfigurationError> {
        if !self.sources.is_empty() {
            return Err(ConfigurationError::SourcesAlreadySet);
        }
        self.sources.extend(names);
        Ok(self)
    }

    /// Register a fold handler for one event name.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::MixedHandlers`] when a catch-all is
    /// already registered, or [`ConfigurationError::DuplicateHandler`] on a
    /// repeated name.
    pub fn when(
        mut self,
        event_name: impl Into<String>,
        handler: impl FnMut(State, &RecordedEvent, &mut Emitter<'_, S>) -> Result<State, StoreError>
        + 'static,
    ) -> Result<Self, ConfigurationError> {
        if self.catch_all.is_some() {
            return Err(ConfigurationError::MixedHandlers);
        }
        let event_name = event_name.into();
        if self.handlers.contains_key(&event_name) {
            return Err(ConfigurationError::DuplicateHandler(event_name));
        }
        self.handlers.insert(event_name, Box::new(handler));
        Ok(self)
    }

    /// Register a catch-all fold handler for every event.
    ///
    /// # Errors
    ///
    /// Fails with [`ConfigurationError::MixedHandlers`] when per-event
    /// handlers exist or a catch-all was already registered.
    pub fn when_any(
        mut self,
        handler: impl FnMut(State, &RecordedEvent, &mut Emitter<'_, S>) -> Result<State, StoreError>
        + 'static,
    ) -> Result<Self, ConfigurationError> {
        if !self.handlers.is_empty() || self.catch_all.is_some() {
            return Err(ConfigurationError::MixedHandlers);
        }
        self.catch_all = Some(Box::new(handler));
        Ok(self)
    }

    /// Install the persist hook.
    #[must_use]
    pub fn on_persist(mut self, hook: impl FnMut(&State, &Positions) + 'static) -> Self {
        self.persist_hook = Some(Box::new(hook));
        self
    }

    /// Restore the cursor before a run.
    #[must_use]
    pub fn with_positions(mut self, positions: Positions) -> Self {
        self.positions = positions;
        self
    }

    /// Restore the state before a run.
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = state;
        self
    }

    /// The current folded state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The current cursor.
    pub fn positions(&self) -> &Positions {
        &self.positions
    }

    /// Forget all progress: state back to initial, cursor zeroed.
    pub fn reset(&mut self) {
        self.state = self.init.as_ref().map_or_else(State::default, |f| f());
        self.positions.clear();
    }

    /// Fold every unconsumed event into the state, one synchronous pass.
    ///
    /// Dispatch order and cursor behaviour match [`Query::run`]; handlers
    /// additionally receive an [`Emitter`] and may fail with a
    /// [`StoreError`]. A handler failure aborts the pass and resets the
    /// engine to its initial state and an empty cursor; recovery is a
    /// rebuild, or a [`with_state`](Self::with_state) /
    /// [`with_positions`](Self::with_positions) resume from the last
    /// persisted checkpoint.
    ///
    /// # Errors
    ///
    /// As [`Query::run`], plus handler emission failures.
    #[tracing::instrument(skip(self), fields(projection = %self.name, source_count = self.sources.len()))]
    pub fn run(&mut self) -> Result<(), ProjectionError> {
        if self.sources.is_empty() {
            return Err(ConfigurationError::NoSources.into());
        }
        if self.handlers.is_empty() && self.catch_all.is_none() {
            return Err(ConfigurationError::NoHandlers.into());
        }

        let mut batches = Vec::with_capacity(self.sources.len());
        for name in &self.sources {
            let events = read_source(&self.store, name, self.positions.get(name))?;
            batches.push((name.clone(), events));
        }

        let block_size = self.options.persist_block_size.max(1);
        let mut emitter = Emitter {
            store: &self.store,
            output: &self.output,
        };
        let mut state = Some(std::mem::take(&mut self.state));
        let mut handled = 0_usize;
        let mut failure = None;

        for (stream, event) in merged_batches(batches) {
            let version = event.version;
            let handler = if self.catch_all.is_some() {
                self.catch_all.as_mut()
            } else {
                self.handlers.get_mut(&event.name)
            };
            let Some(handler) = handler else {
                self.positions.set(stream, version);
                continue;
            };
            match handler(state.take().unwrap_or_default(), &event, &mut emitter) {
                Ok(next) => state = Some(next),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
            self.positions.set(stream, version);
            handled += 1;
            if handled % block_size == 0
                && let Some(hook) = self.persist_hook.as_mut()
                && let Some(current) = state.as_ref()
            {
                hook(current, &self.positions);
            }
        }

        if let Some(e) = failure {
            // The failing handler consumed the in-flight state.
            self.reset();
            return Err(e.into());
        }

        let state = state.unwrap_or_default();
        if handled % block_size != 0
            && let Some(hook) = self.persist_hook.as_mut()
        {
            hook(&state, &self.positions);
        }
        self.state = state;
        tracing::debug!(handled, "projector pass complete");
        Ok(())
    }
}
