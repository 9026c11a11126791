#![doc = include_str!("../README.md")]

pub use augur_core::{
    aggregate,
    aggregate::{AggregateType, AggregateTypeError, EventSourced},
    event,
    event::{Event, Metadata, RecordedEvent},
    merge,
    merge::{MergedEvent, MergedStreamIterator},
    metadata,
    metadata::{Field, MatchValue, MetadataMatcher, Operator},
    projection,
    projection::{Emitter, Positions, Projector, ProjectorOptions, Query},
    repository,
    repository::{AggregateHandle, AggregateRepository, RepositoryError},
    strategy,
    strategy::StreamStrategy,
    translator,
    translator::{AggregateTranslator, ConfigurableTranslator, EventSourcedTranslator},
};

pub mod store {

    pub use augur_core::store::{
        ConcurrencyConflict, EventIterator, InvalidStreamName, MAX_STREAM_NAME_LEN,
        RecordedStream, StoreError, Stream, StreamName, StreamStore,
    };

    pub use augur_core::store::inmemory;
}

pub mod snapshot {

    pub use augur_core::snapshot::{NoSnapshots, Snapshot, SnapshotOffer, SnapshotStore};

    pub use augur_core::snapshot::inmemory;
}
