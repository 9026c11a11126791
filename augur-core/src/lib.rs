//! Core traits and types for the Augur event-sourcing library.
//!
//! This crate provides the foundational abstractions for event-sourced
//! persistence:
//!
//! - [`event`] - Event envelopes (`Event`, `RecordedEvent`, `Metadata`)
//! - [`metadata`] - Conjunctive event filtering (`MetadataMatcher`)
//! - [`store`] - Append-only stream persistence (`StreamStore`)
//! - [`aggregate`] - Aggregate identity and capability contract
//!   (`AggregateType`, `EventSourced`)
//! - [`translator`] - Aggregate/event bridging (`AggregateTranslator`)
//! - [`strategy`] - Stream naming strategies (`StreamStrategy`)
//! - [`snapshot`] - Snapshot storage abstraction (`SnapshotStore`)
//! - [`repository`] - Identity map and unit of work (`AggregateRepository`)
//! - [`merge`] - Chronological stream merging (`MergedStreamIterator`)
//! - [`projection`] - Fold engines (`Query`, `Projector`)
//!
//! # Example
//!
//! ```
//! use augur_core::{
//!     aggregate::AggregateType,
//!     repository::AggregateRepository,
//!     store::inmemory,
//!     strategy::StreamStrategy,
//!     translator::EventSourcedTranslator,
//! };
//!
//! # #[derive(Default, serde::Serialize, serde::Deserialize)]
//! # struct Account;
//! # impl augur_core::aggregate::EventSourced for Account {
//! #     const KIND: &'static str = "account";
//! #     fn aggregate_id(&self) -> String { String::new() }
//! #     fn version(&self) -> u64 { 0 }
//! #     fn set_version(&mut self, _version: u64) {}
//! #     fn apply(&mut self, _event: &augur_core::event::RecordedEvent) {}
//! #     fn pop_pending_events(&mut self) -> Vec<augur_core::event::Event> { Vec::new() }
//! # }
//! let store = inmemory::Store::new();
//! let repository: AggregateRepository<_, Account, _> = AggregateRepository::new(
//!     store,
//!     AggregateType::of::<Account>(),
//!     StreamStrategy::PerAggregate,
//!     EventSourcedTranslator,
//! );
//! ```
//!
//! Most users should depend on the [`augur`](https://docs.rs/augur) crate,
//! which re-exports these types with a cleaner API surface.

pub mod aggregate;
pub mod event;
pub mod merge;
pub mod metadata;
pub mod projection;
pub mod repository;
pub mod snapshot;
pub mod store;
pub mod strategy;
pub mod translator;
