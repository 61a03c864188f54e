//! Composable async record stores.
//!
//! Every store implements [`Store`]: keyed `put`/`remove`/`find`, streaming
//! `select`/`remove_all` into a [`Sink`], and change listeners. Decorators
//! wrap a store and add one behavior each (caching, partitioning, schema
//! migration, offline queueing), so a pipeline is built by nesting them;
//! see [`StoreBuilder`].

extern crate self as dao_chain;

pub mod error;
pub mod query;
pub mod record;
pub mod sink;
pub mod store;

pub mod adapter;
pub mod cache;
pub mod cascade;
pub mod config;
pub mod delay;
#[cfg(feature = "emitter")]
pub mod emitter;
pub mod fallback;
pub mod forward;
pub mod migration;
pub mod partition;
pub mod persist;
pub mod pipeline;
pub mod rest;
pub mod worker;

#[cfg(test)]
mod testing;

pub use dao_chain_macros::Record;

pub use error::{Operation, StoreError, StoreResult};
pub use query::{Direction, Expr, Order, SelectOptions};
pub use record::{Key, Record};
pub use sink::{Collector, FlowControl, Sink, SinkEvent};
pub use store::{InMemoryStore, ListenerId, Listeners, SharedStore, Store, StoreExt};

pub use adapter::{Adapter, AdapterStore};
pub use cache::{LazyCacheStore, LruCacheStore, SlidingWindowStore};
pub use cascade::CascadingRemoveStore;
pub use config::{ConfigError, PipelineConfig};
pub use delay::{DelayedStore, ManuallyDelayedStore};
pub use fallback::{DefaultObjectStore, ErrorStore};
pub use forward::{ForwardOperation, StoreAndForwardStore};
pub use migration::{MigrationRule, MigrationStore, StoreVersion};
pub use partition::PartitionStore;
pub use pipeline::StoreBuilder;
pub use rest::{RestStore, RestTransport};
pub use worker::WorkerStore;

#[cfg(feature = "emitter")]
pub use emitter::EmitterSink;
// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
