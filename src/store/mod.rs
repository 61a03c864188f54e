//! Store - the asynchronous, sink-based contract every store and decorator
//! implements.

mod listeners;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{Collector, Sink};

pub use listeners::{ListenerId, Listeners};
pub use memory::InMemoryStore;

/// Asynchronous keyed storage of records of one type.
#[async_trait]
pub trait Store<R: Record>: Send + Sync {
    /// Insert or replace a record. Returns the stored record, which may
    /// carry a store-assigned key.
    async fn put(&self, record: R) -> StoreResult<R>;

    /// Delete by key. Returns the removed record.
    async fn remove(&self, key: &Key) -> StoreResult<R>;

    async fn find(&self, key: &Key) -> StoreResult<R>;

    /// Stream matching records into `sink`, ending with `Eof` or `Error`.
    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()>;

    /// Delete matching records, streaming each deleted record as `Remove`.
    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions)
        -> StoreResult<()>;

    /// Subscribe to future puts/removes matching `options.query`. No replay.
    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId;

    fn unlisten(&self, id: ListenerId) -> bool;
}

/// Convenience helpers over any `Store`.
#[async_trait]
pub trait StoreExt<R: Record>: Store<R> {
    /// Collect a select into a vector.
    async fn select_vec(&self, options: &SelectOptions) -> StoreResult<Vec<R>> {
        let mut sink = Collector::new();
        self.select(&mut sink, options).await?;
        Ok(sink.records)
    }

    async fn select_all(&self) -> StoreResult<Vec<R>> {
        self.select_vec(&SelectOptions::default()).await
    }

    async fn remove_matching(&self, options: &SelectOptions) -> StoreResult<Vec<R>> {
        let mut sink = Collector::new();
        self.remove_all(&mut sink, options).await?;
        Ok(sink.removed)
    }
}

impl<R: Record, S: Store<R> + ?Sized> StoreExt<R> for S {}

macro_rules! forward_store {
    ($wrapper:ident) => {
        #[async_trait]
        impl<R: Record, S: Store<R> + ?Sized> Store<R> for $wrapper<S> {
            async fn put(&self, record: R) -> StoreResult<R> {
                (**self).put(record).await
            }

            async fn remove(&self, key: &Key) -> StoreResult<R> {
                (**self).remove(key).await
            }

            async fn find(&self, key: &Key) -> StoreResult<R> {
                (**self).find(key).await
            }

            async fn select(
                &self,
                sink: &mut dyn Sink<R>,
                options: &SelectOptions,
            ) -> StoreResult<()> {
                (**self).select(sink, options).await
            }

            async fn remove_all(
                &self,
                sink: &mut dyn Sink<R>,
                options: &SelectOptions,
            ) -> StoreResult<()> {
                (**self).remove_all(sink, options).await
            }

            fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
                (**self).listen(sink, options)
            }

            fn unlisten(&self, id: ListenerId) -> bool {
                (**self).unlisten(id)
            }
        }
    };
}

forward_store!(Arc);
forward_store!(Box);

/// Type-erased store handle.
pub type SharedStore<R> = Arc<dyn Store<R>>;
