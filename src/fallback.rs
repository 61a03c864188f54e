//! Stores for the edges of a pipeline: default records on a miss, and a
//! store that refuses everything.

use std::marker::PhantomData;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{fail, Sink};
use crate::store::{ListenerId, Store};

/// A `Store` decorator whose `find` answers a miss with a record built
/// by `factory` from the key. The default record is not stored.
pub struct DefaultObjectStore<R, S, F> {
    delegate: S,
    factory: F,
    _record: PhantomData<fn() -> R>,
}

impl<R, S, F> DefaultObjectStore<R, S, F>
where
    R: Record,
    S: Store<R>,
    F: Fn(&Key) -> R + Send + Sync,
{
    pub fn new(delegate: S, factory: F) -> Self {
        DefaultObjectStore {
            delegate,
            factory,
            _record: PhantomData,
        }
    }
}

#[async_trait]
impl<R, S, F> Store<R> for DefaultObjectStore<R, S, F>
where
    R: Record,
    S: Store<R>,
    F: Fn(&Key) -> R + Send + Sync,
{
    async fn put(&self, record: R) -> StoreResult<R> {
        self.delegate.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.delegate.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        match self.delegate.find(key).await {
            Ok(record) => Ok(record),
            Err(err) if err.is_not_found() => {
                debug!(collection = R::COLLECTION, key = %key, "default object");
                Ok((self.factory)(key))
            }
            Err(err) => Err(err),
        }
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.remove_all(sink, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.delegate.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.delegate.unlisten(id)
    }
}

/// A store that rejects every write, finds nothing, and fails every
/// stream. Listening is accepted and never notified.
pub struct ErrorStore<R> {
    reason: String,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> ErrorStore<R> {
    pub fn new(reason: impl Into<String>) -> Self {
        ErrorStore {
            reason: reason.into(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> Default for ErrorStore<R> {
    fn default() -> Self {
        Self::new("store unavailable")
    }
}

#[async_trait]
impl<R: Record> Store<R> for ErrorStore<R> {
    async fn put(&self, _record: R) -> StoreResult<R> {
        Err(StoreError::rejected(Operation::Put, self.reason.clone()))
    }

    async fn remove(&self, _key: &Key) -> StoreResult<R> {
        Err(StoreError::rejected(Operation::Remove, self.reason.clone()))
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        Err(StoreError::not_found(Operation::Find, key))
    }

    async fn select(&self, sink: &mut dyn Sink<R>, _options: &SelectOptions) -> StoreResult<()> {
        fail(sink, StoreError::rejected(Operation::Select, self.reason.clone())).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, _options: &SelectOptions) -> StoreResult<()> {
        fail(sink, StoreError::rejected(Operation::RemoveAll, self.reason.clone())).await
    }

    fn listen(&self, _sink: Box<dyn Sink<R>>, _options: SelectOptions) -> ListenerId {
        ListenerId::detached()
    }

    fn unlisten(&self, _id: ListenerId) -> bool {
        false
    }
}
