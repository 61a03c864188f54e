use std::marker::PhantomData;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{stream_into, Delivery, Sink};
use crate::store::{ListenerId, Store, StoreExt};

struct Parked {
    release: oneshot::Sender<()>,
    done: oneshot::Receiver<()>,
}

/// A `Store` decorator whose selects fetch immediately but deliver
/// nothing until `join` is called.
pub struct ManuallyDelayedStore<R, S> {
    delegate: S,
    parked: Mutex<Vec<Parked>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, S: Store<R>> ManuallyDelayedStore<R, S> {
    pub fn new(delegate: S) -> Self {
        ManuallyDelayedStore {
            delegate,
            parked: Mutex::new(Vec::new()),
            _record: PhantomData,
        }
    }

    pub fn parked(&self) -> StoreResult<usize> {
        self.parked
            .lock()
            .map(|parked| parked.len())
            .map_err(|_| StoreError::LockPoisoned("parked"))
    }

    /// Releases every select parked so far and waits until all of them
    /// have drained into their sinks. Returns how many were released.
    pub async fn join(&self) -> StoreResult<usize> {
        let parked = std::mem::take(
            &mut *self
                .parked
                .lock()
                .map_err(|_| StoreError::LockPoisoned("parked"))?,
        );
        let released = parked.len();
        let mut waits = Vec::with_capacity(released);
        for entry in parked {
            let _ = entry.release.send(());
            waits.push(entry.done);
        }
        join_all(waits).await;
        debug!(collection = R::COLLECTION, released, "released parked selects");
        Ok(released)
    }
}

#[async_trait]
impl<R: Record, S: Store<R>> Store<R> for ManuallyDelayedStore<R, S> {
    async fn put(&self, record: R) -> StoreResult<R> {
        self.delegate.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.delegate.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.delegate.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let (release, released) = oneshot::channel();
        let (finished, done) = oneshot::channel();
        self.parked
            .lock()
            .map_err(|_| StoreError::LockPoisoned("parked"))?
            .push(Parked { release, done });

        let fetched = self.delegate.select_vec(options).await;
        if released.await.is_err() {
            let err = StoreError::Aborted {
                op: Operation::Select,
                detail: Some("store dropped before join".into()),
            };
            return Delivery::new(sink, Operation::Select).fail(err).await;
        }

        let result = match fetched {
            Ok(rows) => stream_into(sink, rows, Operation::Select).await,
            Err(err) => Delivery::new(sink, Operation::Select).fail(err).await,
        };
        let _ = finished.send(());
        result
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
