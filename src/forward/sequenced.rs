//! SequencedStore - assigns increasing sequence numbers on put.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Operation, StoreResult};
use crate::query::{Order, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::Sink;
use crate::store::{ListenerId, Store, StoreExt};

/// Records carrying a sequence number (`<= 0` means unassigned).
pub trait Sequenced {
    /// Field the sequence is stored under.
    const FIELD: &'static str = "id";

    fn sequence(&self) -> i64;

    fn set_sequence(&mut self, sequence: i64);
}

/// A `Store` decorator numbering new records `max + 1`, continuing from
/// whatever the delegate already holds.
pub struct SequencedStore<T, S> {
    delegate: S,
    last: Mutex<Option<i64>>,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T: Record + Sequenced, S: Store<T>> SequencedStore<T, S> {
    pub fn new(delegate: S) -> Self {
        SequencedStore {
            delegate,
            last: Mutex::new(None),
            _record: std::marker::PhantomData,
        }
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    async fn max_sequence(&self) -> StoreResult<i64> {
        let options = SelectOptions::new()
            .with_order(Order::desc(T::FIELD))
            .with_limit(1);
        let newest = self.delegate.select_vec(&options).await?;
        Ok(newest.first().map(Sequenced::sequence).unwrap_or(0))
    }

    async fn next_sequence(&self) -> StoreResult<i64> {
        let mut last = self.last.lock().await;
        let current = match *last {
            Some(current) => current,
            None => self.max_sequence().await.map_err(|e| e.with_op(Operation::Put))?,
        };
        let next = current + 1;
        *last = Some(next);
        Ok(next)
    }
}

#[async_trait]
impl<T: Record + Sequenced, S: Store<T>> Store<T> for SequencedStore<T, S> {
    async fn put(&self, mut record: T) -> StoreResult<T> {
        if record.sequence() <= 0 {
            record.set_sequence(self.next_sequence().await?);
        }
        self.delegate.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<T> {
        self.delegate.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<T> {
        self.delegate.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<T>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<T>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.remove_all(sink, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<T>>, options: SelectOptions) -> ListenerId {
        self.delegate.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.delegate.unlisten(id)
    }
}
