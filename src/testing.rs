//! Fixtures shared by unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::Key;
use crate::sink::{fail, Sink};
use crate::store::{InMemoryStore, ListenerId, Store};
use crate::Record;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Record)]
#[record(collection = "issues")]
pub struct Issue {
    pub id: i64,
    pub title: String,
    pub status: String,
    pub priority: i64,
}

pub fn issue(id: i64) -> Issue {
    Issue {
        id,
        title: format!("issue {}", id),
        status: if id % 2 == 0 { "Open".into() } else { "Fixed".into() },
        priority: id % 3,
    }
}

pub fn seeded(n: i64) -> InMemoryStore<Issue> {
    InMemoryStore::from_records((1..=n).map(issue))
}

#[derive(Debug, Default)]
pub struct Calls {
    pub puts: AtomicUsize,
    pub removes: AtomicUsize,
    pub finds: AtomicUsize,
    pub selects: AtomicUsize,
    pub remove_alls: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// Forwards to an in-memory store, counting calls; can be switched offline.
#[derive(Clone)]
pub struct SpyStore<R> {
    pub inner: InMemoryStore<R>,
    pub calls: Arc<Calls>,
    offline: Arc<AtomicBool>,
}

impl<R: Record> SpyStore<R> {
    pub fn new(inner: InMemoryStore<R>) -> Self {
        SpyStore {
            inner,
            calls: Arc::new(Calls::default()),
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check(&self, op: Operation) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::transport(op, "offline"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<R: Record> Store<R> for SpyStore<R> {
    async fn put(&self, record: R) -> StoreResult<R> {
        self.calls.puts.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::Put)?;
        self.inner.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.calls.removes.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::Remove)?;
        self.inner.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.calls.finds.fetch_add(1, Ordering::SeqCst);
        self.check(Operation::Find)?;
        self.inner.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.calls.selects.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.check(Operation::Select) {
            return fail(sink, err).await;
        }
        self.inner.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.calls.remove_alls.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.check(Operation::RemoveAll) {
            return fail(sink, err).await;
        }
        self.inner.remove_all(sink, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.inner.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.unlisten(id)
    }
}
