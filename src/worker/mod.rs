//! Running a store inside its own task.
//!
//! `WorkerStore` is a handle speaking to a delegate owned by a worker
//! task. Every operation is a request carrying a oneshot reply; the
//! delegate's change notifications flow back and keep a local mirror
//! that answers `find` without a round-trip.

mod request;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, Sink, SinkEvent};
use crate::store::{ListenerId, Listeners, Store};

use request::{run, Envelope, Request};

/// Counters reported by a stopped worker.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub handled: usize,
    pub failed: usize,
}

type Mirror<R> = Arc<RwLock<HashMap<Key, R>>>;

/// Handle to a store running in a dedicated tokio task.
pub struct WorkerStore<R: Record> {
    requests: mpsc::UnboundedSender<Envelope<R>>,
    next_id: AtomicU64,
    in_flight: Mutex<HashSet<u64>>,
    mirror: Mirror<R>,
    listeners: Arc<Listeners<R>>,
    worker: Option<JoinHandle<WorkerStats>>,
    relay: JoinHandle<()>,
}

impl<R: Record> WorkerStore<R> {
    /// Moves `delegate` into a new worker task.
    pub fn spawn<S: Store<R> + 'static>(delegate: S) -> Self {
        let (requests, queue) = mpsc::unbounded_channel();
        let (events, notifications) = mpsc::unbounded_channel::<SinkEvent<R>>();
        let mirror: Mirror<R> = Arc::new(RwLock::new(HashMap::new()));
        let listeners = Arc::new(Listeners::new());

        let worker = tokio::spawn(run(delegate, queue, events));
        let relay = tokio::spawn(relay(notifications, mirror.clone(), listeners.clone()));
        debug!(collection = R::COLLECTION, "worker started");

        WorkerStore {
            requests,
            next_id: AtomicU64::new(1),
            in_flight: Mutex::new(HashSet::new()),
            mirror,
            listeners,
            worker: Some(worker),
            relay,
        }
    }

    /// Requests sent and not yet answered.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().map(|ids| ids.len()).unwrap_or(0)
    }

    /// Records currently mirrored locally.
    pub fn mirrored(&self) -> usize {
        self.mirror.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Stops the worker after the requests already queued and returns
    /// its counters.
    pub async fn stop(mut self) -> WorkerStats {
        let _ = self.requests.send(Envelope {
            id: 0,
            request: Request::Stop,
        });
        match self.worker.take() {
            Some(worker) => worker.await.unwrap_or_default(),
            None => WorkerStats::default(),
        }
    }

    async fn call<T>(
        &self,
        op: Operation,
        request: impl FnOnce(oneshot::Sender<StoreResult<T>>) -> Request<R>,
    ) -> StoreResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, answer) = oneshot::channel();
        self.track(id, true)?;
        trace!(collection = R::COLLECTION, id, %op, "request");
        let sent = self.requests.send(Envelope {
            id,
            request: request(reply),
        });
        let result = match sent {
            Ok(()) => answer
                .await
                .unwrap_or_else(|_| Err(StoreError::transport(op, "worker stopped"))),
            Err(_) => Err(StoreError::transport(op, "worker stopped")),
        };
        self.track(id, false)?;
        result
    }

    fn track(&self, id: u64, started: bool) -> StoreResult<()> {
        let mut ids = self
            .in_flight
            .lock()
            .map_err(|_| StoreError::LockPoisoned("worker requests"))?;
        if started {
            ids.insert(id);
        } else {
            ids.remove(&id);
        }
        Ok(())
    }

    fn remember(&self, records: &[R]) -> StoreResult<()> {
        let mut mirror = self
            .mirror
            .write()
            .map_err(|_| StoreError::LockPoisoned("worker mirror"))?;
        for record in records {
            mirror.insert(record.key(), record.clone());
        }
        Ok(())
    }
}

impl<R: Record> Drop for WorkerStore<R> {
    fn drop(&mut self) {
        let _ = self.requests.send(Envelope {
            id: 0,
            request: Request::Stop,
        });
        self.relay.abort();
    }
}

/// Applies delegate notifications to the mirror, then to listeners.
async fn relay<R: Record>(
    mut notifications: mpsc::UnboundedReceiver<SinkEvent<R>>,
    mirror: Mirror<R>,
    listeners: Arc<Listeners<R>>,
) {
    while let Some(event) = notifications.recv().await {
        match event {
            SinkEvent::Put(record) => {
                if let Ok(mut mirror) = mirror.write() {
                    mirror.insert(record.key(), record.clone());
                }
                listeners.notify_put(&record).await;
            }
            SinkEvent::Remove(record) => {
                if let Ok(mut mirror) = mirror.write() {
                    mirror.remove(&record.key());
                }
                listeners.notify_remove(&record).await;
            }
            SinkEvent::Error(_) | SinkEvent::Eof => {}
        }
    }
}

#[async_trait]
impl<R: Record> Store<R> for WorkerStore<R> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let stored = self
            .call(Operation::Put, |reply| Request::Put(record, reply))
            .await?;
        self.remember(std::slice::from_ref(&stored))?;
        Ok(stored)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let removed = self
            .call(Operation::Remove, |reply| Request::Remove(key.clone(), reply))
            .await?;
        if let Ok(mut mirror) = self.mirror.write() {
            mirror.remove(key);
        }
        Ok(removed)
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        let cached = self
            .mirror
            .read()
            .map_err(|_| StoreError::LockPoisoned("worker mirror"))?
            .get(key)
            .cloned();
        if let Some(record) = cached {
            trace!(collection = R::COLLECTION, key = %key, "mirror hit");
            return Ok(record);
        }
        let found = self
            .call(Operation::Find, |reply| Request::Find(key.clone(), reply))
            .await?;
        self.remember(std::slice::from_ref(&found))?;
        Ok(found)
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let rows = self
            .call(Operation::Select, |reply| {
                Request::Select(options.clone(), reply)
            })
            .await;
        match rows {
            Ok(rows) => {
                self.remember(&rows)?;
                stream_into(sink, rows, Operation::Select).await
            }
            Err(err) => fail(sink, err).await,
        }
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let rows = self
            .call(Operation::RemoveAll, |reply| {
                Request::RemoveAll(options.clone(), reply)
            })
            .await;
        match rows {
            Ok(rows) => {
                if let Ok(mut mirror) = self.mirror.write() {
                    for record in &rows {
                        mirror.remove(&record.key());
                    }
                }
                stream_into(sink, rows, Operation::RemoveAll).await
            }
            Err(err) => fail(sink, err).await,
        }
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.listeners.add(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::eq;
    use crate::store::StoreExt;
    use crate::testing::{issue, seeded, Calls, SpyStore};

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn operations_round_trip_through_the_worker() {
        let store = WorkerStore::spawn(seeded(3));

        store.put(issue(4)).await.unwrap();
        assert_eq!(store.select_all().await.unwrap().len(), 4);
        assert_eq!(store.remove(&Key::from(1)).await.unwrap(), issue(1));
        let fixed = store
            .select_vec(&SelectOptions::new().with_query(eq("status", "Fixed")))
            .await
            .unwrap();
        assert_eq!(fixed, vec![issue(3)]);
        assert_eq!(store.in_flight(), 0);

        let stats = store.stop().await;
        assert_eq!(stats, WorkerStats { handled: 4, failed: 0 });
    }

    #[tokio::test]
    async fn find_is_answered_from_the_mirror() {
        let spy = SpyStore::new(seeded(2));
        let store = WorkerStore::spawn(spy.clone());

        assert_eq!(store.find(&Key::from(2)).await.unwrap(), issue(2));
        assert_eq!(store.find(&Key::from(2)).await.unwrap(), issue(2));
        assert_eq!(Calls::get(&spy.calls.finds), 1);

        assert!(store.find(&Key::from(9)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn delegate_changes_reach_listeners_and_mirror() {
        let backing = seeded(1);
        let store = WorkerStore::spawn(backing.clone());
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkEvent<crate::testing::Issue>>();
        store.listen(Box::new(tx), SelectOptions::default());
        settle().await;

        backing.put(issue(7)).await.unwrap();
        settle().await;

        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Put(i)) if i.id == 7));
        assert_eq!(store.mirrored(), 1);
    }
}
