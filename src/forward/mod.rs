//! Store-and-forward: local-first durable queue of mutations.
//!
//! Every `put`/`remove` is appended to a sequenced operation log and
//! acknowledged as soon as the append succeeds. A pump task forwards the
//! log to the delegate in sequence order, deleting applied operations and
//! retrying the rest every `retry_interval` until the log is empty.

mod operation;
mod sequenced;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::{Order, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{CountSink, Sink};
use crate::store::{ListenerId, Listeners, Store, StoreExt};

pub use operation::{ForwardMethod, ForwardOperation};
pub use sequenced::{Sequenced, SequencedStore};

pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(5000);

/// Result of one forwarding pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub forwarded: usize,
    pub remaining: usize,
}

/// State shared between the store handle and its pump task.
struct Forwarder<R: Record, S, L> {
    delegate: S,
    log: SequencedStore<ForwardOperation<R>, L>,
    listeners: Listeners<R>,
    syncing: AtomicBool,
}

impl<R, S, L> Forwarder<R, S, L>
where
    R: Record,
    S: Store<R>,
    L: Store<ForwardOperation<R>>,
{
    async fn pending(&self) -> StoreResult<usize> {
        let mut count = CountSink::default();
        self.log.select(&mut count, &SelectOptions::default()).await?;
        Ok(count.count)
    }

    /// Attempts every queued operation in sequence order and keeps the
    /// ones that fail. Later operations on a key whose earlier operation
    /// failed wait for the next pass so they never overtake it.
    async fn forward_once(&self) -> StoreResult<ForwardStats> {
        let ops = self
            .log
            .select_vec(&SelectOptions::new().with_order(Order::asc("id")))
            .await?;
        let mut stats = ForwardStats {
            forwarded: 0,
            remaining: ops.len(),
        };
        let mut blocked: HashSet<Key> = HashSet::new();

        for op in ops {
            if blocked.contains(&op.obj.key()) {
                continue;
            }
            let applied = match op.method {
                ForwardMethod::Put => self.delegate.put(op.obj.clone()).await.map(|stored| {
                    let original = op.obj.key();
                    (Some(stored), original)
                }),
                ForwardMethod::Remove => self
                    .delegate
                    .remove(&op.obj.key())
                    .await
                    .map(|_| (None, op.obj.key())),
            };

            match applied {
                Ok((stored, original)) => {
                    self.log.remove(&op.key()).await?;
                    stats.forwarded += 1;
                    stats.remaining -= 1;
                    match stored {
                        Some(stored) => {
                            if stored.key() != original {
                                debug!(
                                    collection = R::COLLECTION,
                                    from = %original,
                                    to = %stored.key(),
                                    "delegate assigned a new key"
                                );
                                self.listeners.notify_remove(&op.obj).await;
                            }
                            self.listeners.notify_put(&stored).await;
                        }
                        None => self.listeners.notify_remove(&op.obj).await,
                    }
                }
                Err(err) if err.is_not_found() && op.method == ForwardMethod::Remove => {
                    // Already gone upstream.
                    self.log.remove(&op.key()).await?;
                    stats.forwarded += 1;
                    stats.remaining -= 1;
                }
                Err(err) => {
                    warn!(
                        collection = R::COLLECTION,
                        op = op.id,
                        method = %op.method,
                        error = %err,
                        "forward failed, will retry"
                    );
                    blocked.insert(op.obj.key());
                }
            }
        }

        if stats.forwarded > 0 {
            info!(
                collection = R::COLLECTION,
                forwarded = stats.forwarded,
                remaining = stats.remaining,
                "forwarded queued operations"
            );
        }
        Ok(stats)
    }

    async fn run(self: Arc<Self>, retry_interval: Duration) {
        loop {
            if let Err(err) = self.forward_once().await {
                warn!(collection = R::COLLECTION, error = %err, "operation log unavailable");
            }
            if let Ok(0) = self.pending().await {
                self.syncing.store(false, Ordering::SeqCst);
                // An append may have raced the emptiness check.
                let raced = matches!(self.pending().await, Ok(n) if n > 0);
                if raced
                    && self
                        .syncing
                        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                {
                    continue;
                }
                break;
            }
            tokio::time::sleep(retry_interval).await;
        }
    }
}

/// A `Store` decorator acknowledging writes once they are durable in a
/// local operation log, then forwarding them to the delegate.
///
/// `find` and `select` read the delegate directly; `remove_all` passes
/// through unqueued. Listeners hear about operations once the delegate
/// applied them. Delivery is at-least-once.
pub struct StoreAndForwardStore<R: Record, S, L> {
    inner: Arc<Forwarder<R, S, L>>,
    retry_interval: Duration,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<R, S, L> StoreAndForwardStore<R, S, L>
where
    R: Record,
    S: Store<R> + 'static,
    L: Store<ForwardOperation<R>> + 'static,
{
    /// `log` holds queued operations; back it with a durable store to
    /// survive restarts, then call `resume`.
    pub fn new(delegate: S, log: L) -> Self {
        StoreAndForwardStore {
            inner: Arc::new(Forwarder {
                delegate,
                log: SequencedStore::new(log),
                listeners: Listeners::new(),
                syncing: AtomicBool::new(false),
            }),
            retry_interval: DEFAULT_RETRY_INTERVAL,
            pump: Mutex::new(None),
        }
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn delegate(&self) -> &S {
        &self.inner.delegate
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    /// Number of operations waiting to be forwarded.
    pub async fn pending(&self) -> StoreResult<usize> {
        self.inner.pending().await
    }

    /// Restart forwarding of operations left over from an earlier run.
    pub async fn resume(&self) -> StoreResult<usize> {
        let pending = self.pending().await?;
        if pending > 0 {
            info!(collection = R::COLLECTION, pending, "resuming forwarding");
            self.start_pump();
        }
        Ok(pending)
    }

    /// One forwarding pass, independent of the pump.
    pub async fn sync_now(&self) -> StoreResult<ForwardStats> {
        self.inner.forward_once().await
    }

    /// Queue `record` for removal without consulting the delegate.
    pub async fn remove_record(&self, record: R) -> StoreResult<R> {
        self.enqueue(ForwardOperation::remove(record.clone()), Operation::Remove)
            .await?;
        Ok(record)
    }

    async fn enqueue(&self, op: ForwardOperation<R>, tag: Operation) -> StoreResult<()> {
        self.inner.log.put(op).await.map_err(|err| err.with_op(tag))?;
        self.start_pump();
        Ok(())
    }

    fn start_pump(&self) {
        if self
            .inner
            .syncing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let handle = tokio::spawn(self.inner.clone().run(self.retry_interval));
        if let Ok(mut pump) = self.pump.lock() {
            *pump = Some(handle);
        }
    }

    /// The record a remove by key acknowledges: the newest queued put, or
    /// the delegate's copy. A key whose newest queued operation is a
    /// remove is already gone.
    async fn resolve(&self, key: &Key) -> StoreResult<R> {
        let queued = self
            .inner
            .log
            .select_vec(&SelectOptions::new().with_order(Order::desc("id")))
            .await
            .map_err(|err| err.with_op(Operation::Remove))?;
        if let Some(op) = queued.into_iter().find(|op| &op.obj.key() == key) {
            return match op.method {
                ForwardMethod::Put => Ok(op.obj),
                ForwardMethod::Remove => Err(StoreError::not_found(Operation::Remove, key)),
            };
        }
        self.inner
            .delegate
            .find(key)
            .await
            .map_err(|err| err.with_op(Operation::Remove))
    }
}

impl<R: Record, S, L> Drop for StoreAndForwardStore<R, S, L> {
    fn drop(&mut self) {
        if let Ok(mut pump) = self.pump.lock() {
            if let Some(handle) = pump.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl<R, S, L> Store<R> for StoreAndForwardStore<R, S, L>
where
    R: Record,
    S: Store<R> + 'static,
    L: Store<ForwardOperation<R>> + 'static,
{
    async fn put(&self, record: R) -> StoreResult<R> {
        self.enqueue(ForwardOperation::put(record.clone()), Operation::Put)
            .await?;
        Ok(record)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let record = self.resolve(key).await?;
        self.remove_record(record).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.inner.delegate.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.inner.delegate.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.inner.delegate.remove_all(sink, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.inner.listeners.add(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }
}
