use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::StoreResult;
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{Collector, SinkEvent};
use crate::store::Store;

use super::WorkerStats;

type Reply<T> = oneshot::Sender<StoreResult<T>>;

pub(crate) enum Request<R> {
    Put(R, Reply<R>),
    Remove(Key, Reply<R>),
    Find(Key, Reply<R>),
    Select(SelectOptions, Reply<Vec<R>>),
    RemoveAll(SelectOptions, Reply<Vec<R>>),
    Stop,
}

pub(crate) struct Envelope<R> {
    pub id: u64,
    pub request: Request<R>,
}

fn answer<T>(reply: Reply<T>, result: StoreResult<T>) -> bool {
    let ok = result.is_ok();
    let _ = reply.send(result);
    ok
}

/// The worker loop: owns the delegate and serves requests one at a time.
pub(crate) async fn run<R, S>(
    delegate: S,
    mut queue: mpsc::UnboundedReceiver<Envelope<R>>,
    events: mpsc::UnboundedSender<SinkEvent<R>>,
) -> WorkerStats
where
    R: Record,
    S: Store<R>,
{
    let listener = delegate.listen(Box::new(events), SelectOptions::default());
    let mut stats = WorkerStats::default();

    while let Some(Envelope { id, request }) = queue.recv().await {
        let ok = match request {
            Request::Put(record, reply) => answer(reply, delegate.put(record).await),
            Request::Remove(key, reply) => answer(reply, delegate.remove(&key).await),
            Request::Find(key, reply) => answer(reply, delegate.find(&key).await),
            Request::Select(options, reply) => {
                let mut rows = Collector::new();
                let result = delegate.select(&mut rows, &options).await;
                answer(reply, result.map(|_| rows.records))
            }
            Request::RemoveAll(options, reply) => {
                let mut rows = Collector::new();
                let result = delegate.remove_all(&mut rows, &options).await;
                answer(reply, result.map(|_| rows.removed))
            }
            Request::Stop => break,
        };
        trace!(collection = R::COLLECTION, id, ok, "served");
        if ok {
            stats.handled += 1;
        } else {
            stats.failed += 1;
        }
    }

    delegate.unlisten(listener);
    debug!(
        collection = R::COLLECTION,
        handled = stats.handled,
        failed = stats.failed,
        "worker stopped"
    );
    stats
}
