//! PartitionStore - hash-partitions records across several stores.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde_json::Value;
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::error::{Operation, StoreResult};
use crate::query::{compare_by, Order, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, FlowControl, Sink, SinkEvent};
use crate::store::{ListenerId, Listeners, Store};

/// Re-publishes partition events as the partition store's own.
struct Relay<R> {
    listeners: Arc<Listeners<R>>,
}

#[async_trait]
impl<R: Record> Sink<R> for Relay<R> {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        match event {
            SinkEvent::Put(record) => self.listeners.notify_put(&record).await,
            SinkEvent::Remove(record) => self.listeners.notify_remove(&record).await,
            SinkEvent::Error(_) | SinkEvent::Eof => {}
        }
    }
}

/// Routes each key to `xxh64(key) mod N`; selects fan out to every
/// partition and merge.
pub struct PartitionStore<R: Record, S: Store<R>> {
    partitions: Vec<S>,
    listeners: Arc<Listeners<R>>,
    relays: Vec<ListenerId>,
}

impl<R: Record, S: Store<R>> PartitionStore<R, S> {
    /// # Panics
    ///
    /// Panics if `partitions` is empty.
    pub fn new(partitions: Vec<S>) -> Self {
        assert!(!partitions.is_empty(), "PartitionStore needs at least one partition");
        let listeners = Arc::new(Listeners::new());
        let relays = partitions
            .iter()
            .map(|partition| {
                partition.listen(
                    Box::new(Relay {
                        listeners: listeners.clone(),
                    }),
                    SelectOptions::default(),
                )
            })
            .collect();
        PartitionStore {
            partitions,
            listeners,
            relays,
        }
    }

    pub fn partitions(&self) -> &[S] {
        &self.partitions
    }

    pub fn partition_index(&self, key: &Key) -> usize {
        (xxh64(key.to_string().as_bytes(), 0) % self.partitions.len() as u64) as usize
    }

    fn partition_for(&self, key: &Key) -> &S {
        &self.partitions[self.partition_index(key)]
    }

    /// Runs a select against every partition with `limit = skip + limit`
    /// and `skip = 0`, failing as soon as one partition fails.
    async fn gather(&self, options: &SelectOptions) -> StoreResult<Vec<Vec<R>>> {
        let per_partition = SelectOptions {
            query: options.query.clone(),
            order: options.order.clone(),
            skip: 0,
            limit: options.limit.map(|limit| limit.saturating_add(options.skip)),
        };
        let per_partition = &per_partition;
        try_join_all(self.partitions.iter().map(|partition| async move {
            let mut rows: Vec<R> = Vec::new();
            partition.select(&mut rows, per_partition).await?;
            Ok(rows)
        }))
        .await
    }
}

/// k-way merge of individually ordered runs; ties keep partition order.
fn merge_ordered<R: Record>(runs: Vec<Vec<R>>, order: &[Order]) -> StoreResult<Vec<R>> {
    let mut runs: Vec<VecDeque<(Value, R)>> = runs
        .into_iter()
        .map(|run| {
            run.into_iter()
                .map(|record| Ok((record.to_value()?, record)))
                .collect::<StoreResult<VecDeque<_>>>()
        })
        .collect::<StoreResult<_>>()?;

    let mut merged = Vec::new();
    loop {
        let best = runs
            .iter()
            .enumerate()
            .filter_map(|(i, run)| run.front().map(|(value, _)| (i, value)))
            .min_by(|(ia, a), (ib, b)| compare_by(order, a, b).then(ia.cmp(ib)))
            .map(|(i, _)| i);
        let Some(i) = best else {
            break;
        };
        if let Some((_, record)) = runs[i].pop_front() {
            merged.push(record);
        }
    }
    Ok(merged)
}

impl<R: Record, S: Store<R>> Drop for PartitionStore<R, S> {
    fn drop(&mut self) {
        for (partition, id) in self.partitions.iter().zip(self.relays.iter()) {
            partition.unlisten(*id);
        }
    }
}

#[async_trait]
impl<R: Record, S: Store<R>> Store<R> for PartitionStore<R, S> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let key = record.key();
        self.partition_for(&key).put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.partition_for(key).remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.partition_for(key).find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let runs = match self.gather(options).await {
            Ok(runs) => runs,
            Err(err) => return fail(sink, err.with_op(Operation::Select)).await,
        };
        debug!(
            collection = R::COLLECTION,
            partitions = runs.len(),
            "merging partition selects"
        );
        let merged = if options.order.is_empty() {
            runs.into_iter().flatten().collect()
        } else {
            match merge_ordered(runs, &options.order) {
                Ok(merged) => merged,
                Err(err) => return fail(sink, err.with_op(Operation::Select)).await,
            }
        };
        stream_into(sink, options.page(merged), Operation::Select).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let removed: StoreResult<Vec<Vec<R>>> =
            try_join_all(self.partitions.iter().map(|partition| async move {
                let mut rows: Vec<R> = Vec::new();
                partition.remove_all(&mut rows, options).await?;
                Ok(rows)
            }))
            .await;
        match removed {
            Ok(runs) => {
                stream_into(sink, runs.into_iter().flatten(), Operation::RemoveAll).await
            }
            Err(err) => fail(sink, err.with_op(Operation::RemoveAll)).await,
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
    use crate::error::StoreError;
    use crate::query::eq;
    use crate::sink::Collector;
    use crate::store::{InMemoryStore, StoreExt};
    use crate::testing::{issue, Issue, SpyStore};
    use tokio::sync::mpsc;

    fn partitioned(n: usize) -> PartitionStore<Issue, InMemoryStore<Issue>> {
        PartitionStore::new((0..n).map(|_| InMemoryStore::new()).collect())
    }

    #[tokio::test]
    async fn records_spread_and_are_found_again() {
        let store = partitioned(3);
        for id in 1..=30 {
            store.put(issue(id)).await.unwrap();
        }
        let sizes: Vec<usize> = store.partitions().iter().map(|p| p.len()).collect();
        assert_eq!(sizes.iter().sum::<usize>(), 30);
        assert!(sizes.iter().all(|&n| n > 0));

        for id in 1..=30 {
            assert_eq!(store.find(&Key::from(id)).await.unwrap(), issue(id));
        }
    }

    #[tokio::test]
    async fn ordered_select_matches_single_store() {
        let store = partitioned(4);
        let reference = InMemoryStore::new();
        for id in 1..=40 {
            store.put(issue(id)).await.unwrap();
            reference.put(issue(id)).await.unwrap();
        }
        let options = SelectOptions::new()
            .with_query(eq("status", "Open"))
            .with_order(Order::desc("priority"))
            .with_order(Order::asc("id"))
            .with_skip(3)
            .with_limit(7);

        assert_eq!(
            store.select_vec(&options).await.unwrap(),
            reference.select_vec(&options).await.unwrap()
        );
    }

    #[tokio::test]
    async fn one_failing_partition_fails_the_select_once() {
        let healthy = SpyStore::new(InMemoryStore::new());
        let broken = SpyStore::new(InMemoryStore::new());
        broken.set_offline(true);
        let store = PartitionStore::new(vec![healthy, broken]);

        let mut sink = Collector::<Issue>::new();
        let result = store.select(&mut sink, &SelectOptions::default()).await;
        assert!(result.is_err());
        assert!(sink.error.is_some());
        assert!(!sink.eof);
    }

    #[tokio::test]
    async fn partition_events_reach_listeners() {
        let store = partitioned(2);
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkEvent<Issue>>();
        store.listen(Box::new(tx), SelectOptions::default());

        store.put(issue(5)).await.unwrap();
        store.remove(&Key::from(5)).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Put(i)) if i.id == 5));
        assert!(matches!(rx.try_recv(), Ok(SinkEvent::Remove(i)) if i.id == 5));
    }

    #[tokio::test]
    async fn remove_all_spans_partitions() {
        let store = partitioned(3);
        for id in 1..=9 {
            store.put(issue(id)).await.unwrap();
        }
        let removed = store
            .remove_matching(&SelectOptions::new().with_query(eq("status", "Fixed")))
            .await
            .unwrap();
        assert_eq!(removed.len(), 5);
        assert_eq!(store.select_all().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn max_limit_means_everything_after_skip() {
        let store = partitioned(3);
        for id in 1..=12 {
            store.put(issue(id)).await.unwrap();
        }
        let options = SelectOptions::new()
            .with_order(Order::asc("id"))
            .with_skip(4)
            .with_limit(usize::MAX);
        let ids: Vec<i64> = store
            .select_vec(&options)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, (5..=12).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn sink_stop_ends_the_merged_stream() {
        let store = partitioned(4);
        for id in 1..=10 {
            store.put(issue(id)).await.unwrap();
        }
        let mut sink = Collector::new().stop_after(1);
        let result = store
            .select(&mut sink, &SelectOptions::new().with_order(Order::asc("id")))
            .await;

        assert!(matches!(
            result,
            Err(StoreError::Aborted { op: Operation::Select, detail: None })
        ));
        assert_eq!(sink.records, vec![issue(1)]);
        assert!(!sink.eof);
        assert!(matches!(sink.error, Some(StoreError::Aborted { .. })));
    }
}
