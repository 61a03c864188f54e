//! LruCacheStore - bounded recency cache in front of a delegate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Operation, StoreResult};
use crate::query::{Order, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{FlowControl, NullSink, Sink, SinkEvent};
use crate::store::{InMemoryStore, ListenerId, Store};

pub const DEFAULT_MAX_SIZE: usize = 100;

/// One cached record with its logical access time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LruEntry<R> {
    pub id: Key,
    pub obj: R,
    pub timestamp: u64,
}

impl<R: Record> Record for LruEntry<R> {
    const COLLECTION: &'static str = "lru_entries";

    fn key(&self) -> Key {
        self.id.clone()
    }
}

/// Keeps cached entries coherent with writes the delegate reports.
struct CoherenceSink<R> {
    cache: InMemoryStore<LruEntry<R>>,
}

#[async_trait]
impl<R: Record> Sink<R> for CoherenceSink<R> {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        match event {
            SinkEvent::Remove(record) => {
                let _ = self.cache.remove(&record.key()).await;
            }
            SinkEvent::Put(record) => {
                let key = record.key();
                if let Ok(mut entry) = self.cache.find(&key).await {
                    entry.obj = record;
                    let _ = self.cache.put(entry).await;
                }
            }
            SinkEvent::Error(_) | SinkEvent::Eof => {}
        }
    }
}

/// Relays delegate removals to the caller while evicting them.
struct EvictingSink<'a, R> {
    inner: &'a mut dyn Sink<R>,
    cache: &'a InMemoryStore<LruEntry<R>>,
}

#[async_trait]
impl<'a, R: Record> Sink<R> for EvictingSink<'a, R> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        if let SinkEvent::Remove(record) = &event {
            let _ = self.cache.remove(&record.key()).await;
        }
        self.inner.handle(event, fc).await
    }
}

/// A `Store` decorator caching up to `max_size` recently used records.
///
/// - `find` hits refresh recency; misses load from the delegate and evict
///   the least recently used entries beyond `max_size`.
/// - `put`/`remove`/`remove_all` keep cache and delegate in lockstep.
/// - Removes the delegate reports from other writers evict too.
/// - `select` and `listen` pass through.
pub struct LruCacheStore<R: Record, S: Store<R>> {
    delegate: Arc<S>,
    cache: InMemoryStore<LruEntry<R>>,
    clock: AtomicU64,
    max_size: usize,
    listener: ListenerId,
}

impl<R: Record, S: Store<R>> LruCacheStore<R, S> {
    pub fn new(delegate: S) -> Self {
        let delegate = Arc::new(delegate);
        let cache = InMemoryStore::new();
        let listener = delegate.listen(
            Box::new(CoherenceSink {
                cache: cache.clone(),
            }),
            SelectOptions::default(),
        );
        LruCacheStore {
            delegate,
            cache,
            clock: AtomicU64::new(0),
            max_size: DEFAULT_MAX_SIZE,
            listener,
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    /// Cached keys, most recently used first.
    pub async fn cached_keys(&self) -> StoreResult<Vec<Key>> {
        let mut entries: Vec<LruEntry<R>> = Vec::new();
        self.cache
            .select(&mut entries, &SelectOptions::new().with_order(Order::desc("timestamp")))
            .await?;
        Ok(entries.into_iter().map(|e| e.id).collect())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn remember(&self, record: R) -> StoreResult<()> {
        let entry = LruEntry {
            id: record.key(),
            obj: record,
            timestamp: self.tick(),
        };
        self.cache.put(entry).await?;
        self.cleanup().await
    }

    /// Evict everything past `max_size` in recency order.
    async fn cleanup(&self) -> StoreResult<()> {
        if self.cache.len() <= self.max_size {
            return Ok(());
        }
        let options = SelectOptions::new()
            .with_order(Order::desc("timestamp"))
            .with_skip(self.max_size);
        let mut sink = NullSink;
        self.cache.remove_all(&mut sink, &options).await
    }
}

impl<R: Record, S: Store<R>> Drop for LruCacheStore<R, S> {
    fn drop(&mut self) {
        self.delegate.unlisten(self.listener);
    }
}

#[async_trait]
impl<R: Record, S: Store<R>> Store<R> for LruCacheStore<R, S> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let original = record.key();
        match self.delegate.put(record).await {
            Ok(stored) => {
                if stored.key() != original {
                    let _ = self.cache.remove(&original).await;
                }
                self.remember(stored.clone()).await?;
                Ok(stored)
            }
            Err(err) => {
                let _ = self.cache.remove(&original).await;
                Err(err)
            }
        }
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let result = self.delegate.remove(key).await;
        let _ = self.cache.remove(key).await;
        result
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        if let Ok(mut entry) = self.cache.find(key).await {
            debug!(collection = R::COLLECTION, key = %key, "lru hit");
            entry.timestamp = self.tick();
            let record = entry.obj.clone();
            self.cache.put(entry).await?;
            return Ok(record);
        }
        debug!(collection = R::COLLECTION, key = %key, "lru miss");
        let record = self
            .delegate
            .find(key)
            .await
            .map_err(|err| err.with_op(Operation::Find))?;
        self.remember(record.clone()).await?;
        Ok(record)
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut evicting = EvictingSink {
            inner: sink,
            cache: &self.cache,
        };
        self.delegate.remove_all(&mut evicting, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.delegate.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.delegate.unlisten(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Issue {
        id: i64,
        title: String,
    }

    impl Record for Issue {
        const COLLECTION: &'static str = "issues";
        fn key(&self) -> Key {
            Key::from(self.id)
        }
    }

    fn issue(id: i64) -> Issue {
        Issue {
            id,
            title: format!("issue {}", id),
        }
    }

    fn seeded(n: i64) -> InMemoryStore<Issue> {
        InMemoryStore::from_records((1..=n).map(issue))
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let lru = LruCacheStore::new(seeded(5)).with_max_size(2);
        lru.find(&Key::from(1)).await.unwrap();
        lru.find(&Key::from(2)).await.unwrap();
        lru.find(&Key::from(1)).await.unwrap();
        lru.find(&Key::from(3)).await.unwrap();

        assert_eq!(lru.cached_keys().await.unwrap(), vec![Key::from(3), Key::from(1)]);
    }

    #[tokio::test]
    async fn hit_does_not_consult_delegate() {
        let delegate = seeded(1);
        let lru = LruCacheStore::new(delegate.clone());
        lru.find(&Key::from(1)).await.unwrap();

        // Bypass the decorator; the cache still answers.
        delegate.replace_all(Vec::new()).unwrap();
        assert_eq!(lru.find(&Key::from(1)).await.unwrap(), issue(1));
    }

    #[tokio::test]
    async fn external_remove_evicts() {
        let delegate = seeded(2);
        let lru = LruCacheStore::new(delegate.clone());
        lru.find(&Key::from(2)).await.unwrap();

        delegate.remove(&Key::from(2)).await.unwrap();
        assert!(lru.cached_keys().await.unwrap().is_empty());
        assert!(lru.find(&Key::from(2)).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn put_updates_cache_and_delegate() {
        let delegate = seeded(1);
        let lru = LruCacheStore::new(delegate.clone());
        lru.find(&Key::from(1)).await.unwrap();

        let mut changed = issue(1);
        changed.title = "renamed".into();
        lru.put(changed.clone()).await.unwrap();

        assert_eq!(delegate.find(&Key::from(1)).await.unwrap(), changed);
        assert_eq!(lru.find(&Key::from(1)).await.unwrap(), changed);
    }

    #[tokio::test]
    async fn remove_all_evicts_removed_records() {
        let delegate = seeded(3);
        let lru = LruCacheStore::new(delegate.clone());
        for id in 1..=3 {
            lru.find(&Key::from(id)).await.unwrap();
        }
        let removed = lru.remove_matching(&SelectOptions::default()).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(lru.cached_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn drop_releases_delegate_listener() {
        let delegate = seeded(1);
        let lru = LruCacheStore::new(delegate.clone());
        assert_eq!(delegate.listener_count(), 1);
        drop(lru);
        assert_eq!(delegate.listener_count(), 0);
    }
}
