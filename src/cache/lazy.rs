//! LazyCacheStore - read-through cache with optional select deduplication.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::{SelectKey, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{fail, CountSink, FlowControl, Sink, SinkEvent};
use crate::store::{ListenerId, Store};

pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_millis(500);

type SharedSelect = Shared<BoxFuture<'static, StoreResult<()>>>;

struct InFlight {
    started: Instant,
    done: SharedSelect,
}

/// Writes every streamed record into the cache.
struct FillCache<C> {
    cache: Arc<C>,
}

#[async_trait]
impl<R: Record, C: Store<R>> Sink<R> for FillCache<C> {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        if let SinkEvent::Put(record) = event {
            let _ = self.cache.put(record).await;
        }
    }
}

struct EvictFromCache<'a, R, C> {
    inner: &'a mut dyn Sink<R>,
    cache: &'a C,
}

#[async_trait]
impl<'a, R: Record, C: Store<R>> Sink<R> for EvictFromCache<'a, R, C> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        if let SinkEvent::Remove(record) = &event {
            let _ = self.cache.remove(&record.key()).await;
        }
        self.inner.handle(event, fc).await
    }
}

/// A `Store` decorator that serves reads from a cache store, falling back
/// to the delegate and writing results through.
///
/// With `cache_on_select`, logically equal selects issued within
/// `stale_timeout` share one delegate query that fills the cache; callers
/// read the cache at once when it already holds matches.
pub struct LazyCacheStore<R: Record, S: Store<R>, C: Store<R>> {
    delegate: Arc<S>,
    cache: Arc<C>,
    refresh_on_cache_hit: bool,
    cache_on_select: bool,
    stale_timeout: Duration,
    selects: Mutex<HashMap<SelectKey, InFlight>>,
    _record: std::marker::PhantomData<fn() -> R>,
}

impl<R, S, C> LazyCacheStore<R, S, C>
where
    R: Record,
    S: Store<R> + 'static,
    C: Store<R> + 'static,
{
    pub fn new(delegate: S, cache: C) -> Self {
        LazyCacheStore {
            delegate: Arc::new(delegate),
            cache: Arc::new(cache),
            refresh_on_cache_hit: false,
            cache_on_select: false,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            selects: Mutex::new(HashMap::new()),
            _record: std::marker::PhantomData,
        }
    }

    pub fn with_refresh_on_cache_hit(mut self, refresh: bool) -> Self {
        self.refresh_on_cache_hit = refresh;
        self
    }

    pub fn with_cache_on_select(mut self, enabled: bool) -> Self {
        self.cache_on_select = enabled;
        self
    }

    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    fn refresh_in_background(&self, key: Key) {
        let delegate = self.delegate.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            match delegate.find(&key).await {
                Ok(record) => {
                    let _ = cache.put(record).await;
                }
                Err(err) => debug!(collection = R::COLLECTION, key = %key, error = %err, "refresh failed"),
            }
        });
    }

    /// The shared delegate query for `options`, started now if none is fresh.
    fn delegate_select(&self, options: &SelectOptions) -> StoreResult<SharedSelect> {
        let key = options.select_key();
        let mut selects = self
            .selects
            .lock()
            .map_err(|_| StoreError::LockPoisoned("select"))?;
        let stale_timeout = self.stale_timeout;
        selects.retain(|_, entry| entry.started.elapsed() <= stale_timeout);
        if let Some(entry) = selects.get(&key) {
            debug!(collection = R::COLLECTION, query = %key.query, "joining in-flight select");
            return Ok(entry.done.clone());
        }

        let delegate = self.delegate.clone();
        let cache = self.cache.clone();
        let owned = options.clone();
        let handle = tokio::spawn(async move {
            let mut fill = FillCache { cache };
            delegate.select(&mut fill, &owned).await
        });
        let done: SharedSelect = async move {
            handle
                .await
                .unwrap_or_else(|err| Err(StoreError::transport(Operation::Select, err.to_string())))
        }
        .boxed()
        .shared();
        selects.insert(
            key,
            InFlight {
                started: Instant::now(),
                done: done.clone(),
            },
        );
        Ok(done)
    }
}

#[async_trait]
impl<R, S, C> Store<R> for LazyCacheStore<R, S, C>
where
    R: Record,
    S: Store<R> + 'static,
    C: Store<R> + 'static,
{
    async fn put(&self, record: R) -> StoreResult<R> {
        let stored = self.delegate.put(record).await?;
        self.cache
            .put(stored.clone())
            .await
            .map_err(|err| err.with_op(Operation::Put))
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let removed = self.delegate.remove(key).await;
        let _ = self.cache.remove(key).await;
        removed
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        if let Ok(record) = self.cache.find(key).await {
            debug!(collection = R::COLLECTION, key = %key, "lazy cache hit");
            if self.refresh_on_cache_hit {
                self.refresh_in_background(key.clone());
            }
            return Ok(record);
        }
        debug!(collection = R::COLLECTION, key = %key, "lazy cache miss");
        let record = self.delegate.find(key).await?;
        self.cache
            .put(record.clone())
            .await
            .map_err(|err| err.with_op(Operation::Find))
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        if !self.cache_on_select {
            return self.delegate.select(sink, options).await;
        }
        let done = match self.delegate_select(options) {
            Ok(done) => done,
            Err(err) => return fail(sink, err).await,
        };

        let mut count = CountSink::default();
        if let Err(err) = self.cache.select(&mut count, options).await {
            return fail(sink, err.with_op(Operation::Select)).await;
        }
        if count.count == 0 {
            if let Err(err) = done.await {
                return fail(sink, err.with_op(Operation::Select)).await;
            }
        }
        self.cache.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut evicting = EvictFromCache {
            inner: sink,
            cache: self.cache.as_ref(),
        };
        self.delegate.remove_all(&mut evicting, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.cache.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.cache.unlisten(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::eq;
    use crate::store::{InMemoryStore, StoreExt};
    use crate::testing::{issue, seeded, Calls, Issue, SpyStore};

    fn lazy(
        n: i64,
    ) -> (
        SpyStore<Issue>,
        LazyCacheStore<Issue, SpyStore<Issue>, InMemoryStore<Issue>>,
    ) {
        let delegate = SpyStore::new(seeded(n));
        let store = LazyCacheStore::new(delegate.clone(), InMemoryStore::new());
        (delegate, store)
    }

    #[tokio::test]
    async fn find_miss_writes_through() {
        let (delegate, store) = lazy(3);
        assert_eq!(store.find(&Key::from(2)).await.unwrap(), issue(2));
        assert!(store.cache().contains(&Key::from(2)));

        store.find(&Key::from(2)).await.unwrap();
        assert_eq!(Calls::get(&delegate.calls.finds), 1);
    }

    #[tokio::test]
    async fn refresh_on_hit_updates_cache_in_background() {
        let (delegate, store) = lazy(1);
        let store = store.with_refresh_on_cache_hit(true);
        store.find(&Key::from(1)).await.unwrap();

        let mut changed = issue(1);
        changed.title = "changed upstream".into();
        delegate.inner.put(changed.clone()).await.unwrap();

        // The hit still answers from the cache.
        assert_eq!(store.find(&Key::from(1)).await.unwrap(), issue(1));
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.cache().find(&Key::from(1)).await.unwrap(), changed);
    }

    #[tokio::test(start_paused = true)]
    async fn equal_selects_share_one_delegate_query() {
        let (delegate, store) = lazy(6);
        let store = store.with_cache_on_select(true);
        let options = SelectOptions::new().with_query(eq("status", "Open"));

        let first = store.select_vec(&options).await.unwrap();
        let second = store.select_vec(&options).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert_eq!(Calls::get(&delegate.calls.selects), 1);

        tokio::time::advance(DEFAULT_STALE_TIMEOUT + Duration::from_millis(1)).await;
        store.select_vec(&options).await.unwrap();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(Calls::get(&delegate.calls.selects), 2);
    }

    #[tokio::test]
    async fn select_without_caching_passes_through() {
        let (delegate, store) = lazy(4);
        let all = store.select_all().await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(store.cache().is_empty());
        assert_eq!(Calls::get(&delegate.calls.selects), 1);
    }

    #[tokio::test]
    async fn delegate_failure_surfaces_on_cold_select() {
        let (delegate, store) = lazy(2);
        let store = store.with_cache_on_select(true);
        delegate.set_offline(true);
        let err = store.select_all().await.unwrap_err();
        assert_eq!(err.op(), Some(Operation::Select));
    }

    #[tokio::test]
    async fn writes_go_through_to_cache() {
        let (delegate, store) = lazy(0);
        store.put(issue(9)).await.unwrap();
        assert!(delegate.inner.contains(&Key::from(9)));
        assert!(store.cache().contains(&Key::from(9)));

        store.remove(&Key::from(9)).await.unwrap();
        assert!(!store.cache().contains(&Key::from(9)));
    }
}
