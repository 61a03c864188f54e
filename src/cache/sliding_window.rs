//! SlidingWindowStore - caches a window of rows around each paged select.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::{orders_to_sql, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, Sink};
use crate::store::{ListenerId, Store};

pub const DEFAULT_WINDOW_SIZE: usize = 20;
pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(10);

type Rows<R> = Shared<BoxFuture<'static, StoreResult<Arc<Vec<R>>>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    query: String,
    order: String,
}

impl WindowKey {
    fn of(options: &SelectOptions) -> Self {
        WindowKey {
            query: options.query().clone().normalize().to_sql(),
            order: orders_to_sql(&options.order),
        }
    }
}

struct Window<R> {
    start: usize,
    /// Exclusive; `None` when the window runs to the end of the data.
    end: Option<usize>,
    fetched_at: Instant,
    rows: Rows<R>,
}

impl<R> Window<R> {
    fn covers(&self, skip: usize, limit: Option<usize>) -> bool {
        if self.start > skip {
            return false;
        }
        match (self.end, limit) {
            (None, _) => true,
            (Some(end), Some(limit)) => end >= skip.saturating_add(limit),
            (Some(_), None) => false,
        }
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

type Windows<R> = Arc<Mutex<HashMap<WindowKey, Window<R>>>>;

/// A `Store` decorator that answers paged selects from a cached window of
/// `window_size` extra rows around the requested page.
///
/// Windows are keyed by the canonical query and order, expire after
/// `query_ttl`, and are swept by a background purge task. Writes through
/// this store drop all windows.
pub struct SlidingWindowStore<R: Record, S: Store<R>> {
    delegate: Arc<S>,
    windows: Windows<R>,
    window_size: usize,
    query_ttl: Duration,
    purge: Mutex<Option<JoinHandle<()>>>,
}

impl<R: Record, S: Store<R> + 'static> SlidingWindowStore<R, S> {
    pub fn new(delegate: S) -> Self {
        SlidingWindowStore {
            delegate: Arc::new(delegate),
            windows: Arc::new(Mutex::new(HashMap::new())),
            window_size: DEFAULT_WINDOW_SIZE,
            query_ttl: DEFAULT_QUERY_TTL,
            purge: Mutex::new(None),
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_query_ttl(mut self, ttl: Duration) -> Self {
        self.query_ttl = ttl;
        self
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    pub fn window_count(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }

    fn invalidate(&self) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.clear();
        }
    }

    fn ensure_purge_task(&self) {
        let Ok(mut purge) = self.purge.lock() else {
            return;
        };
        if purge.is_some() {
            return;
        }
        let windows: Weak<Mutex<HashMap<WindowKey, Window<R>>>> = Arc::downgrade(&self.windows);
        let ttl = self.query_ttl;
        *purge = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(ttl).await;
                let Some(windows) = windows.upgrade() else {
                    break;
                };
                let Ok(mut windows) = windows.lock() else {
                    break;
                };
                let before = windows.len();
                windows.retain(|_, window| !window.expired(ttl));
                trace!(
                    collection = R::COLLECTION,
                    purged = before - windows.len(),
                    "sliding window purge"
                );
            }
        }));
    }

    /// The cached rows covering `skip..skip+limit`, fetching a new window if needed.
    fn window_for(&self, options: &SelectOptions) -> StoreResult<(usize, Rows<R>)> {
        let key = WindowKey::of(options);
        let mut windows = self
            .windows
            .lock()
            .map_err(|_| StoreError::LockPoisoned("select"))?;

        if let Some(window) = windows.get(&key) {
            if !window.expired(self.query_ttl) && window.covers(options.skip, options.limit) {
                debug!(collection = R::COLLECTION, query = %key.query, "window hit");
                return Ok((window.start, window.rows.clone()));
            }
        }

        let half = self.window_size / 2;
        let start = options.skip.saturating_sub(half);
        let end = options
            .limit
            .map(|limit| options.skip.saturating_add(limit).saturating_add(half));
        debug!(
            collection = R::COLLECTION,
            query = %key.query,
            start,
            end = ?end,
            "fetching window"
        );

        let mut fetch = options.unpaged().with_skip(start);
        if let Some(end) = end {
            fetch = fetch.with_limit(end - start);
        }
        let delegate = self.delegate.clone();
        let handle = tokio::spawn(async move {
            let mut rows: Vec<R> = Vec::new();
            delegate.select(&mut rows, &fetch).await?;
            Ok::<_, StoreError>(Arc::new(rows))
        });
        let rows: Rows<R> = async move {
            handle
                .await
                .unwrap_or_else(|err| Err(StoreError::transport(Operation::Select, err.to_string())))
        }
        .boxed()
        .shared();

        windows.insert(
            key,
            Window {
                start,
                end,
                fetched_at: Instant::now(),
                rows: rows.clone(),
            },
        );
        Ok((start, rows))
    }

    fn forget(&self, options: &SelectOptions) {
        if let Ok(mut windows) = self.windows.lock() {
            windows.remove(&WindowKey::of(options));
        }
    }
}

impl<R: Record, S: Store<R>> Drop for SlidingWindowStore<R, S> {
    fn drop(&mut self) {
        if let Ok(mut purge) = self.purge.lock() {
            if let Some(handle) = purge.take() {
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl<R: Record, S: Store<R> + 'static> Store<R> for SlidingWindowStore<R, S> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let stored = self.delegate.put(record).await;
        self.invalidate();
        stored
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let removed = self.delegate.remove(key).await;
        self.invalidate();
        removed
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.delegate.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.ensure_purge_task();
        let (start, rows) = match self.window_for(options) {
            Ok(window) => window,
            Err(err) => return fail(sink, err).await,
        };
        let rows = match rows.await {
            Ok(rows) => rows,
            Err(err) => {
                self.forget(options);
                return fail(sink, err.with_op(Operation::Select)).await;
            }
        };
        let offset = options.skip - start;
        let page: Vec<R> = match options.limit {
            Some(limit) => rows.iter().skip(offset).take(limit).cloned().collect(),
            None => rows.iter().skip(offset).cloned().collect(),
        };
        stream_into(sink, page, Operation::Select).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let result = self.delegate.remove_all(sink, options).await;
        self.invalidate();
        result
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.delegate.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.delegate.unlisten(id)
    }
}
