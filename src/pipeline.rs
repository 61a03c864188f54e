//! StoreBuilder - the composition root.
//!
//! Decorators are stacked from the inside out: each call wraps
//! everything built so far.
//!
//! ```ignore
//! let issues = StoreBuilder::new(SqliteStore::<Issue>::open(&db).await?)
//!     .sliding_window(&SlidingWindowConfig::default())
//!     .lru(&LruConfig { max_size: 500 })
//!     .build();
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::cache::{LazyCacheStore, LruCacheStore, SlidingWindowStore};
use crate::config::{
    DelayConfig, ForwardConfig, LazyCacheConfig, LruConfig, PipelineConfig, RestConfig,
    SlidingWindowConfig,
};
use crate::delay::DelayedStore;
use crate::error::StoreResult;
use crate::forward::{ForwardOperation, StoreAndForwardStore};
use crate::record::Record;
use crate::rest::{RestStore, RestTransport};
use crate::store::{InMemoryStore, SharedStore, Store};

pub struct StoreBuilder<R: Record> {
    store: SharedStore<R>,
    layers: Vec<&'static str>,
}

impl<R: Record> StoreBuilder<R> {
    pub fn new(base: impl Store<R> + 'static) -> Self {
        StoreBuilder {
            store: Arc::new(base),
            layers: Vec::new(),
        }
    }

    /// Starts from a `RestStore` configured by `config`.
    pub fn rest<T: RestTransport + 'static>(transport: T, config: &RestConfig) -> Self {
        Self::new(
            RestStore::new(transport, config.url.clone())
                .with_batch_size(config.batch_size)
                .with_skip_threshold(config.skip_threshold),
        )
        .named("rest")
    }

    fn named(mut self, layer: &'static str) -> Self {
        self.layers.push(layer);
        self
    }

    /// Wraps the pipeline in an arbitrary decorator.
    pub fn decorate<S, F>(mut self, layer: &'static str, wrap: F) -> Self
    where
        S: Store<R> + 'static,
        F: FnOnce(SharedStore<R>) -> S,
    {
        self.store = Arc::new(wrap(self.store));
        self.named(layer)
    }

    pub fn delayed(self, config: &DelayConfig) -> Self {
        self.decorate("delay", |inner| {
            DelayedStore::new(inner)
                .with_initial_delay(config.initial_delay())
                .with_row_delay(config.row_delay())
        })
    }

    pub fn sliding_window(self, config: &SlidingWindowConfig) -> Self {
        self.decorate("sliding_window", |inner| {
            SlidingWindowStore::new(inner)
                .with_window_size(config.window_size)
                .with_query_ttl(config.query_ttl())
        })
    }

    /// Lazy caching into `cache`.
    pub fn lazy_cache(self, cache: impl Store<R> + 'static, config: &LazyCacheConfig) -> Self {
        self.decorate("lazy_cache", |inner| {
            LazyCacheStore::new(inner, cache)
                .with_refresh_on_cache_hit(config.refresh_on_cache_hit)
                .with_cache_on_select(config.cache_on_select)
                .with_stale_timeout(config.stale_timeout())
        })
    }

    pub fn lru(self, config: &LruConfig) -> Self {
        self.decorate("lru", |inner| {
            LruCacheStore::new(inner).with_max_size(config.max_size)
        })
    }

    /// Queues writes in `log` and forwards them to the pipeline so far,
    /// resuming any operations `log` still holds from an earlier run.
    pub async fn store_and_forward(
        self,
        log: impl Store<ForwardOperation<R>> + 'static,
        config: &ForwardConfig,
    ) -> StoreResult<Self> {
        let forward = StoreAndForwardStore::new(self.store.clone(), log)
            .with_retry_interval(config.retry_interval());
        let pending = forward.resume().await?;
        debug!(collection = R::COLLECTION, pending, "store-and-forward ready");
        Ok(StoreBuilder {
            store: Arc::new(forward),
            layers: self.layers,
        }
        .named("forward"))
    }

    /// Adds the decorators `config` enables, innermost first: delay,
    /// sliding window, lazy cache (into memory), LRU. The REST base and
    /// store-and-forward need resources and are set up separately.
    pub fn apply(mut self, config: &PipelineConfig) -> Self {
        if let Some(delay) = &config.delay {
            self = self.delayed(delay);
        }
        if let Some(window) = &config.sliding_window {
            self = self.sliding_window(window);
        }
        if let Some(lazy) = &config.lazy_cache {
            self = self.lazy_cache(InMemoryStore::new(), lazy);
        }
        if let Some(lru) = &config.lru {
            self = self.lru(lru);
        }
        self
    }

    /// Decorator names, innermost first.
    pub fn layers(&self) -> &[&'static str] {
        &self.layers
    }

    pub fn build(self) -> SharedStore<R> {
        debug!(collection = R::COLLECTION, layers = ?self.layers, "pipeline built");
        self.store
    }
}
