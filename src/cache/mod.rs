//! Caching decorators.

mod lazy;
mod lru;
mod sliding_window;

pub use lazy::{LazyCacheStore, DEFAULT_STALE_TIMEOUT};
pub use lru::{LruCacheStore, LruEntry, DEFAULT_MAX_SIZE};
pub use sliding_window::{SlidingWindowStore, DEFAULT_QUERY_TTL, DEFAULT_WINDOW_SIZE};
