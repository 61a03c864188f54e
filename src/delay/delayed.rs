use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{FlowControl, Sink, SinkEvent};
use crate::store::{ListenerId, Store};

/// Holds back each row by `row_delay` before handing it on.
struct PacedSink<'a, R> {
    inner: &'a mut dyn Sink<R>,
    row_delay: Duration,
}

#[async_trait]
impl<'a, R: Send + 'static> Sink<R> for PacedSink<'a, R> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        if matches!(event, SinkEvent::Put(_) | SinkEvent::Remove(_)) && !self.row_delay.is_zero() {
            tokio::time::sleep(self.row_delay).await;
        }
        self.inner.handle(event, fc).await
    }
}

/// A `Store` decorator that pretends `select` is slow: it starts after
/// `initial_delay` and paces every row by `row_delay`.
pub struct DelayedStore<R, S> {
    delegate: S,
    initial_delay: Duration,
    row_delay: Duration,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record, S: Store<R>> DelayedStore<R, S> {
    pub fn new(delegate: S) -> Self {
        DelayedStore {
            delegate,
            initial_delay: Duration::ZERO,
            row_delay: Duration::ZERO,
            _record: PhantomData,
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }
}

#[async_trait]
impl<R: Record, S: Store<R>> Store<R> for DelayedStore<R, S> {
    async fn put(&self, record: R) -> StoreResult<R> {
        self.delegate.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        self.delegate.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.delegate.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        tokio::time::sleep(self.initial_delay).await;
        let mut paced = PacedSink {
            inner: sink,
            row_delay: self.row_delay,
        };
        self.delegate.select(&mut paced, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.delegate.remove_all(sink, options).await
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
    use crate::sink::Collector;
    use crate::testing::{seeded, Issue};
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn select_waits_initial_delay_plus_row_delays() {
        let store = DelayedStore::new(seeded(3))
            .with_initial_delay(Duration::from_millis(100))
            .with_row_delay(Duration::from_millis(10));

        let started = Instant::now();
        let mut sink = Collector::<Issue>::new();
        store.select(&mut sink, &SelectOptions::default()).await.unwrap();

        assert_eq!(sink.records.len(), 3);
        assert!(sink.eof);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(130) && elapsed < Duration::from_millis(140));
    }

    #[tokio::test(start_paused = true)]
    async fn early_stop_skips_remaining_delays() {
        let store = DelayedStore::new(seeded(10)).with_row_delay(Duration::from_millis(10));

        let started = Instant::now();
        let mut sink = Collector::<Issue>::new().stop_after(2);
        let result = store.select(&mut sink, &SelectOptions::default()).await;

        assert!(result.is_err());
        assert_eq!(sink.records.len(), 2);
        assert!(started.elapsed() < Duration::from_millis(30));
    }
}
