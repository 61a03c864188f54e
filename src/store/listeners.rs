use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Mutex as AsyncMutex;

use crate::query::SelectOptions;
use crate::record::Record;
use crate::sink::{FlowControl, Sink, SinkEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    /// An id no registry hands out, for stores that never notify.
    pub fn detached() -> Self {
        ListenerId(0)
    }
}

type SharedSink<R> = Arc<AsyncMutex<Box<dyn Sink<R>>>>;

struct Entry<R> {
    id: ListenerId,
    options: SelectOptions,
    sink: SharedSink<R>,
}

/// Registry of listeners for one store.
///
/// Listeners whose flow control is stopped during a notification are
/// dropped from the registry.
pub struct Listeners<R> {
    next_id: AtomicU64,
    entries: Mutex<Vec<Entry<R>>>,
}

impl<R> Default for Listeners<R> {
    fn default() -> Self {
        Listeners {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<R: Record> Listeners<R> {
    pub fn new() -> Self {
        Self::default()
    }

    // Registry state stays consistent even if a holder panicked.
    fn entries(&self) -> MutexGuard<'_, Vec<Entry<R>>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries().push(Entry {
            id,
            options,
            sink: Arc::new(AsyncMutex::new(sink)),
        });
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn notify_put(&self, record: &R) {
        self.notify(record, false).await
    }

    pub async fn notify_remove(&self, record: &R) {
        self.notify(record, true).await
    }

    async fn notify(&self, record: &R, removed: bool) {
        let targets: Vec<(ListenerId, SharedSink<R>)> = {
            let entries = self.entries();
            if entries.is_empty() {
                return;
            }
            let value = record.to_value().ok();
            entries
                .iter()
                .filter(|entry| match (&entry.options.query, &value) {
                    (None, _) => true,
                    (Some(query), Some(value)) => query.matches(value),
                    (Some(_), None) => false,
                })
                .map(|entry| (entry.id, entry.sink.clone()))
                .collect()
        };

        for (id, sink) in targets {
            let fc = FlowControl::new();
            let event = if removed {
                SinkEvent::Remove(record.clone())
            } else {
                SinkEvent::Put(record.clone())
            };
            sink.lock().await.handle(event, &fc).await;
            if fc.is_stopped() {
                self.remove(id);
            }
        }
    }
}
