//! Bridges store notifications onto an `event_emitter_rs::EventEmitter`.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use event_emitter_rs::EventEmitter;
use tracing::warn;

use crate::record::Record;
use crate::sink::{FlowControl, Sink, SinkEvent};

/// Event name for `kind` events of `R`, e.g. `"issues:put"`.
pub fn event_name<R: Record>(kind: &str) -> String {
    format!("{}:{}", R::COLLECTION, kind)
}

/// A sink emitting each `put`/`remove` as a JSON string under
/// `"<collection>:put"` / `"<collection>:remove"`.
///
/// Register it with `Store::listen`. Callbacks run on the emitter's own
/// threads.
pub struct EmitterSink<R> {
    emitter: Arc<Mutex<EventEmitter>>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> EmitterSink<R> {
    pub fn new(emitter: Arc<Mutex<EventEmitter>>) -> Self {
        EmitterSink {
            emitter,
            _record: PhantomData,
        }
    }

    fn emit(&self, kind: &str, record: &R) {
        let payload = match serde_json::to_string(record) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(collection = R::COLLECTION, error = %err, "unserializable record");
                return;
            }
        };
        match self.emitter.lock() {
            Ok(mut emitter) => {
                emitter.emit(&event_name::<R>(kind), payload);
            }
            Err(_) => warn!(collection = R::COLLECTION, "emitter lock poisoned"),
        }
    }
}

#[async_trait]
impl<R: Record> Sink<R> for EmitterSink<R> {
    async fn handle(&mut self, event: SinkEvent<R>, _fc: &FlowControl) {
        match event {
            SinkEvent::Put(record) => self.emit("put", &record),
            SinkEvent::Remove(record) => self.emit("remove", &record),
            SinkEvent::Error(_) | SinkEvent::Eof => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::SelectOptions;
    use crate::record::Key;
    use crate::store::{InMemoryStore, Store};
    use crate::testing::{issue, Issue};
    use std::sync::mpsc;
    use std::time::Duration;

    #[tokio::test]
    async fn store_changes_are_emitted_as_json() {
        let emitter = Arc::new(Mutex::new(EventEmitter::new()));
        let (tx, rx) = mpsc::channel::<(String, String)>();
        {
            let mut emitter = emitter.lock().unwrap();
            for kind in ["put", "remove"] {
                let tx = tx.clone();
                emitter.on(&event_name::<Issue>(kind), move |json: String| {
                    let _ = tx.send((kind.to_string(), json));
                });
            }
        }

        let store: InMemoryStore<Issue> = InMemoryStore::new();
        store.listen(
            Box::new(EmitterSink::<Issue>::new(emitter.clone())),
            SelectOptions::default(),
        );
        store.put(issue(1)).await.unwrap();
        store.remove(&Key::from(1)).await.unwrap();

        let mut seen = vec![
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
        ];
        seen.sort();
        let expected = serde_json::to_string(&issue(1)).unwrap();
        assert_eq!(
            seen,
            vec![("put".to_string(), expected.clone()), ("remove".to_string(), expected)]
        );
    }
}
