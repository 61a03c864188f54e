//! OffloadStore - keeps one heavy field of each record in a side store.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::{Operation, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{stream_into, Collector, Delivery, FlowControl, Sink, SinkEvent};
use crate::store::{ListenerId, Store};

/// Records with a field worth storing apart from the rest.
pub trait Offload: Record {
    type Field: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Moves the field out, leaving an empty value behind. `None` when
    /// there is nothing to offload.
    fn take_field(&mut self) -> Option<Self::Field>;

    fn restore_field(&mut self, field: Self::Field);
}

/// Side-store row: the offloaded field of the record with key `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffloadedField<F> {
    pub id: Key,
    pub blob: F,
}

impl<F> Record for OffloadedField<F>
where
    F: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    const COLLECTION: &'static str = "offloaded_fields";

    fn key(&self) -> Key {
        self.id.clone()
    }
}

type Side<R> = OffloadedField<<R as Offload>::Field>;

async fn reinflate<R: Offload, O: Store<Side<R>>>(side: &O, mut record: R) -> R {
    if let Ok(field) = side.find(&record.key()).await {
        record.restore_field(field.blob);
    }
    record
}

/// Restores the offloaded field on every streamed record.
struct ReinflatingSink<'a, R: Offload, O> {
    inner: &'a mut dyn Sink<R>,
    side: &'a O,
}

#[async_trait]
impl<'a, R: Offload, O: Store<Side<R>>> Sink<R> for ReinflatingSink<'a, R, O> {
    async fn handle(&mut self, event: SinkEvent<R>, fc: &FlowControl) {
        let event = match event {
            SinkEvent::Put(record) => SinkEvent::Put(reinflate(self.side, record).await),
            other => other,
        };
        self.inner.handle(event, fc).await
    }
}

/// A `Store` decorator writing `R`'s offloaded field to `side` and the
/// rest of the record to the delegate.
///
/// `find` always reinflates; `select` only with `load_on_select`.
pub struct OffloadStore<R, S, O> {
    delegate: S,
    side: O,
    load_on_select: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R, S, O> OffloadStore<R, S, O>
where
    R: Offload,
    S: Store<R>,
    O: Store<Side<R>>,
{
    pub fn new(delegate: S, side: O) -> Self {
        OffloadStore {
            delegate,
            side,
            load_on_select: false,
            _record: PhantomData,
        }
    }

    pub fn with_load_on_select(mut self, load: bool) -> Self {
        self.load_on_select = load;
        self
    }

    pub fn side(&self) -> &O {
        &self.side
    }

    async fn drop_side(&self, key: &Key) {
        // Records that never had the field have no side row.
        let _ = self.side.remove(key).await;
    }
}

#[async_trait]
impl<R, S, O> Store<R> for OffloadStore<R, S, O>
where
    R: Offload,
    S: Store<R>,
    O: Store<Side<R>>,
{
    async fn put(&self, mut record: R) -> StoreResult<R> {
        let field = record.take_field();
        if let Some(blob) = &field {
            self.side
                .put(OffloadedField {
                    id: record.key(),
                    blob: blob.clone(),
                })
                .await
                .map_err(|err| err.with_op(Operation::Put))?;
        }
        let mut stored = self.delegate.put(record).await?;
        if let Some(blob) = field {
            stored.restore_field(blob);
        }
        Ok(stored)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let removed = self.delegate.remove(key).await?;
        self.drop_side(key).await;
        Ok(removed)
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        let record = self.delegate.find(key).await?;
        Ok(reinflate(&self.side, record).await)
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        if !self.load_on_select {
            return self.delegate.select(sink, options).await;
        }
        let mut reinflating = ReinflatingSink {
            inner: sink,
            side: &self.side,
        };
        self.delegate.select(&mut reinflating, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut removed = Collector::new();
        if let Err(err) = self.delegate.remove_all(&mut removed, options).await {
            return Delivery::new(sink, Operation::RemoveAll).fail(err).await;
        }
        for record in &removed.removed {
            self.drop_side(&record.key()).await;
        }
        stream_into(sink, removed.removed, Operation::RemoveAll).await
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
    use crate::persist::Blob;
    use crate::store::{InMemoryStore, StoreExt};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize, crate::Record)]
    #[record(collection = "attachments")]
    struct Attachment {
        id: i64,
        name: String,
        content: Blob,
    }

    impl Offload for Attachment {
        type Field = Blob;

        fn take_field(&mut self) -> Option<Blob> {
            let content = std::mem::take(&mut self.content);
            (!content.is_empty()).then_some(content)
        }

        fn restore_field(&mut self, field: Blob) {
            self.content = field;
        }
    }

    fn attachment(id: i64) -> Attachment {
        Attachment {
            id,
            name: format!("file{}.txt", id),
            content: Blob::new("text/plain", format!("body {}", id).into_bytes()),
        }
    }

    #[tokio::test]
    async fn field_lives_in_side_store() {
        let primary: InMemoryStore<Attachment> = InMemoryStore::new();
        let side: InMemoryStore<OffloadedField<Blob>> = InMemoryStore::new();
        let store = OffloadStore::new(primary.clone(), side.clone());

        assert_eq!(store.put(attachment(1)).await.unwrap(), attachment(1));
        let raw = primary.find(&Key::from(1)).await.unwrap();
        assert!(raw.content.is_empty());
        assert_eq!(side.len(), 1);

        assert_eq!(store.find(&Key::from(1)).await.unwrap(), attachment(1));
        let listed = store.select_all().await.unwrap();
        assert!(listed[0].content.is_empty());

        store.remove(&Key::from(1)).await.unwrap();
        assert!(side.is_empty());
    }

    #[tokio::test]
    async fn load_on_select_reinflates() {
        let side: InMemoryStore<OffloadedField<Blob>> = InMemoryStore::new();
        let store = OffloadStore::new(InMemoryStore::<Attachment>::new(), side)
            .with_load_on_select(true);
        store.put(attachment(1)).await.unwrap();
        store.put(attachment(2)).await.unwrap();
        assert_eq!(
            store.select_all().await.unwrap(),
            vec![attachment(1), attachment(2)]
        );
    }
}
