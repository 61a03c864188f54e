//! InMemoryStore - ordered-map store with full query support.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use tracing::trace;

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, Sink};

use super::{ListenerId, Listeners, Store};

/// In-memory store backed by a `BTreeMap` in key order.
///
/// Clone-friendly via Arc: clones share records and listeners.
pub struct InMemoryStore<R> {
    records: Arc<RwLock<BTreeMap<Key, R>>>,
    listeners: Arc<Listeners<R>>,
}

impl<R> Clone for InMemoryStore<R> {
    fn clone(&self) -> Self {
        InMemoryStore {
            records: self.records.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl<R: Record> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> InMemoryStore<R> {
    pub fn new() -> Self {
        InMemoryStore {
            records: Arc::new(RwLock::new(BTreeMap::new())),
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// Seed a store without notifying anyone.
    pub fn from_records(records: impl IntoIterator<Item = R>) -> Self {
        let map = records.into_iter().map(|r| (r.key(), r)).collect();
        InMemoryStore {
            records: Arc::new(RwLock::new(map)),
            listeners: Arc::new(Listeners::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.records
            .read()
            .map(|r| r.contains_key(key))
            .unwrap_or(false)
    }

    /// All records in key order.
    pub fn snapshot(&self) -> StoreResult<Vec<R>> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned("snapshot"))?;
        Ok(records.values().cloned().collect())
    }

    /// Replace the whole contents without notifying listeners.
    pub fn replace_all(&self, records: impl IntoIterator<Item = R>) -> StoreResult<()> {
        let mut map = self
            .records
            .write()
            .map_err(|_| StoreError::LockPoisoned("replace_all"))?;
        *map = records.into_iter().map(|r| (r.key(), r)).collect();
        Ok(())
    }

    fn matching(&self, options: &SelectOptions, op: &'static str) -> StoreResult<Vec<R>> {
        let rows: Vec<R> = {
            let records = self
                .records
                .read()
                .map_err(|_| StoreError::LockPoisoned(op))?;
            records.values().cloned().collect()
        };
        options.apply(rows)
    }
}

#[async_trait]
impl<R: Record> Store<R> for InMemoryStore<R> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let key = record.key();
        {
            let mut records = self
                .records
                .write()
                .map_err(|_| StoreError::LockPoisoned("put"))?;
            records.insert(key.clone(), record.clone());
        }
        trace!(collection = R::COLLECTION, key = %key, "put");
        self.listeners.notify_put(&record).await;
        Ok(record)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let removed = {
            let mut records = self
                .records
                .write()
                .map_err(|_| StoreError::LockPoisoned("remove"))?;
            records.remove(key)
        };
        match removed {
            Some(record) => {
                self.listeners.notify_remove(&record).await;
                Ok(record)
            }
            None => Err(StoreError::not_found(Operation::Remove, key)),
        }
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        let records = self
            .records
            .read()
            .map_err(|_| StoreError::LockPoisoned("find"))?;
        records
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::not_found(Operation::Find, key))
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        match self.matching(options, "select") {
            Ok(rows) => stream_into(sink, rows, Operation::Select).await,
            Err(err) => fail(sink, err.with_op(Operation::Select)).await,
        }
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let doomed = match self.matching(options, "remove_all") {
            Ok(rows) => rows,
            Err(err) => return fail(sink, err.with_op(Operation::RemoveAll)).await,
        };
        let removed: Option<Vec<R>> = self.records.write().ok().map(|mut records| {
            doomed
                .into_iter()
                .filter_map(|r| records.remove(&r.key()))
                .collect()
        });
        let Some(removed) = removed else {
            return fail(sink, StoreError::LockPoisoned("remove_all")).await;
        };
        for record in &removed {
            self.listeners.notify_remove(record).await;
        }
        stream_into(sink, removed, Operation::RemoveAll).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.listeners.add(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
