//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

use async_trait::async_trait;
use dao_chain::sink::fail;
use dao_chain::{
    InMemoryStore, Key, ListenerId, Operation, Record, SelectOptions, Sink, Store, StoreError,
    StoreResult,
};
use serde::{Deserialize, Serialize};

static TRACING: Once = Once::new();

/// Route `tracing` output to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Record)]
#[record(collection = "tasks")]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub project: String,
    pub priority: i64,
    pub done: bool,
}

pub fn task(id: i64) -> Task {
    Task {
        id,
        title: format!("task {}", id),
        project: if id % 2 == 0 { "alpha".into() } else { "beta".into() },
        priority: id % 5,
        done: id % 3 == 0,
    }
}

pub fn tasks(n: i64) -> Vec<Task> {
    (1..=n).map(task).collect()
}

pub fn seeded(n: i64) -> InMemoryStore<Task> {
    InMemoryStore::from_records(tasks(n))
}

/// A remote collection that can drop off the network.
#[derive(Clone, Default)]
pub struct Remote {
    pub records: InMemoryStore<Task>,
    offline: Arc<AtomicBool>,
}

impl Remote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn reachable(&self, op: Operation) -> StoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::transport(op, "connection refused"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Store<Task> for Remote {
    async fn put(&self, record: Task) -> StoreResult<Task> {
        self.reachable(Operation::Put)?;
        self.records.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<Task> {
        self.reachable(Operation::Remove)?;
        self.records.remove(key).await
    }

    async fn find(&self, key: &Key) -> StoreResult<Task> {
        self.reachable(Operation::Find)?;
        self.records.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<Task>, options: &SelectOptions) -> StoreResult<()> {
        if let Err(err) = self.reachable(Operation::Select) {
            return fail(sink, err).await;
        }
        self.records.select(sink, options).await
    }

    async fn remove_all(
        &self,
        sink: &mut dyn Sink<Task>,
        options: &SelectOptions,
    ) -> StoreResult<()> {
        if let Err(err) = self.reachable(Operation::RemoveAll) {
            return fail(sink, err).await;
        }
        self.records.remove_all(sink, options).await
    }

    fn listen(&self, sink: Box<dyn Sink<Task>>, options: SelectOptions) -> ListenerId {
        self.records.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.records.unlisten(id)
    }
}
