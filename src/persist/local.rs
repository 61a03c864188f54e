//! LocalStore - a whole collection persisted as one snapshot.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::Sink;
use crate::store::{InMemoryStore, ListenerId, Store};

/// Writes landing within this window are merged into one flush.
pub const FLUSH_WINDOW: Duration = Duration::from_millis(100);

/// Named byte blobs, the way browser local storage keeps strings.
#[async_trait]
pub trait KeyValueMedium: Send + Sync + 'static {
    async fn load(&self, name: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn save(&self, name: &str, bytes: Vec<u8>) -> StoreResult<()>;
}

/// One file per name inside a directory.
#[derive(Debug, Clone)]
pub struct DirectoryMedium {
    dir: PathBuf,
}

impl DirectoryMedium {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectoryMedium { dir: dir.into() }
    }
}

#[async_trait]
impl KeyValueMedium for DirectoryMedium {
    async fn load(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        match fs::read(self.dir.join(name)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::transport(Operation::Select, err.to_string())),
        }
    }

    async fn save(&self, name: &str, bytes: Vec<u8>) -> StoreResult<()> {
        let io = |err: std::io::Error| StoreError::transport(Operation::Put, err.to_string());
        fs::create_dir_all(&self.dir).await.map_err(io)?;
        let tmp = self.dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, bytes).await.map_err(io)?;
        fs::rename(&tmp, self.dir.join(name)).await.map_err(io)
    }
}

/// Process-local medium; clones share contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryMedium {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryMedium {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueMedium for MemoryMedium {
    async fn load(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory medium"))?;
        Ok(entries.get(name).cloned())
    }

    async fn save(&self, name: &str, bytes: Vec<u8>) -> StoreResult<()> {
        self.entries
            .lock()
            .map_err(|_| StoreError::LockPoisoned("memory medium"))?
            .insert(name.to_string(), bytes);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCodec {
    #[default]
    Json,
    Bitcode,
}

impl SnapshotCodec {
    fn encode<R: Record>(self, records: &[R]) -> StoreResult<Vec<u8>> {
        match self {
            SnapshotCodec::Json => Ok(serde_json::to_vec(records)?),
            SnapshotCodec::Bitcode => Ok(bitcode::serialize(records)?),
        }
    }

    fn decode<R: Record>(self, bytes: &[u8]) -> StoreResult<Vec<R>> {
        match self {
            SnapshotCodec::Json => Ok(serde_json::from_slice(bytes)?),
            SnapshotCodec::Bitcode => Ok(bitcode::deserialize(bytes)?),
        }
    }
}

struct Shared<R, M> {
    name: String,
    records: InMemoryStore<R>,
    medium: M,
    codec: SnapshotCodec,
    scheduled: AtomicBool,
}

impl<R: Record, M: KeyValueMedium> Shared<R, M> {
    async fn flush(&self) -> StoreResult<()> {
        self.scheduled.store(false, Ordering::SeqCst);
        let records = self.records.snapshot()?;
        let bytes = self.codec.encode(&records)?;
        self.medium.save(&self.name, bytes).await?;
        debug!(collection = R::COLLECTION, name = %self.name, records = records.len(), "flushed snapshot");
        Ok(())
    }
}

/// An in-memory store whose contents are written out as a single
/// snapshot after every change, with changes inside `FLUSH_WINDOW`
/// merged into one write.
pub struct LocalStore<R, M> {
    shared: Arc<Shared<R, M>>,
}

impl<R: Record, M: KeyValueMedium> LocalStore<R, M> {
    /// Loads the snapshot stored under `R::COLLECTION`, if any.
    pub async fn open(medium: M) -> StoreResult<Self> {
        Self::open_named(medium, R::COLLECTION, SnapshotCodec::default()).await
    }

    pub async fn open_named(medium: M, name: &str, codec: SnapshotCodec) -> StoreResult<Self> {
        let records = InMemoryStore::new();
        if let Some(bytes) = medium.load(name).await? {
            records.replace_all(codec.decode::<R>(&bytes)?)?;
        }
        Ok(LocalStore {
            shared: Arc::new(Shared {
                name: name.to_string(),
                records,
                medium,
                codec,
                scheduled: AtomicBool::new(false),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Writes the snapshot now.
    pub async fn flush(&self) -> StoreResult<()> {
        self.shared.flush().await
    }

    fn schedule_flush(&self) {
        if self.shared.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(FLUSH_WINDOW).await;
            // Skip if an explicit flush got there first.
            if !shared.scheduled.load(Ordering::SeqCst) {
                return;
            }
            if let Err(err) = shared.flush().await {
                warn!(collection = R::COLLECTION, name = %shared.name, error = %err, "snapshot flush failed");
            }
        });
    }
}

#[async_trait]
impl<R: Record, M: KeyValueMedium> Store<R> for LocalStore<R, M> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let stored = self.shared.records.put(record).await?;
        self.schedule_flush();
        Ok(stored)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let removed = self.shared.records.remove(key).await?;
        self.schedule_flush();
        Ok(removed)
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.shared.records.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.shared.records.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let result = self.shared.records.remove_all(sink, options).await;
        self.schedule_flush();
        result
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.shared.records.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.shared.records.unlisten(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreExt;
    use crate::testing::{issue, Issue};

    /// Counts saves on top of a `MemoryMedium`.
    #[derive(Clone, Default)]
    struct CountingMedium {
        inner: MemoryMedium,
        saves: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl KeyValueMedium for CountingMedium {
        async fn load(&self, name: &str) -> StoreResult<Option<Vec<u8>>> {
            self.inner.load(name).await
        }

        async fn save(&self, name: &str, bytes: Vec<u8>) -> StoreResult<()> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.inner.save(name, bytes).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_writes_is_flushed_once() {
        let medium = CountingMedium::default();
        let store = LocalStore::<Issue, _>::open(medium.clone()).await.unwrap();
        for id in 1..=5 {
            store.put(issue(id)).await.unwrap();
        }
        assert_eq!(medium.saves.load(Ordering::SeqCst), 0);

        tokio::time::sleep(FLUSH_WINDOW + Duration::from_millis(10)).await;
        assert_eq!(medium.saves.load(Ordering::SeqCst), 1);

        let reopened = LocalStore::<Issue, _>::open(medium.inner.clone()).await.unwrap();
        assert_eq!(reopened.select_all().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn bitcode_snapshot_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::<Issue, _>::open_named(
            DirectoryMedium::new(dir.path()),
            "important",
            SnapshotCodec::Bitcode,
        )
        .await
        .unwrap();
        store.put(issue(1)).await.unwrap();
        store.put(issue(2)).await.unwrap();
        store.remove(&Key::from(1)).await.unwrap();
        store.flush().await.unwrap();

        let reopened = LocalStore::<Issue, _>::open_named(
            DirectoryMedium::new(dir.path()),
            "important",
            SnapshotCodec::Bitcode,
        )
        .await
        .unwrap();
        assert_eq!(reopened.select_all().await.unwrap(), vec![issue(2)]);
    }
}
