//! JsonFileStore - an in-memory store journaled to a JSON-lines file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::SelectOptions;
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, Sink};
use crate::store::{InMemoryStore, ListenerId, Store, StoreExt};

#[derive(Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Entry<R> {
    Put { obj: R },
    Remove { key: Key },
}

fn io_error(op: Operation, err: std::io::Error) -> StoreError {
    StoreError::transport(op, err.to_string())
}

/// Keeps all records in memory and appends every mutation to a
/// JSON-lines log, replayed on `open`.
pub struct JsonFileStore<R> {
    path: PathBuf,
    records: InMemoryStore<R>,
    log: Mutex<File>,
}

impl<R: Record> JsonFileStore<R> {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records = InMemoryStore::new();
        let mut torn = false;

        match fs::read_to_string(&path).await {
            Ok(text) => {
                let lines = text.lines().count();
                let mut replayed = 0;
                for (n, line) in text.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Entry<R>>(line) {
                        Ok(Entry::Put { obj }) => {
                            records.put(obj).await?;
                        }
                        Ok(Entry::Remove { key }) => {
                            let _ = records.remove(&key).await;
                        }
                        // A torn final write is dropped; anything else is corruption.
                        Err(err) if n + 1 == lines => {
                            warn!(path = %path.display(), error = %err, "dropping truncated log tail");
                            torn = true;
                            continue;
                        }
                        Err(err) => return Err(err.into()),
                    }
                    replayed += 1;
                }
                debug!(collection = R::COLLECTION, path = %path.display(), replayed, "replayed log");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_error(Operation::Select, err)),
        }

        let log = if torn {
            rewrite(&path, records.snapshot()?).await?
        } else {
            open_log(&path).await?
        };
        Ok(JsonFileStore {
            path,
            records,
            log: Mutex::new(log),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrites the log as one `put` per current record.
    pub async fn compact(&self) -> StoreResult<()> {
        let mut log = self.log.lock().await;
        let records = self.records.snapshot()?;
        let count = records.len();
        *log = rewrite(&self.path, records).await?;
        debug!(collection = R::COLLECTION, records = count, "compacted log");
        Ok(())
    }
}

fn encode<R: Serialize>(entries: &[Entry<R>]) -> StoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    for entry in entries {
        serde_json::to_writer(&mut buf, entry)?;
        buf.push(b'\n');
    }
    Ok(buf)
}

async fn append<R: Serialize>(log: &mut File, entries: &[Entry<R>], op: Operation) -> StoreResult<()> {
    let buf = encode(entries)?;
    log.write_all(&buf).await.map_err(|e| io_error(op, e))?;
    log.flush().await.map_err(|e| io_error(op, e))
}

/// Replaces the log at `path` with `records` and reopens it for appending.
async fn rewrite<R: Serialize>(path: &Path, records: Vec<R>) -> StoreResult<File> {
    let entries: Vec<Entry<R>> = records.into_iter().map(|obj| Entry::Put { obj }).collect();
    let buf = encode(&entries)?;
    let tmp = path.with_extension("compact");
    fs::write(&tmp, &buf)
        .await
        .map_err(|e| io_error(Operation::Put, e))?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(Operation::Put, e))?;
    open_log(path).await
}

async fn open_log(path: &Path) -> StoreResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| io_error(Operation::Put, e))
}

#[async_trait]
impl<R: Record> Store<R> for JsonFileStore<R> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let mut log = self.log.lock().await;
        append(&mut log, &[Entry::Put { obj: record.clone() }], Operation::Put).await?;
        self.records.put(record).await
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let mut log = self.log.lock().await;
        let existing = self
            .records
            .find(key)
            .await
            .map_err(|e| e.with_op(Operation::Remove))?;
        append(&mut log, &[Entry::<R>::Remove { key: key.clone() }], Operation::Remove).await?;
        self.records.remove(&existing.key()).await
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.records.find(key).await
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        self.records.select(sink, options).await
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let mut log = self.log.lock().await;
        let doomed = match self.records.select_vec(options).await {
            Ok(doomed) => doomed,
            Err(err) => return fail(sink, err.with_op(Operation::RemoveAll)).await,
        };
        let entries: Vec<Entry<R>> = doomed
            .iter()
            .map(|r| Entry::Remove { key: r.key() })
            .collect();
        if let Err(err) = append(&mut log, &entries, Operation::RemoveAll).await {
            return fail(sink, err).await;
        }
        for record in &doomed {
            let _ = self.records.remove(&record.key()).await;
        }
        drop(log);
        stream_into(sink, doomed, Operation::RemoveAll).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.records.listen(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.records.unlisten(id)
    }
}
