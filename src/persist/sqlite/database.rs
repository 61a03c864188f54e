use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::{params_from_iter, Connection, Transaction};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Operation, StoreError, StoreResult};

/// Largest number of writes committed in one transaction.
pub const MAX_BATCH: usize = 10_000;

/// The open write transaction, handed to each queued write in a batch.
pub type Txn<'c> = Transaction<'c>;

pub(crate) enum Write {
    Put {
        table: String,
        key: String,
        value: String,
    },
    Delete {
        table: String,
        keys: Vec<String>,
    },
}

impl Write {
    fn apply(&self, txn: &Txn<'_>) -> rusqlite::Result<()> {
        match self {
            Write::Put { table, key, value } => {
                txn.execute(
                    &format!(
                        "INSERT INTO {} (key, value) VALUES (?1, ?2) \
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        table
                    ),
                    [key, value],
                )?;
            }
            Write::Delete { table, keys } => {
                for chunk in keys.chunks(500) {
                    let marks = vec!["?"; chunk.len()].join(", ");
                    txn.execute(
                        &format!("DELETE FROM {} WHERE key IN ({})", table, marks),
                        params_from_iter(chunk.iter()),
                    )?;
                }
            }
        }
        Ok(())
    }
}

struct WriteRequest {
    write: Write,
    reply: oneshot::Sender<StoreResult<()>>,
}

/// A shared SQLite database. Cheap to clone.
///
/// Reads run on the blocking pool. Writes are queued to a writer task
/// which gathers every write issued in the same scheduler tick (up to
/// `MAX_BATCH`) and commits them in one transaction.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
    writes: mpsc::UnboundedSender<WriteRequest>,
    batches: Arc<AtomicUsize>,
}

impl SqliteDatabase {
    /// Opens (or creates) the database file. Must be called inside a
    /// tokio runtime.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            let conn = Connection::open(path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::transport(Operation::Select, e.to_string()))??;
        Ok(Self::start(conn))
    }

    pub async fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::start(Connection::open_in_memory()?))
    }

    fn start(conn: Connection) -> Self {
        let conn = Arc::new(Mutex::new(conn));
        let batches = Arc::new(AtomicUsize::new(0));
        let (writes, queue) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(conn.clone(), queue, batches.clone()));
        SqliteDatabase {
            conn,
            writes,
            batches,
        }
    }

    /// Number of write transactions committed so far.
    pub fn committed_batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Runs `f` against the connection on the blocking pool.
    pub(crate) async fn read<T, F>(&self, op: Operation, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::LockPoisoned("sqlite connection"))?;
            f(&conn).map_err(|e| StoreError::from(e).with_op(op))
        })
        .await
        .map_err(|e| StoreError::transport(op, e.to_string()))?
    }

    pub(crate) async fn write(&self, op: Operation, write: Write) -> StoreResult<()> {
        let (reply, done) = oneshot::channel();
        self.writes
            .send(WriteRequest { write, reply })
            .map_err(|_| StoreError::transport(op, "sqlite writer stopped"))?;
        done.await
            .map_err(|_| StoreError::transport(op, "sqlite writer stopped"))?
            .map_err(|e| e.with_op(op))
    }
}

async fn run_writer(
    conn: Arc<Mutex<Connection>>,
    mut queue: mpsc::UnboundedReceiver<WriteRequest>,
    batches: Arc<AtomicUsize>,
) {
    while let Some(first) = queue.recv().await {
        // Let the rest of this tick's writes arrive.
        tokio::task::yield_now().await;
        let mut batch = vec![first];
        while batch.len() < MAX_BATCH {
            match queue.try_recv() {
                Ok(request) => batch.push(request),
                Err(_) => break,
            }
        }

        let size = batch.len();
        let conn = conn.clone();
        let counter = batches.clone();
        match tokio::task::spawn_blocking(move || commit(&conn, batch, &counter)).await {
            Ok(()) => debug!(writes = size, "committed sqlite batch"),
            Err(err) => warn!(writes = size, error = %err, "sqlite batch aborted"),
        }
    }
}

fn commit(conn: &Mutex<Connection>, batch: Vec<WriteRequest>, batches: &AtomicUsize) {
    let mut conn = match conn.lock() {
        Ok(conn) => conn,
        Err(_) => {
            for request in batch {
                let _ = request
                    .reply
                    .send(Err(StoreError::LockPoisoned("sqlite connection")));
            }
            return;
        }
    };
    let txn = match conn.transaction() {
        Ok(txn) => txn,
        Err(err) => {
            let err = StoreError::from(err);
            for request in batch {
                let _ = request.reply.send(Err(err.clone()));
            }
            return;
        }
    };

    let results: Vec<rusqlite::Result<()>> =
        batch.iter().map(|request| request.write.apply(&txn)).collect();

    match txn.commit() {
        Ok(()) => {
            batches.fetch_add(1, Ordering::SeqCst);
            for (request, result) in batch.into_iter().zip(results) {
                let _ = request.reply.send(result.map_err(StoreError::from));
            }
        }
        Err(err) => {
            let err = StoreError::from(err);
            for request in batch {
                let _ = request.reply.send(Err(err.clone()));
            }
        }
    }
}

/// Accepts table and field names made of ASCII letters, digits and `_`.
pub(crate) fn identifier(name: &str, op: Operation) -> StoreResult<&str> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(StoreError::rejected(op, format!("invalid sqlite identifier {:?}", name)))
    }
}
