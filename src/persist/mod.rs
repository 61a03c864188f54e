//! Persistence adapters: keyed SQLite tables, JSON-lines files, whole
//! collection snapshots, and field offloading.

mod blob;
mod file;
mod local;
mod offload;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use blob::Blob;
pub use file::JsonFileStore;
pub use local::{DirectoryMedium, KeyValueMedium, LocalStore, MemoryMedium, SnapshotCodec, FLUSH_WINDOW};
pub use offload::{Offload, OffloadStore, OffloadedField};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDatabase, SqliteStore};
