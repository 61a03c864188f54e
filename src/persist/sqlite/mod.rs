//! SQLite-backed keyed persistence.
//!
//! One `SqliteDatabase` owns the connection and a writer task; each
//! `SqliteStore` maps one record type to a `(key, value)` table in it.

mod database;
mod store;

pub use database::{SqliteDatabase, Txn, MAX_BATCH};
pub use store::SqliteStore;
