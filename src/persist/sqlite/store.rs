use std::marker::PhantomData;

use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::params_from_iter;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::{Operation, StoreError, StoreResult};
use crate::query::{Expr, SelectOptions};
use crate::record::{Key, Record};
use crate::sink::{fail, stream_into, Sink};
use crate::store::{ListenerId, Listeners, Store};

use super::database::{identifier, SqliteDatabase, Write};

/// Persists records of one type as JSON rows keyed by their `Key`.
///
/// `select` with an `Eq` on an indexed field reads through the index;
/// every other query scans the table and filters in memory.
pub struct SqliteStore<R: Record> {
    db: SqliteDatabase,
    table: String,
    indexes: Vec<String>,
    listeners: Listeners<R>,
    _record: PhantomData<fn() -> R>,
}

fn encode_key(key: &Key) -> StoreResult<String> {
    serde_json::to_string(key).map_err(StoreError::from)
}

fn json_path(field: &str) -> String {
    format!("'$.{}'", field)
}

fn sql_value(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Bool(b) => Some(SqlValue::Integer(*b as i64)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        _ => None,
    }
}

fn validate_field(field: &str) -> StoreResult<&str> {
    for segment in field.split('.') {
        identifier(segment, Operation::Select)?;
    }
    Ok(field)
}

impl<R: Record> SqliteStore<R> {
    /// Opens the store in the table named after `R::COLLECTION`.
    pub async fn open(db: &SqliteDatabase) -> StoreResult<Self> {
        Self::open_table(db, R::COLLECTION).await
    }

    /// Opens the store in `table`, for record types sharing a collection
    /// name (operation logs of different record types, for one).
    pub async fn open_table(db: &SqliteDatabase, table: &str) -> StoreResult<Self> {
        let table = identifier(table, Operation::Select)?.to_string();
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            table
        );
        db.read(Operation::Select, move |conn| conn.execute_batch(&ddl))
            .await?;
        Ok(SqliteStore {
            db: db.clone(),
            table,
            indexes: Vec::new(),
            listeners: Listeners::new(),
            _record: PhantomData,
        })
    }

    /// Adds an expression index on `field` (dotted paths allowed).
    pub async fn with_index(mut self, field: &str) -> StoreResult<Self> {
        let field = validate_field(field)?.to_string();
        let ddl = format!(
            "CREATE INDEX IF NOT EXISTS {}_{} ON {} (json_extract(value, {}))",
            self.table,
            field.replace('.', "_"),
            self.table,
            json_path(&field)
        );
        self.db
            .read(Operation::Select, move |conn| conn.execute_batch(&ddl))
            .await?;
        self.indexes.push(field);
        Ok(self)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// The index lookup `query` can use, if any.
    fn index_lookup(&self, query: Option<&Expr>) -> Option<(String, SqlValue)> {
        let Some(Expr::Eq(field, value)) = query.cloned().map(Expr::normalize) else {
            return None;
        };
        if !self.indexes.contains(&field) {
            return None;
        }
        sql_value(&value).map(|value| (field, value))
    }

    async fn rows(&self, options: &SelectOptions, op: Operation) -> StoreResult<Vec<R>> {
        let lookup = self.index_lookup(options.query.as_ref());
        let sql = match &lookup {
            Some((field, _)) => format!(
                "SELECT value FROM {} WHERE json_extract(value, {}) = ?1",
                self.table,
                json_path(field)
            ),
            None => format!("SELECT value FROM {}", self.table),
        };
        let params: Vec<SqlValue> = lookup.into_iter().map(|(_, value)| value).collect();
        let raw = self
            .db
            .read(op, move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt
                    .query_map(params_from_iter(params.iter()), |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut records = raw
            .iter()
            .map(|text| serde_json::from_str::<R>(text).map_err(StoreError::from))
            .collect::<StoreResult<Vec<R>>>()?;
        records.sort_by_key(|r| r.key());
        trace!(collection = R::COLLECTION, table = %self.table, rows = records.len(), "scanned");
        options.apply(records)
    }

    async fn lookup(&self, key: &Key, op: Operation) -> StoreResult<Option<R>> {
        let encoded = encode_key(key)?;
        let sql = format!("SELECT value FROM {} WHERE key = ?1", self.table);
        let raw = self
            .db
            .read(op, move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query([encoded])?;
                match rows.next()? {
                    Some(row) => row.get::<_, String>(0).map(Some),
                    None => Ok(None),
                }
            })
            .await?;
        raw.map(|text| serde_json::from_str(&text).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl<R: Record> Store<R> for SqliteStore<R> {
    async fn put(&self, record: R) -> StoreResult<R> {
        let write = Write::Put {
            table: self.table.clone(),
            key: encode_key(&record.key())?,
            value: serde_json::to_string(&record)?,
        };
        self.db.write(Operation::Put, write).await?;
        self.listeners.notify_put(&record).await;
        Ok(record)
    }

    async fn remove(&self, key: &Key) -> StoreResult<R> {
        let record = self
            .lookup(key, Operation::Remove)
            .await?
            .ok_or_else(|| StoreError::not_found(Operation::Remove, key))?;
        let write = Write::Delete {
            table: self.table.clone(),
            keys: vec![encode_key(key)?],
        };
        self.db.write(Operation::Remove, write).await?;
        self.listeners.notify_remove(&record).await;
        Ok(record)
    }

    async fn find(&self, key: &Key) -> StoreResult<R> {
        self.lookup(key, Operation::Find)
            .await?
            .ok_or_else(|| StoreError::not_found(Operation::Find, key))
    }

    async fn select(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        match self.rows(options, Operation::Select).await {
            Ok(rows) => stream_into(sink, rows, Operation::Select).await,
            Err(err) => fail(sink, err).await,
        }
    }

    async fn remove_all(&self, sink: &mut dyn Sink<R>, options: &SelectOptions) -> StoreResult<()> {
        let doomed = match self.rows(options, Operation::RemoveAll).await {
            Ok(rows) => rows,
            Err(err) => return fail(sink, err).await,
        };
        let keys = match doomed
            .iter()
            .map(|r| encode_key(&r.key()))
            .collect::<StoreResult<Vec<_>>>()
        {
            Ok(keys) => keys,
            Err(err) => return fail(sink, err.with_op(Operation::RemoveAll)).await,
        };
        if !keys.is_empty() {
            let write = Write::Delete {
                table: self.table.clone(),
                keys,
            };
            if let Err(err) = self.db.write(Operation::RemoveAll, write).await {
                return fail(sink, err).await;
            }
            debug!(collection = R::COLLECTION, removed = doomed.len(), "removed rows");
        }
        for record in &doomed {
            self.listeners.notify_remove(record).await;
        }
        stream_into(sink, doomed, Operation::RemoveAll).await
    }

    fn listen(&self, sink: Box<dyn Sink<R>>, options: SelectOptions) -> ListenerId {
        self.listeners.add(sink, options)
    }

    fn unlisten(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}
