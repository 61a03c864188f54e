//! Records and keys.
//!
//! A `Record` is any serializable value with a designated identity. Stores
//! compare records by key, never by reference, and evaluate queries against
//! the record's JSON form.

use std::fmt;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Identity of a record.
///
/// Keys are totally ordered (`Int < Str < Composite`) so stores can keep
/// records in key order and sequenced logs can replay in id order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Int(i64),
    Str(String),
    Composite(Vec<Key>),
}

impl Key {
    /// The key as a JSON value, for use in query expressions.
    pub fn to_value(&self) -> Value {
        match self {
            Key::Int(n) => Value::from(*n),
            Key::Str(s) => Value::from(s.as_str()),
            Key::Composite(parts) => Value::Array(parts.iter().map(Key::to_value).collect()),
        }
    }

    /// Parse a key back from its JSON form.
    pub fn from_value(value: &Value) -> Option<Key> {
        match value {
            Value::Number(n) => n.as_i64().map(Key::Int),
            Value::String(s) => Some(Key::Str(s.clone())),
            Value::Array(parts) => parts
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Composite),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Key::Int(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Int(n) => write!(f, "{}", n),
            Key::Str(s) => write!(f, "{}", s),
            Key::Composite(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("/")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
        }
    }
}

macro_rules! int_key {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(value: $ty) -> Self {
                    Key::Int(value as i64)
                }
            }
        )*
    };
}

int_key!(i8, i16, i32, i64, u8, u16, u32, u64, usize);

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(value)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::Str(value.to_string())
    }
}

impl From<&String> for Key {
    fn from(value: &String) -> Self {
        Key::Str(value.clone())
    }
}

impl<A: Into<Key>, B: Into<Key>> From<(A, B)> for Key {
    fn from((a, b): (A, B)) -> Self {
        Key::Composite(vec![a.into(), b.into()])
    }
}

impl<A: Into<Key>, B: Into<Key>, C: Into<Key>> From<(A, B, C)> for Key {
    fn from((a, b, c): (A, B, C)) -> Self {
        Key::Composite(vec![a.into(), b.into(), c.into()])
    }
}

/// Trait for types that can be kept in a `Store`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The collection name for this record type (e.g., "issues", "emails").
    /// Maps to a table in SQL, a file name for file stores, a URL segment for REST.
    const COLLECTION: &'static str;

    /// Returns the key identifying this record.
    fn key(&self) -> Key;

    /// The record as a JSON value, used for query evaluation.
    fn to_value(&self) -> Result<Value, StoreError> {
        serde_json::to_value(self).map_err(StoreError::from)
    }

    fn from_value(value: Value) -> Result<Self, StoreError> {
        serde_json::from_value(value).map_err(StoreError::from)
    }
}
