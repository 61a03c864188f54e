use std::fmt;

use crate::record::Key;

/// Store operation an error (or event) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    Remove,
    Find,
    Select,
    RemoveAll,
    Listen,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Put => "put",
            Operation::Remove => "remove",
            Operation::Find => "find",
            Operation::Select => "select",
            Operation::RemoveAll => "removeAll",
            Operation::Listen => "listen",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound {
        op: Operation,
        key: Key,
    },
    Rejected {
        op: Operation,
        detail: String,
    },
    /// A sink stopped or failed the stream through its flow control.
    Aborted {
        op: Operation,
        detail: Option<String>,
    },
    Transport {
        op: Operation,
        detail: String,
    },
    Serde(String),
    LockPoisoned(&'static str),
    Migration {
        name: String,
        version: u32,
        detail: String,
    },
}

impl StoreError {
    pub fn not_found(op: Operation, key: &Key) -> Self {
        StoreError::NotFound {
            op,
            key: key.clone(),
        }
    }

    pub fn rejected(op: Operation, detail: impl Into<String>) -> Self {
        StoreError::Rejected {
            op,
            detail: detail.into(),
        }
    }

    pub fn transport(op: Operation, detail: impl Into<String>) -> Self {
        StoreError::Transport {
            op,
            detail: detail.into(),
        }
    }

    /// The operation this error is scoped to, if any.
    pub fn op(&self) -> Option<Operation> {
        match self {
            StoreError::NotFound { op, .. }
            | StoreError::Rejected { op, .. }
            | StoreError::Aborted { op, .. }
            | StoreError::Transport { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Re-tag an operation-scoped error, used when a decorator reports a
    /// delegate failure under the operation it was called for.
    pub fn with_op(self, op: Operation) -> Self {
        match self {
            StoreError::NotFound { key, .. } => StoreError::NotFound { op, key },
            StoreError::Rejected { detail, .. } => StoreError::Rejected { op, detail },
            StoreError::Aborted { detail, .. } => StoreError::Aborted { op, detail },
            StoreError::Transport { detail, .. } => StoreError::Transport { op, detail },
            other => other,
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound { op, key } => write!(f, "{}: no record with key {}", op, key),
            StoreError::Rejected { op, detail } => write!(f, "{} rejected: {}", op, detail),
            StoreError::Aborted { op, detail } => match detail {
                Some(detail) => write!(f, "{} aborted by sink: {}", op, detail),
                None => write!(f, "{} stopped by sink", op),
            },
            StoreError::Transport { op, detail } => {
                write!(f, "{} transport failure: {}", op, detail)
            }
            StoreError::Serde(msg) => write!(f, "serialization error: {}", msg),
            StoreError::LockPoisoned(operation) => {
                write!(f, "store lock poisoned during {}", operation)
            }
            StoreError::Migration {
                name,
                version,
                detail,
            } => write!(
                f,
                "migration of {} to version {} failed: {}",
                name, version, detail
            ),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

impl From<bitcode::Error> for StoreError {
    fn from(err: bitcode::Error) -> Self {
        StoreError::Serde(err.to_string())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Transport {
            op: Operation::Select,
            detail: err.to_string(),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_operation() {
        let err = StoreError::not_found(Operation::Find, &Key::from(3));
        assert_eq!(err.to_string(), "find: no record with key 3");
        assert_eq!(Operation::RemoveAll.to_string(), "removeAll");
    }

    #[test]
    fn with_op_retags_scoped_errors_only() {
        let err = StoreError::transport(Operation::Select, "down").with_op(Operation::Put);
        assert_eq!(err.op(), Some(Operation::Put));

        let serde = StoreError::Serde("bad".into()).with_op(Operation::Put);
        assert_eq!(serde.op(), None);
    }
}
