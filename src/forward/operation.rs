use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::{Key, Record};

use super::sequenced::Sequenced;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForwardMethod {
    Put,
    Remove,
}

impl fmt::Display for ForwardMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardMethod::Put => f.write_str("put"),
            ForwardMethod::Remove => f.write_str("remove"),
        }
    }
}

/// A queued mutation. Persisted as `{"id", "method", "obj"}`; `id` is
/// assigned by the sequenced log (0 until then).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForwardOperation<R> {
    #[serde(default)]
    pub id: i64,
    pub method: ForwardMethod,
    pub obj: R,
}

impl<R> ForwardOperation<R> {
    pub fn put(obj: R) -> Self {
        ForwardOperation {
            id: 0,
            method: ForwardMethod::Put,
            obj,
        }
    }

    pub fn remove(obj: R) -> Self {
        ForwardOperation {
            id: 0,
            method: ForwardMethod::Remove,
            obj,
        }
    }
}

impl<R: Record> Record for ForwardOperation<R> {
    const COLLECTION: &'static str = "forward_operations";

    fn key(&self) -> Key {
        Key::Int(self.id)
    }
}

impl<R> Sequenced for ForwardOperation<R> {
    fn sequence(&self) -> i64 {
        self.id
    }

    fn set_sequence(&mut self, sequence: i64) {
        self.id = sequence;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::issue;

    #[test]
    fn persisted_layout() {
        let mut op = ForwardOperation::put(issue(2));
        op.id = 7;
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["method"], "put");
        assert_eq!(json["obj"]["id"], 2);

        let back: ForwardOperation<crate::testing::Issue> = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
