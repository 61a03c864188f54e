use serde::{Deserialize, Serialize};

use crate::record::{Key, Record};

/// Persisted schema marker of one named store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreVersion {
    pub name: String,
    pub version: u32,
}

impl Record for StoreVersion {
    const COLLECTION: &'static str = "store_versions";

    fn key(&self) -> Key {
        Key::from(self.name.as_str())
    }
}
