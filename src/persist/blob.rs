//! Binary payloads carried inside JSON records as data URLs.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StoreError;

/// Bytes with a MIME type. Serializes as `data:<mime>;base64,<payload>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Blob {
    pub mime: String,
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(mime: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Blob {
            mime: mime.into(),
            data: data.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.data))
    }

    pub fn from_data_url(url: &str) -> Result<Blob, StoreError> {
        let invalid = || StoreError::Serde(format!("not a base64 data url: {:.32}", url));
        let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
        let (mime, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;
        let data = STANDARD
            .decode(payload)
            .map_err(|e| StoreError::Serde(e.to_string()))?;
        Ok(Blob::new(mime, data))
    }
}

impl fmt::Display for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.mime, self.data.len())
    }
}

impl Serialize for Blob {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.data.is_empty() && self.mime.is_empty() {
            return serializer.serialize_str("");
        }
        self.to_data_url().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Blob {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let url = String::deserialize(deserializer)?;
        if url.is_empty() {
            return Ok(Blob::default());
        }
        Blob::from_data_url(&url).map_err(serde::de::Error::custom)
    }
}
