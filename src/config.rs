//! Serde-loadable settings for the decorators.
//!
//! Durations are milliseconds. Every struct has defaults matching the
//! decorator's own, so a config file only names what it changes:
//!
//! ```json
//! { "lru": { "max_size": 500 }, "sliding_window": { "query_ttl_ms": 2000 } }
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::{DEFAULT_MAX_SIZE, DEFAULT_QUERY_TTL, DEFAULT_STALE_TIMEOUT, DEFAULT_WINDOW_SIZE};
use crate::forward::DEFAULT_RETRY_INTERVAL;
use crate::rest::{DEFAULT_BATCH_SIZE, DEFAULT_SKIP_THRESHOLD};

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LruConfig {
    pub max_size: usize,
}

impl Default for LruConfig {
    fn default() -> Self {
        LruConfig {
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LazyCacheConfig {
    pub refresh_on_cache_hit: bool,
    pub cache_on_select: bool,
    pub stale_timeout_ms: u64,
}

impl LazyCacheConfig {
    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }
}

impl Default for LazyCacheConfig {
    fn default() -> Self {
        LazyCacheConfig {
            refresh_on_cache_hit: false,
            cache_on_select: false,
            stale_timeout_ms: millis(DEFAULT_STALE_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlidingWindowConfig {
    pub window_size: usize,
    pub query_ttl_ms: u64,
}

impl SlidingWindowConfig {
    pub fn query_ttl(&self) -> Duration {
        Duration::from_millis(self.query_ttl_ms)
    }
}

impl Default for SlidingWindowConfig {
    fn default() -> Self {
        SlidingWindowConfig {
            window_size: DEFAULT_WINDOW_SIZE,
            query_ttl_ms: millis(DEFAULT_QUERY_TTL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForwardConfig {
    pub retry_interval_ms: u64,
}

impl ForwardConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        ForwardConfig {
            retry_interval_ms: millis(DEFAULT_RETRY_INTERVAL),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub url: String,
    pub batch_size: usize,
    pub skip_threshold: usize,
}

impl Default for RestConfig {
    fn default() -> Self {
        RestConfig {
            url: String::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            skip_threshold: DEFAULT_SKIP_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DelayConfig {
    pub initial_delay_ms: u64,
    pub row_delay_ms: u64,
}

impl DelayConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn row_delay(&self) -> Duration {
        Duration::from_millis(self.row_delay_ms)
    }
}

/// Settings for a whole pipeline; an absent section leaves that
/// decorator out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rest: Option<RestConfig>,
    pub forward: Option<ForwardConfig>,
    pub delay: Option<DelayConfig>,
    pub sliding_window: Option<SlidingWindowConfig>,
    pub lazy_cache: Option<LazyCacheConfig>,
    pub lru: Option<LruConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io { path: String, detail: String },
    Parse(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, detail } => write!(f, "cannot read {}: {}", path, detail),
            ConfigError::Parse(detail) => write!(f, "invalid pipeline config: {}", detail),
        }
    }
}

impl std::error::Error for ConfigError {}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_means_no_decorators() {
        let config = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PipelineConfig::default());
        assert!(config.lru.is_none());
    }

    #[test]
    fn sections_fill_missing_fields_with_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "lru": {}, "sliding_window": { "query_ttl_ms": 2000 }, "forward": {} }"#,
        )
        .unwrap();
        assert_eq!(config.lru.unwrap().max_size, 100);
        let window = config.sliding_window.unwrap();
        assert_eq!(window.window_size, 20);
        assert_eq!(window.query_ttl(), Duration::from_secs(2));
        assert_eq!(config.forward.unwrap().retry_interval(), Duration::from_secs(5));
    }

    #[test]
    fn rest_defaults() {
        let rest = RestConfig::default();
        assert_eq!((rest.batch_size, rest.skip_threshold), (200, 1000));
    }

    #[test]
    fn reports_parse_and_io_errors() {
        assert!(matches!(
            PipelineConfig::from_json_str("{ \"lru\": 5 }"),
            Err(ConfigError::Parse(_))
        ));

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            PipelineConfig::from_path(&missing),
            Err(ConfigError::Io { .. })
        ));

        let present = dir.path().join("pipeline.json");
        std::fs::write(&present, r#"{ "delay": { "row_delay_ms": 5 } }"#).unwrap();
        let config = PipelineConfig::from_path(&present).unwrap();
        assert_eq!(config.delay.unwrap().row_delay(), Duration::from_millis(5));
    }
}
