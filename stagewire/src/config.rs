//! Engine configuration.
//!
//! Configuration is plain JSON; every field is optional.
//!
//! ```json
//! {
//!   "log": { "filter": "stagewire=debug", "format": "json" },
//!   "default_flush_interval_ms": 100
//! }
//! ```

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// An `EnvFilter` directive. Falls back to `RUST_LOG`, then `info`.
    pub filter: Option<String>,
    /// Output format.
    pub format: LogFormat,
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logging settings.
    pub log: LogConfig,
    /// Flush interval applied by
    /// [`wire_async_operator_with_config`](crate::pipeline::wire_async_operator_with_config).
    pub default_flush_interval_ms: Option<u64>,
}

impl EngineConfig {
    /// Parses configuration from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Sets the default flush interval in milliseconds.
    #[must_use]
    pub fn with_default_flush_interval_ms(mut self, ms: u64) -> Self {
        self.default_flush_interval_ms = Some(ms);
        self
    }

    /// Returns the default flush interval; zero means none.
    #[must_use]
    pub fn default_flush_interval(&self) -> Option<Duration> {
        self.default_flush_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}
