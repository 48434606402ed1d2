//! Session persistence configuration.

use std::{path::PathBuf, time::Duration};

use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;

/// Environment variable prefix (`AGENT_SESSION_STORAGE_MODE`, ...).
pub const ENV_PREFIX: &str = "AGENT_SESSION";

/// Region used when remote mode does not name one.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Buffered message count above which a warning is logged.
pub const DEFAULT_BUFFER_WARN_THRESHOLD: usize = 256;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown storage mode: {0:?} (expected \"local\" or \"remote\")")]
    UnknownStorageMode(String),
    #[error("Remote storage requires a non-empty memory store id")]
    MissingMemoryStoreId,
    #[error("Remote storage selected but no memory service client was provided")]
    MissingRemoteClient,
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Deployment configuration for session persistence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `local` or `remote`.
    pub storage_mode: String,
    /// Remote memory store identifier (remote mode only).
    pub memory_store_id: Option<String>,
    /// Remote region (remote mode only).
    pub region: Option<String>,
    /// Directory for the local file store.
    pub local_dir: Option<PathBuf>,
    /// Default flush timeout in milliseconds. Unset means no timeout.
    pub flush_timeout_ms: Option<u64>,
    /// Soft limit on buffered messages before a warning is logged.
    pub buffer_warn_threshold: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_mode: "local".to_string(),
            memory_store_id: None,
            region: None,
            local_dir: None,
            flush_timeout_ms: None,
            buffer_warn_threshold: DEFAULT_BUFFER_WARN_THRESHOLD,
        }
    }
}

impl SessionConfig {
    /// Local-mode configuration rooted at `dir`.
    #[must_use]
    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: Some(dir.into()),
            ..Self::default()
        }
    }

    /// Remote-mode configuration.
    #[must_use]
    pub fn remote(memory_store_id: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            storage_mode: "remote".to_string(),
            memory_store_id: Some(memory_store_id.into()),
            region: Some(region.into()),
            ..Self::default()
        }
    }

    /// Load from an optional file, then `AGENT_SESSION_*` environment variables.
    ///
    /// # Errors
    /// Returns error if a source cannot be read or deserialized.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path).required(false));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).prefix_separator("_"))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Flush timeout as a duration.
    #[must_use]
    pub fn flush_timeout(&self) -> Option<Duration> {
        self.flush_timeout_ms.map(Duration::from_millis)
    }

    /// Directory for the local file store.
    ///
    /// Falls back to the platform data directory, then `./sessions`.
    #[must_use]
    pub fn local_dir_or_default(&self) -> PathBuf {
        self.local_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir().map_or_else(
                || PathBuf::from("sessions"),
                |dir| dir.join("agent-session").join("sessions"),
            )
        })
    }
}
