//! Backend selection.
//!
//! Resolution is a local decision only: no backend is contacted here.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    settings::{ConfigError, DEFAULT_REGION, SessionConfig},
    traits::StorageMode,
};

/// Resolved storage target and its connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BackendDescriptor {
    /// Local file store rooted at `base_dir`.
    Local { base_dir: PathBuf },
    /// Remote memory service.
    Remote {
        memory_store_id: String,
        region: String,
    },
}

impl BackendDescriptor {
    /// Storage mode of this descriptor.
    #[must_use]
    pub const fn mode(&self) -> StorageMode {
        match self {
            Self::Local { .. } => StorageMode::Local,
            Self::Remote { .. } => StorageMode::Remote,
        }
    }
}

/// Resolve which backend a deployment uses.
///
/// # Errors
/// Returns `UnknownStorageMode` for anything other than `local`/`remote`,
/// and `MissingMemoryStoreId` for remote mode without a store id.
pub fn resolve_backend(config: &SessionConfig) -> Result<BackendDescriptor, ConfigError> {
    let descriptor = match config.storage_mode.trim().to_ascii_lowercase().as_str() {
        "local" => BackendDescriptor::Local {
            base_dir: config.local_dir_or_default(),
        },
        "remote" => {
            let memory_store_id = config
                .memory_store_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or(ConfigError::MissingMemoryStoreId)?;
            let region = config
                .region
                .as_deref()
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .unwrap_or(DEFAULT_REGION);
            BackendDescriptor::Remote {
                memory_store_id: memory_store_id.to_string(),
                region: region.to_string(),
            }
        }
        _ => return Err(ConfigError::UnknownStorageMode(config.storage_mode.clone())),
    };

    tracing::info!(mode = ?descriptor.mode(), "Resolved session storage backend");
    Ok(descriptor)
}
