//! Backend implementations.

#[cfg(feature = "file")]
pub mod file;
#[cfg(feature = "memory")]
pub mod memory;
#[cfg(feature = "remote")]
pub mod remote;

#[cfg(feature = "file")]
pub use file::FileBackend;
#[cfg(feature = "memory")]
pub use memory::MemoryBackend;
#[cfg(feature = "remote")]
pub use remote::{InMemoryClient, MemoryClient, RemoteBackend};

#[cfg(all(feature = "file", feature = "remote"))]
use std::sync::Arc;

#[cfg(all(feature = "file", feature = "remote"))]
use agent_session_core::{BackendDescriptor, ConfigError, MessageBackend};

/// Instantiate the backend named by a resolved descriptor.
///
/// # Errors
/// Returns `MissingRemoteClient` if the descriptor is remote and no client is given.
#[cfg(all(feature = "file", feature = "remote"))]
pub fn open_backend(
    descriptor: &BackendDescriptor,
    remote_client: Option<Arc<dyn MemoryClient>>,
) -> Result<Arc<dyn MessageBackend>, ConfigError> {
    match descriptor {
        BackendDescriptor::Local { base_dir } => {
            tracing::info!(base_dir = %base_dir.display(), "Opening local file store");
            Ok(Arc::new(FileBackend::new(base_dir.clone())))
        }
        BackendDescriptor::Remote {
            memory_store_id,
            region,
        } => {
            let client = remote_client.ok_or(ConfigError::MissingRemoteClient)?;
            tracing::info!(%memory_store_id, %region, "Opening remote memory store");
            Ok(Arc::new(RemoteBackend::new(
                client,
                memory_store_id.clone(),
                region.clone(),
            )))
        }
    }
}
