//! Session persistence stores for agent runtimes.
//!
//! Provides:
//! - Backends (memory, local file store, remote memory service)
//! - `TurnBufferedStore` - Batch writes per conversational turn
//! - `IdentityInjectingStore` - Pre-assign message identifiers
//! - `SessionManager` - Compose the stack per session

pub mod buffered;
pub mod direct;
pub mod identity;
#[cfg(all(feature = "file", feature = "remote"))]
pub mod manager;
pub mod storage;

pub use buffered::TurnBufferedStore;
pub use direct::DirectStore;
pub use identity::{IdGenerator, IdentityInjectingStore, UuidGenerator};
#[cfg(all(feature = "file", feature = "remote"))]
pub use manager::{ManagerError, SessionHandle, SessionManager, SessionStore};
