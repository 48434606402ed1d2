//! Core abstractions for agent session persistence.
//!
//! This crate provides the fundamental building blocks:
//! - `Message` / `ContentBlock` - Conversation data model
//! - `MessageBackend` / `MessageStore` - Persistence contracts
//! - `resolve_backend` - Storage backend selection
//! - `CancelFlag` - Cooperative session stop flag

pub mod cancel;
pub mod message;
pub mod selector;
pub mod settings;
pub mod traits;

pub use cancel::CancelFlag;
pub use message::{ContentBlock, Message, MessageId, Role};
pub use selector::{BackendDescriptor, resolve_backend};
pub use settings::{ConfigError, SessionConfig};
pub use traits::{
    MessageBackend, MessageStore, SessionId, SessionRecord, StorageError, StorageMode, StoreError,
};
