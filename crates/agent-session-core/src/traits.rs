//! Core traits for message persistence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Message, MessageId};

/// Session identifier.
pub type SessionId = String;

/// Where a session's messages are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Local file-backed store.
    Local,
    /// Remote memory service.
    Remote,
}

/// Persisted session metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Opaque session identifier.
    pub session_id: SessionId,
    /// Owning user.
    pub user_id: String,
    /// Storage mode the session was opened with.
    pub storage_mode: StorageMode,
    /// Creation timestamp (Unix epoch milliseconds).
    pub created_at: i64,
    /// Last update timestamp.
    pub updated_at: i64,
}

impl SessionRecord {
    /// Create a new record stamped with the current time.
    #[must_use]
    pub fn new(
        session_id: impl Into<SessionId>,
        user_id: impl Into<String>,
        storage_mode: StorageMode,
    ) -> Self {
        let now = crate::message::now_millis();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            storage_mode,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Backend error.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("Invalid session id: {0}")]
    InvalidId(String),
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Remote service error: {0}")]
    Remote(String),
    #[error("Storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether the failure is transient and worth retrying.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Remote(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(#[from] StorageError),
    #[error("Flush timed out with {pending} message(s) still buffered")]
    FlushTimeout { pending: usize },
    #[error("Message identifier collision: {0}")]
    IdentifierCollision(MessageId),
    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Whether the caller may retry the failed operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_transient(),
            Self::FlushTimeout { .. } => true,
            Self::IdentifierCollision(_) | Self::Internal(_) => false,
        }
    }
}

/// Raw per-message persistence backend.
///
/// Writes are immediate; ordering per session follows call order.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    /// Persist a session record, replacing any existing one.
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StorageError>;

    /// Get session metadata.
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError>;

    /// Append one message to a session. The message must carry an id.
    ///
    /// Idempotent on message id: writing an id the session already holds
    /// succeeds without storing a second copy.
    async fn write_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError>;

    /// All persisted messages of a session, in append order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError>;
}

#[async_trait]
impl<B: MessageBackend + ?Sized> MessageBackend for std::sync::Arc<B> {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        (**self).create_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        (**self).get_session(session_id).await
    }

    async fn write_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        (**self).write_message(session_id, message).await
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        (**self).list_messages(session_id).await
    }
}

/// Session-scoped message store the agent runtime talks to.
///
/// Implementations may be stacked: every method a layer does not augment
/// is forwarded to the layer beneath.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Session this store is bound to.
    fn session_id(&self) -> &str;

    /// Append a message, returning the identifier it is stored under.
    async fn append(&self, message: Message) -> Result<MessageId, StoreError>;

    /// Persist everything appended so far.
    async fn flush(&self) -> Result<(), StoreError>;

    /// Persisted messages of the session.
    async fn list_messages(&self) -> Result<Vec<Message>, StoreError>;

    /// Persisted session metadata.
    async fn get_session(&self) -> Result<Option<SessionRecord>, StoreError>;
}

/// Validate that a message carries an identifier before it is written.
///
/// # Errors
/// Returns `InvalidMessage` if the id is missing or empty.
pub fn require_id(message: &Message) -> Result<&str, StorageError> {
    match message.id.as_deref() {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(StorageError::InvalidMessage(
            "message has no identifier".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StoreError::FlushTimeout { pending: 2 }.is_retryable());
        assert!(StoreError::Backend(StorageError::Remote("503".into())).is_retryable());
        assert!(!StoreError::Backend(StorageError::InvalidId("..".into())).is_retryable());
        assert!(!StoreError::IdentifierCollision("m-1".into()).is_retryable());
    }

    #[test]
    fn test_require_id() {
        assert!(require_id(&Message::user("x")).is_err());
        assert!(require_id(&Message::user("x").with_id("")).is_err());
        assert_eq!(require_id(&Message::user("x").with_id("m-1")).unwrap(), "m-1");
    }
}
