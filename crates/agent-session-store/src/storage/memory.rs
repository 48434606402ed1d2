//! In-memory message backend.

use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};

use agent_session_core::{
    Message, MessageBackend, MessageId, SessionRecord, StorageError, message::now_millis,
    traits::require_id,
};
use async_trait::async_trait;

#[derive(Default)]
struct SessionData {
    record: Option<SessionRecord>,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
}

/// In-memory backend implementation.
///
/// Useful for development and tests.
/// Data is lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    sessions: RwLock<HashMap<String, SessionData>>,
}

impl MemoryBackend {
    /// Create a new in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages persisted for a session.
    #[must_use]
    pub fn message_count(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .map(|s| s.get(session_id).map_or(0, |d| d.messages.len()))
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageBackend for MemoryBackend {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        self.sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .entry(session.session_id.clone())
            .or_default()
            .record = Some(session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(session_id)
            .and_then(|d| d.record.clone()))
    }

    async fn write_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        let id = require_id(message)?;

        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        let data = sessions.entry(session_id.to_string()).or_default();
        if !data.ids.insert(id.to_string()) {
            tracing::debug!(%session_id, message_id = %id, "Message already stored");
            return Ok(());
        }
        data.messages.push(message.clone());
        if let Some(record) = data.record.as_mut() {
            record.updated_at = now_millis();
        }

        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        Ok(self
            .sessions
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(session_id)
            .map(|d| d.messages.clone())
            .unwrap_or_default())
    }
}
