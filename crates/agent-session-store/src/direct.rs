//! Unbuffered store over a raw backend.

use agent_session_core::{
    Message, MessageBackend, MessageId, MessageStore, SessionId, SessionRecord, StoreError,
};
use async_trait::async_trait;

use crate::identity::{IdGenerator, UuidGenerator};

/// Store that writes every append straight to the backend.
///
/// `flush` has nothing to do.
pub struct DirectStore<B> {
    backend: B,
    session_id: SessionId,
}

impl<B: MessageBackend> DirectStore<B> {
    /// Create a direct store for one session.
    pub fn new(backend: B, session_id: impl Into<SessionId>) -> Self {
        Self {
            backend,
            session_id: session_id.into(),
        }
    }
}

#[async_trait]
impl<B: MessageBackend> MessageStore for DirectStore<B> {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn append(&self, mut message: Message) -> Result<MessageId, StoreError> {
        let id = message
            .id
            .get_or_insert_with(|| UuidGenerator.generate())
            .clone();
        self.backend.write_message(&self.session_id, &message).await?;
        Ok(id)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.backend.list_messages(&self.session_id).await?)
    }

    async fn get_session(&self) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.backend.get_session(&self.session_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[tokio::test]
    async fn test_append_is_immediately_visible() {
        let store = DirectStore::new(MemoryBackend::new(), "s-1");
        let id = store.append(Message::user("hello")).await.unwrap();
        let stored = store.list_messages().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id.as_deref(), Some(id.as_str()));
        store.flush().await.unwrap();
        assert_eq!(store.list_messages().await.unwrap().len(), 1);
    }
}
