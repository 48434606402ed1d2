//! Remote memory service backend.
//!
//! The service itself is an external collaborator reached through
//! [`MemoryClient`]. Session records and messages are stored as typed
//! events on the session's event stream.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, RwLock},
};

use agent_session_core::{
    Message, MessageBackend, MessageId, SessionId, SessionRecord, StorageError,
    message::now_millis, traits::require_id,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind of event stored in the memory service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Session,
    Message,
}

/// One event on a session's stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub session_id: String,
    pub kind: EventKind,
    pub payload: Value,
    /// Event timestamp (Unix epoch milliseconds).
    pub timestamp: i64,
}

/// Client for the remote memory service.
///
/// Events are returned in creation order.
#[async_trait]
pub trait MemoryClient: Send + Sync {
    /// Append an event to a session stream.
    async fn create_event(
        &self,
        memory_store_id: &str,
        event: MemoryEvent,
    ) -> Result<(), StorageError>;

    /// All events of a session stream.
    async fn list_events(
        &self,
        memory_store_id: &str,
        session_id: &str,
    ) -> Result<Vec<MemoryEvent>, StorageError>;
}

/// Message ids known to be on the service for one session. `None` until
/// reconciled, and again after a write whose outcome is unknown.
type ConfirmedIds = Arc<tokio::sync::Mutex<Option<HashSet<MessageId>>>>;

/// Backend adapting a [`MemoryClient`] to the message backend contract.
///
/// Message writes are idempotent on message id: a retried write of an
/// event the service already holds is skipped.
pub struct RemoteBackend {
    client: Arc<dyn MemoryClient>,
    memory_store_id: String,
    region: String,
    confirmed: Mutex<HashMap<SessionId, ConfirmedIds>>,
}

impl RemoteBackend {
    /// Create a remote backend for one memory store.
    pub fn new(
        client: Arc<dyn MemoryClient>,
        memory_store_id: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            client,
            memory_store_id: memory_store_id.into(),
            region: region.into(),
            confirmed: Mutex::new(HashMap::new()),
        }
    }

    /// Memory store identifier.
    #[must_use]
    pub fn memory_store_id(&self) -> &str {
        &self.memory_store_id
    }

    /// Region of the memory store.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    async fn events(&self, session_id: &str, kind: EventKind) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .client
            .list_events(&self.memory_store_id, session_id)
            .await?
            .into_iter()
            .filter(|e| e.kind == kind)
            .map(|e| e.payload)
            .collect())
    }

    fn confirmed_ids(&self, session_id: &str) -> Result<ConfirmedIds, StorageError> {
        let mut confirmed = self
            .confirmed
            .lock()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(Arc::clone(
            confirmed.entry(session_id.to_string()).or_default(),
        ))
    }

    async fn stored_ids(&self, session_id: &str) -> Result<HashSet<MessageId>, StorageError> {
        Ok(self
            .list_messages(session_id)
            .await?
            .into_iter()
            .filter_map(|m| m.id)
            .collect())
    }
}

#[async_trait]
impl MessageBackend for RemoteBackend {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let event = MemoryEvent {
            session_id: session.session_id.clone(),
            kind: EventKind::Session,
            payload: serde_json::to_value(session)?,
            timestamp: now_millis(),
        };
        self.client.create_event(&self.memory_store_id, event).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        // Latest session event wins.
        self.events(session_id, EventKind::Session)
            .await?
            .pop()
            .map(serde_json::from_value)
            .transpose()
            .map_err(StorageError::from)
    }

    async fn write_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        let id = require_id(message)?;
        let slot = self.confirmed_ids(session_id)?;
        let mut slot = slot.lock().await;

        let mut ids = match slot.take() {
            Some(ids) => ids,
            None => self.stored_ids(session_id).await?,
        };
        if ids.contains(id) {
            tracing::debug!(%session_id, message_id = %id, "Message already stored");
            *slot = Some(ids);
            return Ok(());
        }

        let event = MemoryEvent {
            session_id: session_id.to_string(),
            kind: EventKind::Message,
            payload: serde_json::to_value(message)?,
            timestamp: message.created_at,
        };
        self.client.create_event(&self.memory_store_id, event).await?;

        ids.insert(id.to_string());
        *slot = Some(ids);
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        self.events(session_id, EventKind::Message)
            .await?
            .into_iter()
            .map(|payload| serde_json::from_value(payload).map_err(StorageError::from))
            .collect()
    }
}

/// Process-local [`MemoryClient`] for tests and demos.
#[derive(Default)]
pub struct InMemoryClient {
    streams: RwLock<HashMap<(String, String), Vec<MemoryEvent>>>,
}

impl InMemoryClient {
    /// Create an empty client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryClient for InMemoryClient {
    async fn create_event(
        &self,
        memory_store_id: &str,
        event: MemoryEvent,
    ) -> Result<(), StorageError> {
        self.streams
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .entry((memory_store_id.to_string(), event.session_id.clone()))
            .or_default()
            .push(event);
        Ok(())
    }

    async fn list_events(
        &self,
        memory_store_id: &str,
        session_id: &str,
    ) -> Result<Vec<MemoryEvent>, StorageError> {
        Ok(self
            .streams
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?
            .get(&(memory_store_id.to_string(), session_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_session_core::StorageMode;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Client whose service stores events but can lose the acknowledgement.
    #[derive(Default)]
    struct LossyAckClient {
        inner: InMemoryClient,
        lose_next_ack: AtomicBool,
        lists: AtomicUsize,
    }

    #[async_trait]
    impl MemoryClient for LossyAckClient {
        async fn create_event(&self, store: &str, event: MemoryEvent) -> Result<(), StorageError> {
            self.inner.create_event(store, event).await?;
            if self.lose_next_ack.swap(false, Ordering::SeqCst) {
                return Err(StorageError::Remote("connection reset".into()));
            }
            Ok(())
        }

        async fn list_events(
            &self,
            store: &str,
            session_id: &str,
        ) -> Result<Vec<MemoryEvent>, StorageError> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            self.inner.list_events(store, session_id).await
        }
    }

    fn backend(client: &Arc<InMemoryClient>, store: &str) -> RemoteBackend {
        RemoteBackend::new(Arc::clone(client) as Arc<dyn MemoryClient>, store, "r-1")
    }

    #[tokio::test]
    async fn test_messages_and_session_are_separate_streams() {
        let client = Arc::new(InMemoryClient::new());
        let backend = backend(&client, "m-1");

        backend
            .create_session(&SessionRecord::new("s-1", "u-1", StorageMode::Remote))
            .await
            .unwrap();
        backend
            .write_message("s-1", &Message::user("q").with_id("a"))
            .await
            .unwrap();
        backend
            .write_message("s-1", &Message::assistant("r").with_id("b"))
            .await
            .unwrap();

        let ids: Vec<_> = backend
            .list_messages("s-1")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();
        assert_eq!(ids, ["a", "b"]);

        let record = backend.get_session("s-1").await.unwrap().unwrap();
        assert_eq!(record.storage_mode, StorageMode::Remote);
        assert_eq!(client.list_events("m-1", "s-1").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_memory_stores_are_isolated() {
        let client = Arc::new(InMemoryClient::new());
        backend(&client, "m-1")
            .write_message("s-1", &Message::user("q").with_id("a"))
            .await
            .unwrap();

        let other = backend(&client, "m-2");
        assert!(other.list_messages("s-1").await.unwrap().is_empty());
        assert!(other.get_session("s-1").await.unwrap().is_none());
        assert_eq!(other.memory_store_id(), "m-2");
        assert_eq!(other.region(), "r-1");
    }

    #[tokio::test]
    async fn test_retry_after_lost_ack_stores_once() {
        let client = Arc::new(LossyAckClient::default());
        let backend = RemoteBackend::new(Arc::clone(&client) as Arc<dyn MemoryClient>, "m-1", "r-1");
        let message = Message::assistant("answer").with_id("a");

        client.lose_next_ack.store(true, Ordering::SeqCst);
        let err = backend.write_message("s-1", &message).await.unwrap_err();
        assert!(err.is_transient());

        backend.write_message("s-1", &message).await.unwrap();
        let ids: Vec<_> = backend
            .list_messages("s-1")
            .await
            .unwrap()
            .into_iter()
            .filter_map(|m| m.id)
            .collect();
        assert_eq!(ids, ["a"]);
    }

    #[tokio::test]
    async fn test_confirmed_writes_do_not_relist() {
        let client = Arc::new(LossyAckClient::default());
        let backend = RemoteBackend::new(Arc::clone(&client) as Arc<dyn MemoryClient>, "m-1", "r-1");
        for id in ["a", "b", "c"] {
            backend
                .write_message("s-1", &Message::user(id).with_id(id))
                .await
                .unwrap();
        }
        // Only the first write reconciles with the service.
        assert_eq!(client.lists.load(Ordering::SeqCst), 1);
    }
}
