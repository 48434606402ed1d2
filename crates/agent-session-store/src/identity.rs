//! Identity-injecting store wrapper.
//!
//! Mints message identifiers ahead of persistence so they can be handed to
//! a client (e.g. in a stream-start notification) before the message body
//! exists.

use std::{
    collections::HashSet,
    sync::{Mutex, MutexGuard},
};

use agent_session_core::{Message, MessageId, MessageStore, SessionRecord, StoreError};
use async_trait::async_trait;

/// Source of fresh message identifiers.
pub trait IdGenerator: Send + Sync {
    /// Produce a new identifier.
    fn generate(&self) -> MessageId;
}

/// UUID v4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> MessageId {
        uuid::Uuid::new_v4().to_string()
    }
}

#[derive(Default)]
struct IdState {
    pending: Option<MessageId>,
    current: Option<MessageId>,
    history: Vec<MessageId>,
    seen: HashSet<MessageId>,
}

/// Wrapper that assigns identifiers before the inner store sees a message.
pub struct IdentityInjectingStore<S> {
    inner: S,
    generator: Box<dyn IdGenerator>,
    state: Mutex<IdState>,
}

impl<S: MessageStore> IdentityInjectingStore<S> {
    /// Wrap a store using UUID v4 identifiers.
    pub fn new(inner: S) -> Self {
        Self::with_generator(inner, UuidGenerator)
    }

    /// Wrap a store with a custom identifier source.
    pub fn with_generator(inner: S, generator: impl IdGenerator + 'static) -> Self {
        Self {
            inner,
            generator: Box::new(generator),
            state: Mutex::new(IdState::default()),
        }
    }

    /// Treat `ids` as already used, e.g. the messages of a resumed session.
    #[must_use]
    pub fn with_known_ids(mut self, ids: impl IntoIterator<Item = MessageId>) -> Self {
        if let Ok(state) = self.state.get_mut() {
            state.seen.extend(ids);
        }
        self
    }

    /// Whether `id` has been used in this session.
    #[must_use]
    pub fn has_seen(&self, id: &str) -> bool {
        self.state.lock().is_ok_and(|s| s.seen.contains(id))
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.inner
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, IdState>, StoreError> {
        self.state
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    fn mint(&self, state: &IdState) -> Result<MessageId, StoreError> {
        let id = self.generator.generate();
        if state.seen.contains(&id) || state.pending.as_ref() == Some(&id) {
            tracing::error!(
                session_id = %self.inner.session_id(),
                message_id = %id,
                "Generated a duplicate message identifier"
            );
            return Err(StoreError::IdentifierCollision(id));
        }
        Ok(id)
    }

    /// Identifier the next appended message will receive.
    ///
    /// Repeated calls return the same value until an append consumes it.
    /// An identifier that is never consumed is dropped with the session.
    ///
    /// # Errors
    /// Returns `IdentifierCollision` if the generator repeats itself.
    pub fn peek_next_id(&self) -> Result<MessageId, StoreError> {
        let mut state = self.lock_state()?;
        if let Some(id) = &state.pending {
            return Ok(id.clone());
        }
        let id = self.mint(&state)?;
        state.pending = Some(id.clone());
        Ok(id)
    }

    /// Identifier of the most recently appended message.
    #[must_use]
    pub fn current_id(&self) -> Option<MessageId> {
        self.state.lock().ok().and_then(|s| s.current.clone())
    }

    /// Every identifier consumed by an append, oldest first.
    #[must_use]
    pub fn id_history(&self) -> Vec<MessageId> {
        self.state
            .lock()
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    fn consume(&self) -> Result<MessageId, StoreError> {
        let mut state = self.lock_state()?;
        let id = match state.pending.take() {
            Some(id) => id,
            None => self.mint(&state)?,
        };
        state.seen.insert(id.clone());
        state.history.push(id.clone());
        state.current = Some(id.clone());
        Ok(id)
    }
}

#[async_trait]
impl<S: MessageStore> MessageStore for IdentityInjectingStore<S> {
    fn session_id(&self) -> &str {
        self.inner.session_id()
    }

    async fn append(&self, mut message: Message) -> Result<MessageId, StoreError> {
        let id = self.consume()?;
        if let Some(previous) = message.id.replace(id.clone()) {
            tracing::warn!(
                session_id = %self.inner.session_id(),
                %previous,
                message_id = %id,
                "Replacing caller-supplied message id"
            );
        }
        // The id stays consumed even if the inner append fails.
        self.inner.append(message).await
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.inner.flush().await
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StoreError> {
        self.inner.list_messages().await
    }

    async fn get_session(&self) -> Result<Option<SessionRecord>, StoreError> {
        self.inner.get_session().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{buffered::TurnBufferedStore, direct::DirectStore, storage::MemoryBackend};
    use agent_session_core::{MessageBackend, StorageMode};
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    /// Generator cycling through a fixed list.
    struct ScriptedGenerator {
        ids: Vec<&'static str>,
        next: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(ids: Vec<&'static str>) -> Self {
            Self {
                ids,
                next: AtomicUsize::new(0),
            }
        }
    }

    impl IdGenerator for ScriptedGenerator {
        fn generate(&self) -> MessageId {
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            self.ids[n % self.ids.len()].to_string()
        }
    }

    fn buffered() -> IdentityInjectingStore<TurnBufferedStore<MemoryBackend>> {
        IdentityInjectingStore::new(TurnBufferedStore::new(MemoryBackend::new(), "s-1"))
    }

    #[test]
    fn test_peek_is_stable_until_append() {
        let store = buffered();
        let first = store.peek_next_id().unwrap();
        for _ in 0..5 {
            assert_eq!(store.peek_next_id().unwrap(), first);
        }
        assert!(store.current_id().is_none());
    }

    #[tokio::test]
    async fn test_appended_message_carries_peeked_id() {
        let store = buffered();
        let peeked = store.peek_next_id().unwrap();
        let appended = store.append(Message::assistant("answer")).await.unwrap();
        assert_eq!(appended, peeked);
        assert_eq!(store.current_id(), Some(peeked.clone()));

        store.flush().await.unwrap();
        let stored = store.list_messages().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id.as_deref(), Some(peeked.as_str()));

        // A new peek after the append yields a new id.
        assert_ne!(store.peek_next_id().unwrap(), peeked);
    }

    #[tokio::test]
    async fn test_ids_are_unique_and_recorded_in_order() {
        let store = buffered();
        let mut appended = Vec::new();
        for i in 0..20 {
            if i % 3 == 0 {
                store.peek_next_id().unwrap();
            }
            appended.push(store.append(Message::user(format!("m{i}"))).await.unwrap());
        }

        let unique: HashSet<_> = appended.iter().collect();
        assert_eq!(unique.len(), appended.len());
        assert_eq!(store.id_history(), appended);
    }

    #[tokio::test]
    async fn test_caller_supplied_id_is_replaced() {
        let store = buffered();
        let id = store
            .append(Message::user("x").with_id("from-caller"))
            .await
            .unwrap();
        assert_ne!(id, "from-caller");
        assert_eq!(store.inner().pending()[0].id.as_deref(), Some(id.as_str()));
    }

    #[tokio::test]
    async fn test_collision_is_fatal() {
        let store = IdentityInjectingStore::with_generator(
            TurnBufferedStore::new(MemoryBackend::new(), "s-1"),
            ScriptedGenerator::new(vec!["a", "b", "a"]),
        );
        store.append(Message::user("1")).await.unwrap();
        store.append(Message::user("2")).await.unwrap();

        let err = store.append(Message::user("3")).await.unwrap_err();
        assert!(matches!(err, StoreError::IdentifierCollision(ref id) if id == "a"));
        assert!(!err.is_retryable());
        assert_eq!(store.inner().pending_len(), 2);
    }

    #[tokio::test]
    async fn test_collision_with_previously_stored_id() {
        let store = IdentityInjectingStore::with_generator(
            TurnBufferedStore::new(MemoryBackend::new(), "s-1"),
            ScriptedGenerator::new(vec!["stored", "fresh"]),
        )
        .with_known_ids(["stored".to_string()]);
        assert!(store.has_seen("stored"));

        let err = store.peek_next_id().unwrap_err();
        assert!(matches!(err, StoreError::IdentifierCollision(ref id) if id == "stored"));
        assert_eq!(store.peek_next_id().unwrap(), "fresh");
    }

    #[tokio::test]
    async fn test_read_paths_are_transparent() {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_session(&SessionRecord::new("s-1", "u-1", StorageMode::Local))
            .await
            .unwrap();

        let direct = DirectStore::new(Arc::clone(&backend), "s-1");
        let wrapped = IdentityInjectingStore::new(DirectStore::new(Arc::clone(&backend), "s-1"));
        wrapped.append(Message::user("hello")).await.unwrap();
        wrapped.append(Message::assistant("hi")).await.unwrap();

        let via_wrapper = serde_json::to_vec(&wrapped.list_messages().await.unwrap()).unwrap();
        let via_inner = serde_json::to_vec(&direct.list_messages().await.unwrap()).unwrap();
        assert_eq!(via_wrapper, via_inner);
        assert_eq!(
            wrapped.get_session().await.unwrap(),
            direct.get_session().await.unwrap()
        );
        assert_eq!(wrapped.session_id(), direct.session_id());
    }

    #[tokio::test]
    async fn test_flush_delegates() {
        let store = buffered();
        store.append(Message::user("a")).await.unwrap();
        assert_eq!(store.inner().pending_len(), 1);
        store.flush().await.unwrap();
        assert_eq!(store.inner().pending_len(), 0);
        assert_eq!(store.inner().backend().message_count("s-1"), 1);
    }
}
