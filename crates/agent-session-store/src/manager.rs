//! Session manager for composing per-session stores.

use std::{collections::HashMap, sync::Arc, time::Duration};

use agent_session_core::{
    CancelFlag, ConfigError, MessageBackend, SessionConfig, SessionId, SessionRecord,
    StorageError, StorageMode, StoreError, resolve_backend, settings::DEFAULT_BUFFER_WARN_THRESHOLD,
};
use agent_session_hooks::CancellationHook;
use tokio::sync::RwLock;

use crate::{
    buffered::TurnBufferedStore,
    identity::IdentityInjectingStore,
    storage::{MemoryClient, open_backend},
};

/// The composed store handed to the agent runtime.
pub type SessionStore = IdentityInjectingStore<TurnBufferedStore<Arc<dyn MessageBackend>>>;

/// Session manager error.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Active session state.
struct ActiveSession {
    store: Arc<SessionStore>,
    cancel: CancelFlag,
    record: SessionRecord,
}

/// Handle to an open session.
#[derive(Clone)]
pub struct SessionHandle {
    store: Arc<SessionStore>,
    cancel: CancelFlag,
    record: SessionRecord,
}

impl SessionHandle {
    /// Store for appends, flushes and id pre-generation.
    #[must_use]
    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Session metadata as of open.
    #[must_use]
    pub const fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// The session's stop flag.
    #[must_use]
    pub const fn cancel_flag(&self) -> &CancelFlag {
        &self.cancel
    }

    /// Cancellation hook bound to this session.
    #[must_use]
    pub fn cancellation_hook(&self) -> CancellationHook {
        CancellationHook::new(self.record.session_id.clone(), self.cancel.clone())
    }
}

/// Session manager for orchestrating session persistence.
pub struct SessionManager {
    backend: Arc<dyn MessageBackend>,
    mode: StorageMode,
    flush_timeout: Option<Duration>,
    warn_threshold: usize,
    active_sessions: RwLock<HashMap<SessionId, ActiveSession>>,
}

impl SessionManager {
    /// Create a manager over an already-opened backend.
    #[must_use]
    pub fn new(backend: Arc<dyn MessageBackend>, mode: StorageMode) -> Self {
        Self {
            backend,
            mode,
            flush_timeout: None,
            warn_threshold: DEFAULT_BUFFER_WARN_THRESHOLD,
            active_sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve and open the configured backend.
    ///
    /// # Errors
    /// Returns a configuration error if the backend cannot be resolved.
    pub fn from_config(
        config: &SessionConfig,
        remote_client: Option<Arc<dyn MemoryClient>>,
    ) -> Result<Self, ManagerError> {
        let descriptor = resolve_backend(config)?;
        let backend = open_backend(&descriptor, remote_client)?;
        Ok(Self::new(backend, descriptor.mode())
            .with_flush_timeout(config.flush_timeout())
            .with_warn_threshold(config.buffer_warn_threshold))
    }

    /// Default flush timeout for new sessions.
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Buffer warning threshold for new sessions.
    #[must_use]
    pub fn with_warn_threshold(mut self, threshold: usize) -> Self {
        self.warn_threshold = threshold;
        self
    }

    /// Storage mode of the backend.
    #[must_use]
    pub const fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Open or resume a session.
    ///
    /// Creates the session record on first use. A session that is already
    /// active returns its existing handle.
    ///
    /// # Errors
    /// Returns error if the backend cannot be read or written.
    pub async fn open_session(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<SessionHandle, ManagerError> {
        let mut sessions = self.active_sessions.write().await;
        if let Some(active) = sessions.get(session_id) {
            return Ok(SessionHandle {
                store: Arc::clone(&active.store),
                cancel: active.cancel.clone(),
                record: active.record.clone(),
            });
        }

        let (record, stored_ids) =
            if let Some(existing) = self.backend.get_session(session_id).await? {
                let stored_ids: Vec<_> = self
                    .backend
                    .list_messages(session_id)
                    .await?
                    .into_iter()
                    .filter_map(|m| m.id)
                    .collect();
                tracing::info!(%session_id, messages = stored_ids.len(), "Resuming session");
                (existing, stored_ids)
            } else {
                let record = SessionRecord::new(session_id, user_id, self.mode);
                self.backend.create_session(&record).await?;
                tracing::info!(%session_id, %user_id, mode = ?self.mode, "Created session");
                (record, Vec::new())
            };

        let buffered = TurnBufferedStore::new(Arc::clone(&self.backend), session_id)
            .with_flush_timeout(self.flush_timeout)
            .with_warn_threshold(self.warn_threshold);
        let store = Arc::new(IdentityInjectingStore::new(buffered).with_known_ids(stored_ids));
        let cancel = CancelFlag::new();

        sessions.insert(
            session_id.to_string(),
            ActiveSession {
                store: Arc::clone(&store),
                cancel: cancel.clone(),
                record: record.clone(),
            },
        );

        Ok(SessionHandle {
            store,
            cancel,
            record,
        })
    }

    /// Get the store of an active session.
    pub async fn get_store(&self, session_id: &str) -> Option<Arc<SessionStore>> {
        self.active_sessions
            .read()
            .await
            .get(session_id)
            .map(|s| Arc::clone(&s.store))
    }

    /// Mark a session stopped. Returns `false` if it is not active.
    ///
    /// The flag stays set, vetoing every later tool call of the session,
    /// until [`resume_session`](Self::resume_session) clears it or the
    /// session is closed.
    pub async fn stop_session(&self, session_id: &str) -> bool {
        let sessions = self.active_sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            session.cancel.cancel();
            tracing::info!(%session_id, "Session stop requested");
            true
        } else {
            false
        }
    }

    /// Clear a stop request so the next turn can run tools again. Returns
    /// `false` if the session is not active.
    pub async fn resume_session(&self, session_id: &str) -> bool {
        let sessions = self.active_sessions.read().await;
        if let Some(session) = sessions.get(session_id) {
            session.cancel.reset();
            tracing::info!(%session_id, "Session stop cleared");
            true
        } else {
            false
        }
    }

    /// Cancellation hook bound to an active session.
    pub async fn cancellation_hook(&self, session_id: &str) -> Option<CancellationHook> {
        self.active_sessions
            .read()
            .await
            .get(session_id)
            .map(|s| CancellationHook::new(session_id, s.cancel.clone()))
    }

    /// Forget an active session. Durable state is kept.
    ///
    /// Unflushed messages of the dropped store are lost unless another
    /// handle still holds it.
    pub async fn close_session(&self, session_id: &str) -> bool {
        let removed = self.active_sessions.write().await.remove(session_id);
        if let Some(session) = &removed {
            let pending = session.store.inner().pending_len();
            if pending > 0 {
                tracing::warn!(%session_id, pending, "Closing session with unflushed messages");
            }
        }
        removed.is_some()
    }
}
