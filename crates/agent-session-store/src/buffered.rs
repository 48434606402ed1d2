//! Turn-buffered message store.
//!
//! Messages appended during a turn are held in memory and written to the
//! backend when the turn is flushed, one write per message in append order.
//!
//! # Read consistency
//!
//! [`list_messages`](MessageStore::list_messages) and
//! [`get_session`](MessageStore::get_session) read from the backend only.
//! Buffered messages are not visible until flushed.

use std::{
    collections::VecDeque,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use agent_session_core::{
    Message, MessageBackend, MessageId, MessageStore, SessionId, SessionRecord, StoreError,
    settings::DEFAULT_BUFFER_WARN_THRESHOLD,
};
use async_trait::async_trait;

use crate::identity::{IdGenerator, UuidGenerator};

/// Store that batches writes per conversational turn.
pub struct TurnBufferedStore<B> {
    backend: B,
    session_id: SessionId,
    buffer: Mutex<VecDeque<Message>>,
    // Fair lock: turns flush in the order they asked to.
    flush_lock: tokio::sync::Mutex<()>,
    flush_timeout: Option<Duration>,
    warn_threshold: usize,
    over_threshold: AtomicBool,
}

impl<B: MessageBackend> TurnBufferedStore<B> {
    /// Create a buffered store for one session.
    pub fn new(backend: B, session_id: impl Into<SessionId>) -> Self {
        Self {
            backend,
            session_id: session_id.into(),
            buffer: Mutex::new(VecDeque::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_timeout: None,
            warn_threshold: DEFAULT_BUFFER_WARN_THRESHOLD,
            over_threshold: AtomicBool::new(false),
        }
    }

    /// Default timeout applied by [`flush`](MessageStore::flush).
    #[must_use]
    pub fn with_flush_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.flush_timeout = timeout;
        self
    }

    /// Buffered message count above which a warning is logged.
    #[must_use]
    pub fn with_warn_threshold(mut self, threshold: usize) -> Self {
        self.warn_threshold = threshold;
        self
    }

    /// The wrapped backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Number of messages awaiting flush.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.lock().map_or(0, |b| b.len())
    }

    /// Snapshot of messages awaiting flush, in append order.
    #[must_use]
    pub fn pending(&self) -> Vec<Message> {
        self.buffer
            .lock()
            .map(|b| b.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock_buffer(&self) -> Result<MutexGuard<'_, VecDeque<Message>>, StoreError> {
        self.buffer
            .lock()
            .map_err(|e| StoreError::Internal(e.to_string()))
    }

    fn timed_out(&self) -> StoreError {
        let pending = self.pending_len();
        tracing::warn!(
            session_id = %self.session_id,
            pending,
            "Flush timed out; messages kept for retry"
        );
        StoreError::FlushTimeout { pending }
    }

    /// Flush with an explicit timeout.
    ///
    /// The timeout covers waiting behind earlier flushes as well as the
    /// writes themselves. Only messages buffered when the flush starts are
    /// written. On failure or timeout the unwritten messages stay buffered,
    /// in order, for a later retry. Backend writes are idempotent on message
    /// id, so a retry of a write that landed without being acknowledged does
    /// not store it twice.
    ///
    /// # Errors
    /// Returns the first backend error, or `FlushTimeout`.
    pub async fn flush_with_timeout(&self, timeout: Option<Duration>) -> Result<(), StoreError> {
        let deadline = timeout.map(|t| tokio::time::Instant::now() + t);

        let _turn = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.flush_lock.lock())
                .await
                .map_err(|_| self.timed_out())?,
            None => self.flush_lock.lock().await,
        };

        let batch = self.lock_buffer()?.len();
        if batch == 0 {
            return Ok(());
        }

        let started = Instant::now();

        for _ in 0..batch {
            let Some(message) = self.lock_buffer()?.front().cloned() else {
                break;
            };

            let write = self.backend.write_message(&self.session_id, &message);
            let result = match deadline {
                Some(deadline) => tokio::time::timeout_at(deadline, write)
                    .await
                    .map_err(|_| self.timed_out())?,
                None => write.await,
            };

            if let Err(e) = result {
                tracing::warn!(
                    session_id = %self.session_id,
                    pending = self.pending_len(),
                    error = %e,
                    "Flush failed; messages kept for retry"
                );
                return Err(e.into());
            }

            self.lock_buffer()?.pop_front();
        }

        let remaining = self.pending_len();
        if remaining <= self.warn_threshold {
            self.over_threshold.store(false, Ordering::Relaxed);
        }

        tracing::info!(
            session_id = %self.session_id,
            count = batch,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Flushed turn"
        );
        Ok(())
    }
}

#[async_trait]
impl<B: MessageBackend> MessageStore for TurnBufferedStore<B> {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn append(&self, mut message: Message) -> Result<MessageId, StoreError> {
        let id = message
            .id
            .get_or_insert_with(|| UuidGenerator.generate())
            .clone();

        let len = {
            let mut buffer = self.lock_buffer()?;
            buffer.push_back(message);
            buffer.len()
        };

        tracing::debug!(session_id = %self.session_id, message_id = %id, buffered = len, "Buffered message");

        if len > self.warn_threshold && !self.over_threshold.swap(true, Ordering::Relaxed) {
            tracing::warn!(
                session_id = %self.session_id,
                buffered = len,
                threshold = self.warn_threshold,
                "Turn buffer exceeds soft threshold; flush is overdue"
            );
        }

        Ok(id)
    }

    async fn flush(&self) -> Result<(), StoreError> {
        self.flush_with_timeout(self.flush_timeout).await
    }

    async fn list_messages(&self) -> Result<Vec<Message>, StoreError> {
        Ok(self.backend.list_messages(&self.session_id).await?)
    }

    async fn get_session(&self) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.backend.get_session(&self.session_id).await?)
    }
}
