//! Local file-backed message backend.
//!
//! Each session has a JSON record at `<base_dir>/<session_id>.json` and an
//! append-only message log at `<base_dir>/<session_id>.jsonl`, one message
//! per line.

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    time::UNIX_EPOCH,
};

use agent_session_core::{
    Message, MessageBackend, MessageId, SessionId, SessionRecord, StorageError,
    traits::require_id,
};
use async_trait::async_trait;
use tokio::{io::AsyncWriteExt, sync::Mutex};

/// File store backend for local deployments.
pub struct FileBackend {
    base_path: PathBuf,
    // Serializes writes. A session missing from the map is re-read from disk.
    indexes: Mutex<HashMap<SessionId, HashSet<MessageId>>>,
}

impl FileBackend {
    /// Create a file backend rooted at `base_path`. The directory is created lazily.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            indexes: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of the store.
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, session_id: &str) -> Result<PathBuf, StorageError> {
        validate_session_id(session_id)?;
        Ok(self.base_path.join(format!("{session_id}.json")))
    }

    fn log_path(&self, session_id: &str) -> Result<PathBuf, StorageError> {
        validate_session_id(session_id)?;
        Ok(self.base_path.join(format!("{session_id}.jsonl")))
    }

    async fn ensure_base_dir(&self) -> Result<(), StorageError> {
        if !tokio::fs::try_exists(&self.base_path).await? {
            tokio::fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    async fn read_log(&self, session_id: &str) -> Result<Option<String>, StorageError> {
        let path = self.log_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        Ok(Some(tokio::fs::read_to_string(&path).await?))
    }

    /// Ids stored in a session's log. A torn last line is cut off so the
    /// next append starts on a clean line.
    async fn load_index(&self, session_id: &str) -> Result<HashSet<MessageId>, StorageError> {
        let Some(content) = self.read_log(session_id).await? else {
            return Ok(HashSet::new());
        };
        let ids = parse_log(session_id, &content)?
            .into_iter()
            .filter_map(|m| m.id)
            .collect();

        if !content.is_empty() && !content.ends_with('\n') {
            let valid_len = content.rfind('\n').map_or(0, |i| i + 1);
            let file = tokio::fs::OpenOptions::new()
                .write(true)
                .open(self.log_path(session_id)?)
                .await?;
            file.set_len(u64::try_from(valid_len).unwrap_or(u64::MAX)).await?;
            file.sync_data().await?;
            tracing::warn!(%session_id, "Truncated torn message log");
        }
        Ok(ids)
    }

    async fn append_line(&self, session_id: &str, line: &[u8]) -> Result<(), StorageError> {
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(session_id)?)
            .await?;
        file.write_all(line).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn save_record(&self, record: &SessionRecord) -> Result<(), StorageError> {
        let path = self.record_path(&record.session_id)?;
        self.ensure_base_dir().await?;
        let content = serde_json::to_string_pretty(record)?;

        let tmp_path = self.base_path.join(format!(
            ".{}.{}.tmp",
            record.session_id,
            uuid::Uuid::new_v4().simple()
        ));

        let write_result = async {
            let mut file = tokio::fs::File::create(&tmp_path).await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&tmp_path, &path).await
        }
        .await;

        if let Err(e) = write_result {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(e));
        }
        Ok(())
    }

    /// Last modification of the message log, in epoch milliseconds.
    async fn log_modified_millis(&self, session_id: &str) -> Result<Option<i64>, StorageError> {
        let path = self.log_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let modified = tokio::fs::metadata(&path).await?.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .ok()
            .and_then(|d| i64::try_from(d.as_millis()).ok()))
    }
}

/// Parse a message log. A final line cut short by a crash is skipped.
fn parse_log(session_id: &str, content: &str) -> Result<Vec<Message>, StorageError> {
    let lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).collect();
    let mut messages = Vec::with_capacity(lines.len());
    for (i, line) in lines.iter().enumerate() {
        match serde_json::from_str(line) {
            Ok(message) => messages.push(message),
            Err(e) if i + 1 == lines.len() && !content.ends_with('\n') => {
                tracing::warn!(%session_id, error = %e, "Skipping torn last line of message log");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(messages)
}

/// Reject ids that are unsafe as file names.
fn validate_session_id(session_id: &str) -> Result<(), StorageError> {
    if session_id.is_empty() {
        return Err(StorageError::InvalidId(
            "session id cannot be empty".to_string(),
        ));
    }
    if session_id.contains('/')
        || session_id.contains('\\')
        || session_id.contains("..")
        || session_id.chars().any(char::is_control)
    {
        return Err(StorageError::InvalidId(format!(
            "session id contains invalid characters: {session_id:?}"
        )));
    }
    Ok(())
}

#[async_trait]
impl MessageBackend for FileBackend {
    async fn create_session(&self, session: &SessionRecord) -> Result<(), StorageError> {
        let _guard = self.indexes.lock().await;
        self.save_record(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StorageError> {
        let path = self.record_path(session_id)?;
        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let content = tokio::fs::read_to_string(&path).await?;
        let mut record: SessionRecord = serde_json::from_str(&content)?;
        if let Some(modified) = self.log_modified_millis(session_id).await? {
            record.updated_at = record.updated_at.max(modified);
        }
        Ok(Some(record))
    }

    async fn write_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        let id = require_id(message)?;
        let mut indexes = self.indexes.lock().await;

        // Taken out while the append is in flight; an interrupted append
        // forces a re-read from disk on the next write.
        let mut index = match indexes.remove(session_id) {
            Some(index) => index,
            None => self.load_index(session_id).await?,
        };

        if index.contains(id) {
            tracing::debug!(%session_id, message_id = %id, "Message already stored");
            indexes.insert(session_id.to_string(), index);
            return Ok(());
        }

        let mut line = serde_json::to_vec(message)?;
        line.push(b'\n');

        self.ensure_base_dir().await?;
        self.append_line(session_id, &line).await?;

        index.insert(id.to_string());
        indexes.insert(session_id.to_string(), index);
        Ok(())
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        match self.read_log(session_id).await? {
            Some(content) => parse_log(session_id, &content),
            None => Ok(Vec::new()),
        }
    }
}
