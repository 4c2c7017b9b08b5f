//! File-based conversation cache.
//!
//! One JSON document per conversation, stored as
//! `<dir>/conversations/<id>.json`. Documents are human-inspectable and
//! replaced atomically on every write.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use oi_core::{CacheError, ConversationCache, ConversationId, ConversationRecord, Message};
use tracing::{debug, warn};

/// Minimum length of an id prefix accepted by [`FileCache::find`].
const MIN_PREFIX_LEN: usize = 4;

/// Listing entry for a cached conversation.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub id: ConversationId,
    pub title: String,
    pub api: String,
    pub model: String,
    pub updated_at: DateTime<Utc>,
    pub messages: usize,
}

impl From<&ConversationRecord> for ConversationSummary {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            api: record.api.clone(),
            model: record.model.clone(),
            updated_at: record.updated_at,
            messages: record.messages.len(),
        }
    }
}

pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    /// A cache rooted at `dir`. Nothing is created until the first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.dir.join("conversations")
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, CacheError> {
        let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(CacheError::NotFound(id.to_string()));
        }
        Ok(self.conversations_dir().join(format!("{id}.json")))
    }

    /// Load the full record stored under `id`.
    pub async fn load(&self, id: &str) -> Result<ConversationRecord, CacheError> {
        let path = self.path_for(id)?;
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(id.to_string()));
            }
            Err(e) => {
                return Err(CacheError::Storage(format!(
                    "Failed to read {}: {e}",
                    path.display()
                )));
            }
        };
        serde_json::from_str(&content).map_err(|e| CacheError::Corrupt {
            id: id.to_string(),
            reason: e.to_string(),
        })
    }

    /// Ids of every stored document with its modification time. Nothing
    /// is parsed.
    async fn stored_ids(&self) -> Result<Vec<(String, std::time::SystemTime)>, CacheError> {
        let dir = self.conversations_dir();
        let list_err = |e: std::io::Error| CacheError::Storage(format!("Failed to list {}: {e}", dir.display()));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(list_err(e)),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(list_err)? {
            let Some(id) = conversation_id(&entry.path()) else {
                continue;
            };
            let modified = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .map_err(list_err)?;
            ids.push((id, modified));
        }
        Ok(ids)
    }

    /// Every readable conversation, most recently updated first.
    ///
    /// Unreadable documents are skipped.
    pub async fn list(&self) -> Result<Vec<ConversationSummary>, CacheError> {
        let mut summaries = Vec::new();
        for (id, _) in self.stored_ids().await? {
            match self.load(&id).await {
                Ok(record) => summaries.push(ConversationSummary::from(&record)),
                Err(e) => warn!(id = %id, error = %e, "Skipping unreadable conversation"),
            }
        }

        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    /// The most recently written conversation. Fails if that document
    /// cannot be read rather than falling back to an older one.
    pub async fn latest(&self) -> Result<Option<ConversationSummary>, CacheError> {
        let newest = self
            .stored_ids()
            .await?
            .into_iter()
            .max_by_key(|(_, modified)| *modified);
        match newest {
            Some((id, _)) => Ok(Some(ConversationSummary::from(&self.load(&id).await?))),
            None => Ok(None),
        }
    }

    /// Resolve a user-supplied reference: an exact id, a unique id prefix,
    /// or a title (the most recent conversation with that title wins).
    ///
    /// A reference that names a stored document by id or prefix fails when
    /// that document is unreadable.
    pub async fn find(&self, reference: &str) -> Result<ConversationSummary, CacheError> {
        match self.load(reference).await {
            Ok(record) => return Ok(ConversationSummary::from(&record)),
            Err(CacheError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if reference.len() >= MIN_PREFIX_LEN {
            let ids = self.stored_ids().await?;
            let mut by_prefix = ids.iter().filter(|(id, _)| id.starts_with(reference));
            if let Some((first, _)) = by_prefix.next() {
                if by_prefix.next().is_some() {
                    return Err(CacheError::Ambiguous(reference.to_string()));
                }
                return Ok(ConversationSummary::from(&self.load(first).await?));
            }
        }

        self.list()
            .await?
            .into_iter()
            .find(|s| s.title == reference)
            .ok_or_else(|| CacheError::NotFound(reference.to_string()))
    }

    /// Remove a conversation. Returns whether anything was deleted.
    pub async fn delete(&self, id: &str) -> Result<bool, CacheError> {
        let path = self.path_for(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(id = %id, "Deleted conversation");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::Storage(format!(
                "Failed to delete {}: {e}",
                path.display()
            ))),
        }
    }
}

fn conversation_id(path: &Path) -> Option<String> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str().map(str::to_string)
}

#[async_trait]
impl ConversationCache for FileCache {
    async fn read(&self, id: &str) -> Result<Vec<Message>, CacheError> {
        let record = self.load(id).await?;
        debug!(id = %id, messages = record.messages.len(), "Loaded conversation");
        Ok(record.messages)
    }

    async fn write(
        &self,
        id: &str,
        title: &str,
        api: &str,
        model: &str,
        history: &[Message],
    ) -> Result<(), CacheError> {
        let path = self.path_for(id)?;

        // Continuing without --title keeps the original title.
        let title = if title.is_empty() {
            match self.load(id).await {
                Ok(existing) => existing.title,
                Err(_) => String::new(),
            }
        } else {
            title.to_string()
        };

        let record = ConversationRecord {
            id: ConversationId::from(id),
            title,
            api: api.to_string(),
            model: model.to_string(),
            updated_at: Utc::now(),
            messages: history.to_vec(),
        };
        let content = serde_json::to_string_pretty(&record)
            .map_err(|e| CacheError::Storage(format!("Failed to serialize conversation: {e}")))?;

        let dir = self.conversations_dir();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            CacheError::Storage(format!("Failed to create cache directory: {e}"))
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to write conversation: {e}")))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CacheError::Storage(format!("Failed to write conversation: {e}")))?;

        debug!(id = %id, messages = history.len(), "Saved conversation");
        Ok(())
    }
}
