//! Turn setup: build the history that seeds a turn's first request.

use std::collections::BTreeMap;

use oi_config::{AppConfig, ResolvedModel};
use oi_core::cache::ConversationCache;
use oi_core::error::{Error, Result};
use oi_core::message::Message;
use tracing::debug;

/// Input limit used when no model limit is configured.
pub const DEFAULT_MAX_CHARS: usize = 12_250;

/// Everything needed to turn new input into a history.
#[derive(Debug, Clone)]
pub struct TurnSetup {
    /// Conversation to continue. Ignored when `no_cache` is set.
    pub read_id: Option<String>,
    pub no_cache: bool,
    /// System message placed first in a new conversation.
    pub format_instruction: Option<String>,
    pub role: Option<String>,
    pub roles: BTreeMap<String, Vec<String>>,
    /// Text placed before the piped content, usually the prompt arguments.
    pub prefix: String,
    pub max_chars: usize,
    pub no_limit: bool,
}

impl Default for TurnSetup {
    fn default() -> Self {
        Self {
            read_id: None,
            no_cache: false,
            format_instruction: None,
            role: None,
            roles: BTreeMap::new(),
            prefix: String::new(),
            max_chars: DEFAULT_MAX_CHARS,
            no_limit: false,
        }
    }
}

impl TurnSetup {
    pub fn from_config(config: &AppConfig, model: &ResolvedModel) -> Self {
        Self {
            read_id: None,
            no_cache: config.no_cache,
            format_instruction: config.format_instruction().map(str::to_string),
            role: config.role.clone(),
            roles: config.roles.clone(),
            prefix: String::new(),
            max_chars: model.max_input_chars,
            no_limit: config.no_limit,
        }
    }

    pub fn with_read_id(mut self, id: impl Into<String>) -> Self {
        self.read_id = Some(id.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Build the history for `content`.
    ///
    /// A continued conversation keeps its stored history untouched; only a
    /// new one gets the format instruction and role messages. A failed
    /// cache read is an error, never an empty history.
    pub async fn build(&self, cache: Option<&dyn ConversationCache>, content: &str) -> Result<Vec<Message>> {
        let mut history = Vec::new();
        if !self.no_cache
            && let Some(id) = &self.read_id
            && let Some(cache) = cache
        {
            history = cache.read(id).await.map_err(Error::CacheRead)?;
            debug!(id = %id, messages = history.len(), "Continuing conversation");
        }

        if history.is_empty() {
            if let Some(text) = &self.format_instruction {
                history.push(Message::system(text.clone()));
            }
            if let Some(role) = &self.role {
                let sources = self
                    .roles
                    .get(role)
                    .ok_or_else(|| Error::RoleNotFound(role.clone()))?;
                for source in sources {
                    history.push(Message::system(load_role_message(source).await?));
                }
            }
        }

        let content = if self.prefix.is_empty() {
            content.to_string()
        } else {
            format!("{}\n\n{content}", self.prefix).trim().to_string()
        };

        let content = if self.no_limit {
            content
        } else {
            truncate_chars(&content, self.max_chars).to_string()
        };

        history.push(Message::user(content));
        Ok(history)
    }
}

/// Resolve one role entry: `file://` paths and `http(s)://` URLs are
/// loaded, anything else is literal text.
pub async fn load_role_message(source: &str) -> Result<String> {
    let load_error = |reason: String| Error::RoleLoad {
        source_ref: source.to_string(),
        reason,
    };

    if let Some(path) = source.strip_prefix("file://") {
        return tokio::fs::read_to_string(path)
            .await
            .map_err(|e| load_error(e.to_string()));
    }

    if source.starts_with("http://") || source.starts_with("https://") {
        let response = reqwest::get(source)
            .await
            .map_err(|e| load_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(load_error(format!("HTTP {status}")));
        }
        return response.text().await.map_err(|e| load_error(e.to_string()));
    }

    Ok(source.to_string())
}

/// The first `limit` characters of `content`, never splitting one.
pub fn truncate_chars(content: &str, limit: usize) -> &str {
    match content.char_indices().nth(limit) {
        Some((end, _)) => &content[..end],
        None => content,
    }
}
