//! Error types for the oi domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all oi operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Stream errors ---
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Cache errors ---
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Reading the history of a continued conversation failed. Never
    /// downgraded to an empty history.
    #[error("Cache read failed: {0}")]
    CacheRead(#[source] CacheError),

    // --- Role errors ---
    #[error("role {0:?} does not exist")]
    RoleNotFound(String),

    #[error("could not load role message {source_ref:?}: {reason}")]
    RoleLoad { source_ref: String, reason: String },

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation cancelled")]
    Cancelled,

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the retry driver may resubmit the turn after this error.
    ///
    /// Only failures of the backend exchange qualify. Setup and
    /// configuration problems cannot be fixed by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Provider(_) | Error::Stream(_))
    }

    /// The human-readable headline printed when the run ends with this error.
    pub fn reason(&self) -> String {
        match self {
            Error::Provider(ProviderError::AuthenticationFailed(_)) => {
                "Authentication with the API failed. Check your API key.".into()
            }
            Error::Provider(_) | Error::Stream(_) => {
                "There was a problem with the API request.".into()
            }
            Error::Tool(_) => "A tool call failed.".into(),
            Error::Cache(_) => "There was a problem with the conversation cache.".into(),
            Error::CacheRead(_) => {
                "There was a problem reading the cache. Use --no-cache / OI_NO_CACHE to disable it."
                    .into()
            }
            Error::RoleNotFound(_) | Error::RoleLoad { .. } => "Could not use role".into(),
            Error::Config { .. } => "Invalid configuration.".into(),
            Error::Serialization(_) => "Could not encode or decode data.".into(),
            Error::Cancelled => "Cancelled.".into(),
            Error::Internal(_) => "Unexpected internal error.".into(),
        }
    }
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Errors observed while draining a [`crate::Stream`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Nothing is buffered yet. Expected while polling, never fatal.
    #[error("no content")]
    NoContent,

    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// The exchange ended without signalling completion of the round.
    #[error("response stream ended before the round completed")]
    Disconnected,
}

impl StreamError {
    /// True for every error except [`StreamError::NoContent`].
    pub fn is_fatal(&self) -> bool {
        !matches!(self, StreamError::NoContent)
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool call cancelled: {0}")]
    Cancelled(String),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Conversation reference {0:?} matches more than one conversation")]
    Ambiguous(String),

    #[error("Conversation {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),
}
