//! Backend contract: what a chat API client must provide to the engine.
//!
//! A [`Backend`] performs one request/response exchange (a round) and
//! pushes every response unit it decodes into a [`DeltaSink`]. The engine
//! owns the receiving half and turns the units into a [`crate::Stream`].
//!
//! Implementations: Ollama native chat API, OpenAI-compatible endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{Message, Role, ToolCall};
use crate::tool::ToolInvoker;

/// Sampling parameters. `None` means "let the backend decide".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A tool definition sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// Everything needed to run one user turn.
///
/// Built once per turn from the loaded history plus the new user message.
/// Tool results are appended across rounds; the history is never reordered.
#[derive(Clone)]
pub struct Request {
    pub model: String,
    pub history: Vec<Message>,
    pub params: SamplingParams,
    pub tools: Vec<ToolDefinition>,
    pub tool_invoker: Arc<dyn ToolInvoker>,
}

impl Request {
    pub fn new(model: impl Into<String>, history: Vec<Message>, tool_invoker: Arc<dyn ToolInvoker>) -> Self {
        let tools = tool_invoker.definitions();
        Self {
            model: model.into(),
            history,
            params: SamplingParams::default(),
            tools,
            tool_invoker,
        }
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    /// The immutable snapshot sent for one round.
    pub fn round(&self, messages: &[Message]) -> RoundRequest {
        RoundRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            params: self.params.clone(),
            tools: self.tools.clone(),
        }
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("model", &self.model)
            .field("history", &self.history.len())
            .field("params", &self.params)
            .field("tools", &self.tools.iter().map(|t| &t.name).collect::<Vec<_>>())
            .finish()
    }
}

/// What a backend receives for a single round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub params: SamplingParams,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

/// One decoded response unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    /// Role of the message being produced, usually only on the first unit.
    pub role: Option<Role>,

    /// Partial content
    pub content: String,

    /// Tool call fragments. Fragments sharing an index are merged.
    pub tool_calls: Vec<ToolCall>,

    /// The backend finished this round.
    pub done: bool,
}

impl Delta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

/// Producer half of a round's bounded delivery channel.
#[derive(Debug, Clone)]
pub struct DeltaSink {
    tx: mpsc::Sender<Result<Delta, ProviderError>>,
}

impl DeltaSink {
    pub fn new(tx: mpsc::Sender<Result<Delta, ProviderError>>) -> Self {
        Self { tx }
    }

    /// A sink with its receiving half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Result<Delta, ProviderError>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Deliver a unit. Returns `false` once the consumer is gone, at which
    /// point the backend should stop reading.
    pub async fn send(&self, delta: Delta) -> bool {
        self.tx.send(Ok(delta)).await.is_ok()
    }

    /// Deliver a fatal error for this round.
    pub async fn fail(&self, error: ProviderError) -> bool {
        self.tx.send(Err(error)).await.is_ok()
    }
}

/// The core Backend trait.
///
/// `exchange` runs on its own task. It must send a unit with `done: true`
/// once the round is complete; returning without one is reported to the
/// consumer as a disconnect. Errors returned from `exchange` are forwarded
/// to the consumer by the engine.
#[async_trait]
pub trait Backend: Send + Sync {
    /// A human-readable name for this backend (e.g., "ollama").
    fn name(&self) -> &str;

    async fn exchange(&self, request: RoundRequest, sink: DeltaSink) -> Result<(), ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::NoTools;

    #[test]
    fn round_snapshot_copies_history() {
        let request = Request::new("llama3.2", vec![Message::user("hi")], Arc::new(NoTools));
        let mut live = request.history.clone();
        let round = request.round(&live);
        live.push(Message::assistant("hello"));
        assert_eq!(round.messages.len(), 1);
        assert_eq!(round.model, "llama3.2");
    }

    #[test]
    fn sampling_params_skip_unset_fields() {
        let params = SamplingParams {
            temperature: Some(0.2),
            ..SamplingParams::default()
        };
        let json = serde_json::to_string(&params).unwrap();
        assert_eq!(json, r#"{"temperature":0.2}"#);
    }

    #[tokio::test]
    async fn sink_reports_dropped_consumer() {
        let (sink, rx) = DeltaSink::channel(1);
        drop(rx);
        assert!(!sink.send(Delta::text("lost")).await);
    }

    #[tokio::test]
    async fn sink_delivers_in_order() {
        let (sink, mut rx) = DeltaSink::channel(4);
        assert!(sink.send(Delta::text("a")).await);
        assert!(sink.fail(ProviderError::Network("reset".into())).await);
        assert_eq!(rx.recv().await.unwrap().unwrap().content, "a");
        assert!(rx.recv().await.unwrap().is_err());
    }
}
