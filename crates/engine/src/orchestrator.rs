//! The completion orchestrator: drive one stream through every round of a
//! turn.

use oi_core::error::{Error, Result, StreamError};
use oi_core::message::Message;
use oi_core::provider::Request;
use oi_core::stream::{Client, ToolCallStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Where visible output goes. Fragments arrive in order.
pub trait RenderSink: Send {
    fn push(&mut self, text: &str);

    /// Report a finished tool call. Renders its text by default.
    fn tool_status(&mut self, status: &ToolCallStatus) {
        self.push(&status.to_string());
    }
}

impl RenderSink for String {
    fn push(&mut self, text: &str) {
        self.push_str(text);
    }
}

/// Every cancellation handle of a run, cancelled together on shutdown.
///
/// Handles are children of one root, so cancelling the set reaches every
/// exchange and tool call still running.
#[derive(Debug, Clone, Default)]
pub struct CancelSet {
    root: CancellationToken,
}

impl CancelSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> CancellationToken {
        self.root.child_token()
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.root.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.root.cancelled().await;
    }
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// Everything rendered, in order, across all rounds.
    pub text: String,
    /// The final history: the request history plus every assistant and
    /// tool message of the turn.
    pub messages: Vec<Message>,
    pub tool_statuses: Vec<ToolCallStatus>,
}

/// Drives a single turn over a [`Client`].
pub struct Completion<'a> {
    client: &'a dyn Client,
    cancel: CancellationToken,
}

impl<'a> Completion<'a> {
    pub fn new(client: &'a dyn Client, cancel: CancellationToken) -> Self {
        Self { client, cancel }
    }

    /// Run `request` to completion, rendering into `sink`.
    ///
    /// Already rendered text stays in the sink when the turn fails.
    pub async fn drive(&self, request: Request, sink: &mut dyn RenderSink) -> Result<TurnOutcome> {
        info!(model = %request.model, messages = request.history.len(), "Starting turn");

        let mut stream = self.client.open(request, self.cancel.clone());
        let mut text = String::new();
        let mut tool_statuses = Vec::new();

        loop {
            while stream.next() {
                match stream.current() {
                    Ok(chunk) => {
                        if !chunk.is_empty() {
                            sink.push(&chunk.content);
                            text.push_str(&chunk.content);
                        }
                    }
                    Err(StreamError::NoContent) => {
                        let cancelled = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => true,
                            _ = stream.wait() => false,
                        };
                        if cancelled {
                            stream.close();
                            return Err(Error::Cancelled);
                        }
                    }
                    Err(e) => {
                        stream.close();
                        return Err(self.failure(e));
                    }
                }
            }

            if let Some(e) = stream.err().cloned() {
                stream.close();
                return Err(self.failure(e));
            }

            let statuses = stream.call_tools().await;
            if self.cancel.is_cancelled() {
                stream.close();
                return Err(Error::Cancelled);
            }
            if statuses.is_empty() {
                break;
            }

            debug!(tool_count = statuses.len(), "Tool round finished, continuing");
            for status in &statuses {
                sink.tool_status(status);
            }
            tool_statuses.extend(statuses);
        }

        let messages = stream.into_messages();
        info!(messages = messages.len(), tools = tool_statuses.len(), "Turn complete");
        Ok(TurnOutcome {
            text,
            messages,
            tool_statuses,
        })
    }

    /// A cancelled exchange drops its sink, which the stream reports as a
    /// disconnect. That is still a cancellation.
    fn failure(&self, error: StreamError) -> Error {
        if self.cancel.is_cancelled() {
            return Error::Cancelled;
        }
        stream_failure(error)
    }
}

fn stream_failure(error: StreamError) -> Error {
    match error {
        StreamError::Provider(e) => Error::Provider(e),
        other => Error::Stream(other),
    }
}
