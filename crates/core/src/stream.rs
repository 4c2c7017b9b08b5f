//! The pull-based stream contract.
//!
//! A [`Stream`] covers one user turn, however many rounds it takes. The
//! consumer loops `next`/`current` until `next` returns `false`, checks
//! `err`, then calls `call_tools`. An empty status list ends the turn; a
//! non-empty one means the stream already re-opened the exchange and the
//! consumer resumes draining the same object.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{StreamError, ToolError};
use crate::message::{Message, ToolCall};
use crate::provider::Request;
use crate::tool::ToolInvoker;

/// One incremental fragment of assistant text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    pub content: String,
}

impl Chunk {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Outcome of executing one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallStatus {
    pub name: String,
    pub result: Result<String, ToolError>,
}

impl ToolCallStatus {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

impl std::fmt::Display for ToolCallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n> Ran tool: `{}`", self.name)?;
        if let Err(err) = &self.result {
            writeln!(f, ">\n> *Failed*:\n> ```")?;
            for line in err.to_string().lines() {
                writeln!(f, "> {line}")?;
            }
            writeln!(f, "> ```")?;
        }
        writeln!(f)
    }
}

/// Execute one call through `invoker`.
///
/// Returns the tool message to append to history and the status to report.
/// A failed call still yields a tool message carrying the error text, so
/// the model can react to it on the next round.
pub async fn call_tool(invoker: &dyn ToolInvoker, call: &ToolCall) -> (Message, ToolCallStatus) {
    let result = invoker.invoke(&call.name, &call.arguments).await;
    let content = match &result {
        Ok(output) => output.clone(),
        Err(err) => err.to_string(),
    };
    let status = ToolCallStatus {
        name: call.name.clone(),
        result,
    };
    (Message::tool_result(call, content), status)
}

/// A single-owner, single-consumer response stream for one turn.
#[async_trait]
pub trait Stream: Send {
    /// Whether another chunk may still arrive in the current round.
    /// Never blocks.
    fn next(&self) -> bool;

    /// Take one buffered unit. Fails with [`StreamError::NoContent`] when
    /// nothing is buffered; any other error is fatal and fails the stream.
    fn current(&mut self) -> Result<Chunk, StreamError>;

    /// Suspend until `current` has something to report. Does not consume.
    async fn wait(&mut self);

    /// Commit the finished round and run any requested tools. Only
    /// meaningful after `next` returned `false`.
    async fn call_tools(&mut self) -> Vec<ToolCallStatus>;

    /// The fatal error that ended the stream, if any.
    fn err(&self) -> Option<&StreamError>;

    /// Release the delivery channel and mark the stream finished.
    /// Idempotent.
    fn close(&mut self);

    /// History of the whole turn so far.
    fn messages(&self) -> &[Message];

    /// Give up the stream and keep its history.
    fn into_messages(self: Box<Self>) -> Vec<Message>;
}

/// Opens streams. The engine's only view of a backend.
pub trait Client: Send + Sync {
    /// Start the first round of `request`. Every exchange the stream opens
    /// runs under a child of `cancel`.
    fn open(&self, request: Request, cancel: CancellationToken) -> Box<dyn Stream>;
}
