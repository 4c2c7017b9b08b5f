//! The chat stream: one user turn as an explicit round state machine.
//!
//! Each round spawns the backend exchange on its own task, under a child
//! cancellation token and a timeout, and receives its units over a bounded
//! channel. The consumer side never blocks: [`ChatStream::current`] only
//! drains what is already buffered and [`ChatStream::wait`] is the single
//! point where the consumer suspends.
//!
//! ```text
//! FirstRound ──done──▶ RoundComplete ──call_tools──▶ Finished
//!      │                     │
//!      │                     └─tool calls─▶ Continuation ──done──▶ RoundComplete ...
//!      └──fatal error──▶ Failed
//! ```
//!
//! `close` moves any state to `Closed`.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oi_core::error::{ProviderError, StreamError, ToolError};
use oi_core::message::{Message, Role, ToolCall};
use oi_core::provider::{Backend, Delta, DeltaSink, Request};
use oi_core::stream::{Chunk, Client, Stream, ToolCallStatus, call_tool};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Units buffered between the exchange task and the consumer.
const CHANNEL_CAPACITY: usize = 64;

type Unit = Result<Delta, ProviderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RoundState {
    /// Draining the first exchange of the turn.
    FirstRound,
    /// Draining an exchange re-opened after tool calls.
    Continuation,
    /// The backend signalled done. The assistant message is not committed yet.
    RoundComplete,
    /// Committed with no tool calls pending.
    Finished,
    /// A fatal error was recorded.
    Failed,
    Closed,
}

impl RoundState {
    fn is_streaming(self) -> bool {
        matches!(self, RoundState::FirstRound | RoundState::Continuation)
    }
}

/// Assistant message being assembled from the units of one round.
#[derive(Debug, Default)]
struct Accumulator {
    role: Option<Role>,
    content: String,
    tool_calls: BTreeMap<usize, ToolCall>,
}

impl Accumulator {
    fn fold(&mut self, delta: Delta) -> Chunk {
        if self.role.is_none() {
            self.role = delta.role;
        }
        for call in delta.tool_calls {
            match self.tool_calls.entry(call.index) {
                Entry::Vacant(slot) => {
                    slot.insert(call);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    if existing.name.is_empty() {
                        existing.name = call.name;
                    }
                    // A fragment without its own id carries the index default.
                    if !call.id.is_empty() && call.id != call.index.to_string() {
                        existing.id = call.id;
                    }
                    existing.arguments.extend_from_slice(&call.arguments);
                }
            }
        }
        self.content.push_str(&delta.content);
        Chunk {
            content: delta.content,
        }
    }

    /// The finished message. Tool calls come out in index order.
    fn finish(self) -> Message {
        let message = Message {
            role: self.role.unwrap_or(Role::Assistant),
            ..Message::assistant(self.content)
        };
        message.with_tool_calls(self.tool_calls.into_values().collect())
    }
}

/// A [`Stream`] over a [`Backend`].
pub struct ChatStream {
    backend: Arc<dyn Backend>,
    request: Request,
    messages: Vec<Message>,
    assistant: Accumulator,
    state: RoundState,
    failure: Option<StreamError>,
    rx: Option<mpsc::Receiver<Unit>>,
    pending: Option<Unit>,
    cancel: CancellationToken,
    round_token: Option<CancellationToken>,
    timeout: Duration,
    round: usize,
}

impl ChatStream {
    /// Start the first round of `request`.
    ///
    /// Must be called within a tokio runtime.
    pub fn open(
        backend: Arc<dyn Backend>,
        request: Request,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Self {
        let messages = request.history.clone();
        let mut stream = Self {
            backend,
            request,
            messages,
            assistant: Accumulator::default(),
            state: RoundState::FirstRound,
            failure: None,
            rx: None,
            pending: None,
            cancel,
            round_token: None,
            timeout,
            round: 0,
        };
        stream.start_round();
        stream
    }

    fn start_round(&mut self) {
        self.round += 1;
        let (sink, rx) = DeltaSink::channel(CHANNEL_CAPACITY);
        let token = self.cancel.child_token();
        let round = self.request.round(&self.messages);
        let backend = Arc::clone(&self.backend);
        let timeout = self.timeout;
        let task_token = token.clone();

        debug!(
            backend = backend.name(),
            round = self.round,
            messages = round.messages.len(),
            "Opening exchange"
        );

        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = task_token.cancelled() => return,
                outcome = tokio::time::timeout(timeout, backend.exchange(round, sink.clone())) => outcome,
            };
            let error = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout(format!("no response within {}s", timeout.as_secs())),
            };
            warn!(backend = backend.name(), error = %error, "Exchange failed");
            tokio::select! {
                _ = task_token.cancelled() => {}
                _ = sink.fail(error) => {}
            }
        });

        self.rx = Some(rx);
        self.round_token = Some(token);
    }

    fn stop_round(&mut self) {
        self.rx = None;
        self.pending = None;
        if let Some(token) = self.round_token.take() {
            token.cancel();
        }
    }

    fn fail(&mut self, error: StreamError) -> StreamError {
        debug!(round = self.round, error = %error, "Stream failed");
        self.stop_round();
        self.state = RoundState::Failed;
        self.failure = Some(error.clone());
        error
    }

    /// Append the finished assistant message to history and hand back its
    /// tool calls.
    fn commit(&mut self) -> Vec<ToolCall> {
        let message = std::mem::take(&mut self.assistant).finish();
        let calls = message.tool_calls.clone();
        self.messages.push(message);
        calls
    }
}

#[async_trait]
impl Stream for ChatStream {
    fn next(&self) -> bool {
        self.failure.is_none() && self.state.is_streaming()
    }

    fn current(&mut self) -> Result<Chunk, StreamError> {
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if !self.state.is_streaming() {
            return Err(StreamError::NoContent);
        }

        let unit = match self.pending.take() {
            Some(unit) => unit,
            None => {
                let Some(rx) = self.rx.as_mut() else {
                    return Err(self.fail(StreamError::Disconnected));
                };
                match rx.try_recv() {
                    Ok(unit) => unit,
                    Err(TryRecvError::Empty) => return Err(StreamError::NoContent),
                    Err(TryRecvError::Disconnected) => {
                        return Err(self.fail(StreamError::Disconnected));
                    }
                }
            }
        };

        match unit {
            Err(e) => Err(self.fail(e.into())),
            Ok(delta) => {
                let done = delta.done;
                let chunk = self.assistant.fold(delta);
                if done {
                    trace!(round = self.round, "Round complete");
                    self.stop_round();
                    self.state = RoundState::RoundComplete;
                }
                Ok(chunk)
            }
        }
    }

    async fn wait(&mut self) {
        if !self.state.is_streaming() || self.pending.is_some() {
            return;
        }
        let Some(rx) = self.rx.as_mut() else {
            return;
        };
        match rx.recv().await {
            Some(unit) => self.pending = Some(unit),
            // Every sender is gone; `current` reports the disconnect.
            None => self.rx = None,
        }
    }

    async fn call_tools(&mut self) -> Vec<ToolCallStatus> {
        if self.state != RoundState::RoundComplete {
            return Vec::new();
        }

        let calls = self.commit();
        if calls.is_empty() {
            self.state = RoundState::Finished;
            return Vec::new();
        }

        debug!(round = self.round, tool_count = calls.len(), "Executing tool calls");

        let invoker = Arc::clone(&self.request.tool_invoker);
        let mut statuses = Vec::with_capacity(calls.len());
        for call in &calls {
            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => None,
                outcome = call_tool(invoker.as_ref(), call) => Some(outcome),
            };
            let Some((message, status)) = outcome else {
                statuses.push(ToolCallStatus {
                    name: call.name.clone(),
                    result: Err(ToolError::Cancelled(call.name.clone())),
                });
                self.state = RoundState::Closed;
                return statuses;
            };
            if let Err(e) = &status.result {
                warn!(tool = %call.name, error = %e, "Tool execution failed");
            }
            self.messages.push(message);
            statuses.push(status);
        }

        self.failure = None;
        self.state = RoundState::Continuation;
        self.start_round();
        statuses
    }

    fn err(&self) -> Option<&StreamError> {
        self.failure.as_ref()
    }

    fn close(&mut self) {
        if self.state == RoundState::Closed {
            return;
        }
        self.stop_round();
        self.state = RoundState::Closed;
    }

    fn messages(&self) -> &[Message] {
        &self.messages
    }

    fn into_messages(mut self: Box<Self>) -> Vec<Message> {
        self.stop_round();
        std::mem::take(&mut self.messages)
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        if let Some(token) = self.round_token.take() {
            token.cancel();
        }
    }
}

/// Opens [`ChatStream`]s over one backend.
pub struct StreamClient {
    backend: Arc<dyn Backend>,
    timeout: Duration,
}

impl StreamClient {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }
}

impl Client for StreamClient {
    fn open(&self, request: Request, cancel: CancellationToken) -> Box<dyn Stream> {
        Box::new(ChatStream::open(
            Arc::clone(&self.backend),
            request,
            cancel,
            self.timeout,
        ))
    }
}
