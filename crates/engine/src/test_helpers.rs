//! Shared test helpers: scripted backends, a recording tool invoker and a
//! drain loop.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use oi_core::error::{ProviderError, StreamError, ToolError};
use oi_core::provider::{Backend, Delta, DeltaSink, RoundRequest, ToolDefinition};
use oi_core::stream::Stream;
use oi_core::tool::ToolInvoker;
use tokio::sync::Notify;

pub type Unit = Result<Delta, ProviderError>;

enum Script {
    Rounds(Mutex<VecDeque<Vec<Unit>>>),
    Stalled,
    Failing(ProviderError),
}

/// A backend that replays one scripted list of units per exchange.
pub struct ScriptedBackend {
    script: Script,
    requests: Mutex<Vec<RoundRequest>>,
    released: Notify,
}

impl ScriptedBackend {
    fn new(script: Script) -> Self {
        Self {
            script,
            requests: Mutex::new(Vec::new()),
            released: Notify::new(),
        }
    }

    /// One entry per round. Running out of rounds fails the exchange.
    pub fn rounds(rounds: Vec<Vec<Unit>>) -> Self {
        Self::new(Script::Rounds(Mutex::new(rounds.into())))
    }

    /// Never answers.
    pub fn stalled() -> Self {
        Self::new(Script::Stalled)
    }

    /// Every exchange returns `error`.
    pub fn failing(error: ProviderError) -> Self {
        Self::new(Script::Failing(error))
    }

    pub fn requests(&self) -> Vec<RoundRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Resolves once a stalled exchange has been dropped.
    pub async fn wait_for_release(&self) {
        self.released.notified().await;
    }
}

struct Release<'a>(&'a Notify);

impl Drop for Release<'_> {
    fn drop(&mut self) {
        self.0.notify_one();
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn exchange(&self, request: RoundRequest, sink: DeltaSink) -> Result<(), ProviderError> {
        self.requests.lock().unwrap().push(request);
        match &self.script {
            Script::Stalled => {
                let _release = Release(&self.released);
                std::future::pending::<()>().await;
                Ok(())
            }
            Script::Failing(error) => Err(error.clone()),
            Script::Rounds(rounds) => {
                let units = rounds
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| ProviderError::InvalidResponse("script exhausted".into()))?;
                for unit in units {
                    let delivered = match unit {
                        Ok(delta) => sink.send(delta).await,
                        Err(error) => sink.fail(error).await,
                    };
                    if !delivered {
                        break;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Records every invocation and answers with `name(arguments)`.
/// Tools listed in `failing` return an execution error instead.
#[derive(Default)]
pub struct RecordingInvoker {
    pub calls: Mutex<Vec<String>>,
    pub failing: Vec<String>,
}

impl RecordingInvoker {
    pub fn failing(names: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            failing: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ToolInvoker for RecordingInvoker {
    async fn invoke(&self, name: &str, arguments: &[u8]) -> Result<String, ToolError> {
        self.calls.lock().unwrap().push(name.to_string());
        if self.failing.iter().any(|n| n == name) {
            return Err(ToolError::ExecutionFailed {
                tool_name: name.to_string(),
                reason: "boom".into(),
            });
        }
        Ok(format!("{name}({})", String::from_utf8_lossy(arguments)))
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "recorder".into(),
            description: "records calls".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }
}

/// Drain the current round, waiting whenever nothing is buffered.
pub async fn drain(stream: &mut dyn Stream) -> Result<String, StreamError> {
    let mut text = String::new();
    while stream.next() {
        match stream.current() {
            Ok(chunk) => text.push_str(&chunk.content),
            Err(StreamError::NoContent) => stream.wait().await,
            Err(e) => return Err(e),
        }
    }
    match stream.err() {
        Some(e) => Err(e.clone()),
        None => Ok(text),
    }
}
