//! A session runs user turns end to end: setup, completion, retries and
//! the cache write.

use std::sync::Arc;

use oi_core::cache::ConversationCache;
use oi_core::error::{Error, Result};
use oi_core::message::Message;
use oi_core::provider::{Request, SamplingParams};
use oi_core::stream::Client;
use oi_core::tool::ToolInvoker;
use tracing::{debug, warn};

use crate::orchestrator::{CancelSet, Completion, RenderSink, TurnOutcome};
use crate::retry::{RetryPolicy, cut_prompt};
use crate::setup::TurnSetup;

/// Where a completed turn is stored.
#[derive(Debug, Clone)]
pub struct SaveTarget {
    pub id: String,
    pub title: String,
    pub api: String,
    pub model: String,
}

pub struct Session {
    client: Arc<dyn Client>,
    tools: Arc<dyn ToolInvoker>,
    cache: Option<Arc<dyn ConversationCache>>,
    setup: TurnSetup,
    retry: RetryPolicy,
    model: String,
    params: SamplingParams,
    cancel: CancelSet,
    save: Option<SaveTarget>,
}

impl Session {
    pub fn new(client: Arc<dyn Client>, model: impl Into<String>, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            client,
            tools,
            cache: None,
            setup: TurnSetup::default(),
            retry: RetryPolicy::default(),
            model: model.into(),
            params: SamplingParams::default(),
            cancel: CancelSet::new(),
            save: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn ConversationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_setup(mut self, setup: TurnSetup) -> Self {
        self.setup = setup;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_params(mut self, params: SamplingParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSet) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persist every completed turn under `target`.
    pub fn with_save(mut self, target: SaveTarget) -> Self {
        self.save = Some(target);
        self
    }

    /// Run one turn for `content`.
    ///
    /// Fatal stream errors are retried with backoff, re-running setup each
    /// time. Setup errors and cancellation end the turn immediately.
    pub async fn run(&self, content: &str, sink: &mut dyn RenderSink) -> Result<TurnOutcome> {
        let mut content = content.to_string();
        let mut attempt = 0;

        loop {
            let history = self.setup.build(self.cache.as_deref(), &content).await?;
            let request = Request::new(self.model.clone(), history, Arc::clone(&self.tools))
                .with_params(self.params.clone());

            let completion = Completion::new(self.client.as_ref(), self.cancel.child());
            let error = match completion.drive(request, sink).await {
                Ok(outcome) => {
                    self.persist(&outcome.messages).await;
                    return Ok(outcome);
                }
                Err(_) if self.cancel.is_cancelled() => return Err(Error::Cancelled),
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            attempt += 1;
            let Some(delay) = self.retry.next_delay(attempt) else {
                return Err(error);
            };
            warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Turn failed, retrying"
            );
            content = cut_prompt(&error.to_string(), &content);

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Write failures are logged and otherwise ignored.
    async fn persist(&self, messages: &[Message]) {
        if self.setup.no_cache {
            return;
        }
        let (Some(cache), Some(target)) = (&self.cache, &self.save) else {
            return;
        };
        match cache
            .write(&target.id, &target.title, &target.api, &target.model, messages)
            .await
        {
            Ok(()) => debug!(id = %target.id, "Conversation saved"),
            Err(e) => warn!(id = %target.id, error = %e, "Failed to save conversation"),
        }
    }
}
