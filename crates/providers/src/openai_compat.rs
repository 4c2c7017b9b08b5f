//! OpenAI-compatible backend.
//!
//! Works with OpenAI, OpenRouter, vLLM, llama.cpp server, LM Studio and any
//! endpoint exposing a streaming `/chat/completions`.
//!
//! Tool call deltas arrive in fragments keyed by index; they are assembled
//! here and delivered with the final `done` unit, ordered by index.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::StreamExt;
use oi_core::message::{Message, Role, ToolCall};
use oi_core::provider::{Backend, Delta, DeltaSink, RoundRequest, ToolDefinition};
use oi_core::ProviderError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::http::{check_status, client, request_error};
use crate::lines::LineBuffer;

/// A backend speaking the OpenAI chat completions protocol.
pub struct OpenAiCompatBackend {
    name: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            client: client()?,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.to_string(),
                content: Some(m.content.clone()),
                tool_calls: if m.tool_calls.is_empty() {
                    None
                } else {
                    Some(
                        m.tool_calls
                            .iter()
                            .map(|tc| ApiToolCall {
                                id: tc.id.clone(),
                                r#type: "function".into(),
                                function: ApiFunction {
                                    name: tc.name.clone(),
                                    arguments: tc.arguments_str().into_owned(),
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            })
            .collect()
    }

    /// Convert tool definitions to OpenAI API format.
    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiToolDefinition> {
        tools
            .iter()
            .map(|t| ApiToolDefinition {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &RoundRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "stream": true,
        });

        let params = &request.params;
        if let Some(temperature) = params.temperature {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(top_p) = params.top_p {
            body["top_p"] = serde_json::json!(top_p);
        }
        if let Some(max_tokens) = params.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !params.stop.is_empty() {
            body["stop"] = serde_json::json!(params.stop);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(Self::to_api_tools(&request.tools));
        }
        body
    }
}

#[async_trait]
impl Backend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exchange(&self, request: RoundRequest, sink: DeltaSink) -> Result<(), ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = Self::request_body(&request);

        debug!(backend = %self.name, model = %request.model, messages = request.messages.len(), "Sending streaming request");

        let response = self
            .authorized(self.client.post(&url))
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut decoder = SseDecoder::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
            lines.push(&chunk);
            while let Some(line) = lines.next_line() {
                if let Some(delta) = decoder.decode_line(&line)? {
                    let done = delta.done;
                    if !sink.send(delta).await {
                        return Ok(());
                    }
                    if done {
                        return Ok(());
                    }
                }
            }
        }

        if let Some(line) = lines.finish()
            && let Some(delta) = decoder.decode_line(&line)?
        {
            let done = delta.done;
            if !sink.send(delta).await || done {
                return Ok(());
            }
        }

        // Stream ended without [DONE]: treat the body end as completion.
        sink.send(decoder.finish()).await;
        Ok(())
    }
}

/// Decodes SSE lines into response units.
#[derive(Debug, Default)]
struct SseDecoder {
    tool_calls: BTreeMap<usize, ToolCallAccumulator>,
}

impl SseDecoder {
    fn decode_line(&mut self, line: &str) -> Result<Option<Delta>, ProviderError> {
        // Skip empty lines, SSE comments and non-data fields
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            return Ok(Some(self.finish()));
        }

        let parsed: StreamResponse = match serde_json::from_str(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Ok(None);
            }
        };

        if let Some(error) = parsed.error {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message: error.message,
            });
        }

        let Some(choice) = parsed.choices.into_iter().next() else {
            return Ok(None);
        };
        let delta = choice.delta;

        for fragment in delta.tool_calls.unwrap_or_default() {
            let acc = self.tool_calls.entry(fragment.index).or_default();
            if let Some(id) = fragment.id {
                acc.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    acc.name = name;
                }
                if let Some(arguments) = function.arguments {
                    acc.arguments.push_str(&arguments);
                }
            }
        }

        let role = delta.role.as_deref().and_then(|r| r.parse::<Role>().ok());
        let content = delta.content.unwrap_or_default();
        if content.is_empty() && role.is_none() {
            return Ok(None);
        }

        Ok(Some(Delta {
            role,
            content,
            ..Delta::default()
        }))
    }

    /// The final unit carrying every assembled tool call.
    fn finish(&mut self) -> Delta {
        let tool_calls = std::mem::take(&mut self.tool_calls)
            .into_iter()
            .map(|(index, acc)| acc.into_tool_call(index))
            .collect();
        Delta::done().with_tool_calls(tool_calls)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ApiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    id: String,
    r#type: String,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolDefinition {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamErrorBody>,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta. Arrives incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct StreamFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

/// Accumulates incremental tool call deltas into a complete tool call.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn into_tool_call(self, index: usize) -> ToolCall {
        let call = ToolCall::new(index, self.name, self.arguments.into_bytes());
        if self.id.is_empty() {
            call
        } else {
            call.with_id(self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::serve_once;
    use oi_core::provider::SamplingParams;

    fn decode_all(lines: &[&str]) -> Vec<Delta> {
        let mut decoder = SseDecoder::default();
        lines
            .iter()
            .filter_map(|l| decoder.decode_line(l).unwrap())
            .collect()
    }

    #[test]
    fn message_conversion() {
        let messages = vec![Message::system("You are helpful"), Message::user("Hello")];
        let api_messages = OpenAiCompatBackend::to_api_messages(&messages);
        assert_eq!(api_messages.len(), 2);
        assert_eq!(api_messages[0].role, "system");
        assert_eq!(api_messages[1].role, "user");
    }

    #[test]
    fn message_conversion_with_tool_calls() {
        let msg = Message::assistant("thinking...").with_tool_calls(vec![
            ToolCall::new(0, "shell", br#"{"command":"ls"}"#.to_vec()).with_id("call_1"),
        ]);
        let api_msgs = OpenAiCompatBackend::to_api_messages(&[msg]);
        let tc = api_msgs[0].tool_calls.as_ref().unwrap();
        assert_eq!(tc.len(), 1);
        assert_eq!(tc[0].id, "call_1");
        assert_eq!(tc[0].function.arguments, r#"{"command":"ls"}"#);
    }

    #[test]
    fn message_conversion_tool_response() {
        let call = ToolCall::new(0, "shell", Vec::new()).with_id("call_1");
        let msg = Message::tool_result(&call, "result data");
        let api_msgs = OpenAiCompatBackend::to_api_messages(&[msg]);
        assert_eq!(api_msgs[0].role, "tool");
        assert_eq!(api_msgs[0].tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn request_body_includes_only_set_params() {
        let request = RoundRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("hi")],
            params: SamplingParams {
                temperature: Some(0.5),
                stop: vec!["END".into()],
                ..SamplingParams::default()
            },
            tools: vec![ToolDefinition {
                name: "shell".into(),
                description: "Run a shell command".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
        };
        let body = OpenAiCompatBackend::request_body(&request);
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["stop"][0], "END");
        assert_eq!(body["tools"][0]["function"]["name"], "shell");
        assert!(body.get("top_p").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    // --- SSE decoding tests ---

    #[test]
    fn decodes_content_deltas() {
        let deltas = decode_all(&[
            r#"data: {"choices":[{"delta":{"role":"assistant","content":""}}]}"#,
            "",
            r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#,
            ": keep-alive",
            r#"data: {"choices":[{"delta":{"content":"lo"},"finish_reason":"stop"}]}"#,
            "data: [DONE]",
        ]);
        assert_eq!(deltas.len(), 4);
        assert_eq!(deltas[0].role, Some(Role::Assistant));
        assert_eq!(deltas[1].content, "Hel");
        assert_eq!(deltas[2].content, "lo");
        assert!(deltas[3].done);
        assert!(deltas[3].tool_calls.is_empty());
    }

    #[test]
    fn assembles_tool_call_fragments_in_index_order() {
        let deltas = decode_all(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_b","function":{"name":"calc","arguments":""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","function":{"name":"search","arguments":"{\"q\""}}]}}]}"#,
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":": \"rust\"}"}}]}}]}"#,
            "data: [DONE]",
        ]);
        let done = deltas.last().unwrap();
        assert!(done.done);
        assert_eq!(done.tool_calls.len(), 2);
        assert_eq!(done.tool_calls[0].id, "call_a");
        assert_eq!(done.tool_calls[0].arguments, br#"{"q": "rust"}"#.to_vec());
        assert_eq!(done.tool_calls[1].name, "calc");
    }

    #[test]
    fn tool_call_without_id_uses_index() {
        let deltas = decode_all(&[
            r#"data: {"choices":[{"delta":{"tool_calls":[{"index":2,"function":{"name":"ls","arguments":"{}"}}]}}]}"#,
            "data: [DONE]",
        ]);
        assert_eq!(deltas[0].tool_calls[0].id, "2");
    }

    #[test]
    fn error_payload_is_fatal() {
        let mut decoder = SseDecoder::default();
        let err = decoder
            .decode_line(r#"data: {"error":{"message":"This model's maximum context length is 10 tokens"}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("maximum context length"));
    }

    #[test]
    fn unparseable_chunks_are_skipped() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.decode_line("data: {not json").unwrap().is_none());
        assert!(decoder.decode_line("event: ping").unwrap().is_none());
    }

    #[tokio::test]
    async fn exchange_streams_sse_body() {
        let body = [
            r#"data: {"choices":[{"delta":{"role":"assistant","content":"Hi"}}]}"#,
            r#"data: {"choices":[{"delta":{"content":" there"}}]}"#,
            "data: [DONE]",
            "",
        ]
        .join("\n\n");
        let (url, server) = serve_once("200 OK", "text/event-stream", body).await;

        let backend = OpenAiCompatBackend::new("test", url, Some("sk-test".into())).unwrap();
        let (sink, mut rx) = DeltaSink::channel(16);
        let request = RoundRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![Message::user("hello")],
            params: SamplingParams::default(),
            tools: vec![],
        };
        backend.exchange(request, sink).await.unwrap();

        let mut text = String::new();
        let mut done = false;
        while let Some(delta) = rx.recv().await {
            let delta = delta.unwrap();
            text.push_str(&delta.content);
            done |= delta.done;
        }
        assert_eq!(text, "Hi there");
        assert!(done);

        let raw_request = server.await.unwrap();
        assert!(raw_request.starts_with("POST /chat/completions"));
        assert!(raw_request.to_lowercase().contains("authorization: bearer sk-test"));
    }

    #[tokio::test]
    async fn exchange_maps_auth_failure() {
        let (url, _server) = serve_once(
            "401 Unauthorized",
            "application/json",
            r#"{"error":{"message":"Incorrect API key provided"}}"#.into(),
        )
        .await;
        let backend = OpenAiCompatBackend::new("test", url, None).unwrap();
        let (sink, _rx) = DeltaSink::channel(1);
        let request = RoundRequest {
            model: "m".into(),
            messages: vec![],
            params: SamplingParams::default(),
            tools: vec![],
        };
        let err = backend.exchange(request, sink).await.unwrap_err();
        assert_eq!(
            err,
            ProviderError::AuthenticationFailed("Incorrect API key provided".into())
        );
    }
}
