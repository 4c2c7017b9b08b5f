//! Ollama backend using the native `/api/chat` endpoint.
//!
//! The response body is newline-delimited JSON: one object per unit, the
//! last one carrying `"done": true`. Tool calls arrive whole, with their
//! arguments as a JSON object rather than a string.

use async_trait::async_trait;
use futures::StreamExt;
use oi_core::message::{Message, Role, ToolCall};
use oi_core::provider::{Backend, Delta, DeltaSink, RoundRequest, ToolDefinition};
use oi_core::ProviderError;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::http::{check_status, client, request_error};
use crate::lines::LineBuffer;

pub struct OllamaBackend {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaBackend {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: client()?,
        })
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.to_string(),
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|tc| ApiToolCall {
                        id: Some(tc.id.clone()),
                        function: ApiFunction {
                            index: Some(tc.index),
                            name: tc.name.clone(),
                            arguments: decode_arguments(&tc.arguments),
                        },
                    })
                    .collect(),
                tool_name: m.tool_name.clone(),
            })
            .collect()
    }

    fn to_api_tools(tools: &[ToolDefinition]) -> Vec<ApiTool> {
        tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function".into(),
                function: ApiToolFunction {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.parameters.clone(),
                },
            })
            .collect()
    }

    fn request_body(request: &RoundRequest) -> ApiChatRequest {
        let params = &request.params;
        ApiChatRequest {
            model: request.model.clone(),
            messages: Self::to_api_messages(&request.messages),
            stream: true,
            tools: Self::to_api_tools(&request.tools),
            options: ApiOptions {
                temperature: params.temperature,
                top_p: params.top_p,
                top_k: params.top_k,
                stop: params.stop.clone(),
                num_predict: params.max_tokens,
            },
        }
    }
}

/// Ollama expects tool arguments as an object.
fn decode_arguments(raw: &[u8]) -> serde_json::Value {
    match serde_json::from_slice::<serde_json::Value>(raw) {
        Ok(value @ serde_json::Value::Object(_)) => value,
        Ok(other) => serde_json::json!({ "value": other }),
        Err(e) => {
            debug!(error = %e, "Tool call arguments are not JSON, sending empty object");
            serde_json::Value::Object(serde_json::Map::new())
        }
    }
}

#[async_trait]
impl Backend for OllamaBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn exchange(&self, request: RoundRequest, sink: DeltaSink) -> Result<(), ProviderError> {
        let url = format!("{}/api/chat", self.base_url);
        let body = Self::request_body(&request);

        debug!(backend = %self.name, model = %request.model, messages = request.messages.len(), "Sending chat request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        let response = check_status(response).await?;

        let mut bytes = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut decoder = NdjsonDecoder::default();

        while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string()))?;
            lines.push(&chunk);
            while let Some(line) = lines.next_line() {
                if let Some(delta) = decoder.decode_line(&line)? {
                    let done = delta.done;
                    if !sink.send(delta).await || done {
                        return Ok(());
                    }
                }
            }
        }

        // A body that ends without a done unit is reported as a disconnect.
        if let Some(line) = lines.finish()
            && let Some(delta) = decoder.decode_line(&line)?
        {
            sink.send(delta).await;
        }
        Ok(())
    }
}

/// Decodes NDJSON lines into response units.
#[derive(Debug, Default)]
struct NdjsonDecoder {
    next_index: usize,
}

impl NdjsonDecoder {
    fn decode_line(&mut self, line: &str) -> Result<Option<Delta>, ProviderError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let parsed: ApiChatResponse = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                trace!(line = %line, error = %e, "Ignoring unparseable response line");
                return Ok(None);
            }
        };

        if let Some(message) = parsed.error {
            return Err(ProviderError::ApiError {
                status_code: 200,
                message,
            });
        }

        let mut delta = Delta {
            done: parsed.done,
            ..Delta::default()
        };
        if let Some(message) = parsed.message {
            delta.role = message.role.parse::<Role>().ok();
            delta.content = message.content;
            delta.tool_calls = message
                .tool_calls
                .into_iter()
                .map(|tc| self.tool_call(tc))
                .collect();
        }
        Ok(Some(delta))
    }

    /// Calls without an explicit index are numbered in arrival order.
    fn tool_call(&mut self, tc: ApiToolCall) -> ToolCall {
        let index = tc.function.index.unwrap_or(self.next_index);
        self.next_index = self.next_index.max(index + 1);
        let arguments = serde_json::to_vec(&tc.function.arguments).unwrap_or_default();
        let call = ToolCall::new(index, tc.function.name, arguments);
        match tc.id {
            Some(id) if !id.is_empty() => call.with_id(id),
            _ => call,
        }
    }
}

// --- Ollama API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    options: ApiOptions,
}

#[derive(Debug, Default, Serialize)]
struct ApiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    stop: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    function: ApiFunction,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ApiTool {
    r#type: String,
    function: ApiToolFunction,
}

#[derive(Debug, Serialize)]
struct ApiToolFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    #[serde(default)]
    message: Option<ApiMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::serve_once;
    use oi_core::provider::SamplingParams;

    fn round(messages: Vec<Message>) -> RoundRequest {
        RoundRequest {
            model: "llama3.2".into(),
            messages,
            params: SamplingParams::default(),
            tools: vec![],
        }
    }

    async fn drain(mut rx: tokio::sync::mpsc::Receiver<Result<Delta, ProviderError>>) -> Vec<Delta> {
        let mut out = Vec::new();
        while let Some(delta) = rx.recv().await {
            out.push(delta.unwrap());
        }
        out
    }

    #[test]
    fn request_body_maps_sampling_options() {
        let mut request = round(vec![Message::system("be brief"), Message::user("hi")]);
        request.params = SamplingParams {
            temperature: Some(0.1),
            top_p: None,
            top_k: Some(20),
            stop: vec!["a".into(), "b".into()],
            max_tokens: Some(128),
        };
        let body = serde_json::to_value(OllamaBackend::request_body(&request)).unwrap();
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["options"]["top_k"], 20);
        assert_eq!(body["options"]["num_predict"], 128);
        assert_eq!(body["options"]["stop"], serde_json::json!(["a", "b"]));
        assert!(body["options"].get("top_p").is_none());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn history_tool_calls_are_sent_as_objects() {
        let call = ToolCall::new(0, "weather", br#"{"city":"Oslo"}"#.to_vec());
        let messages = vec![
            Message::assistant("").with_tool_calls(vec![call.clone()]),
            Message::tool_result(&call, "sunny"),
        ];
        let api = OllamaBackend::to_api_messages(&messages);
        assert_eq!(api[0].tool_calls[0].function.arguments["city"], "Oslo");
        assert_eq!(api[0].tool_calls[0].id.as_deref(), Some("0"));
        assert_eq!(api[1].role, "tool");
        assert_eq!(api[1].tool_name.as_deref(), Some("weather"));
    }

    #[test]
    fn non_object_arguments_are_wrapped() {
        assert_eq!(decode_arguments(b"3"), serde_json::json!({"value": 3}));
        assert_eq!(decode_arguments(b"oops"), serde_json::json!({}));
    }

    #[test]
    fn decodes_content_and_done() {
        let mut decoder = NdjsonDecoder::default();
        let first = decoder
            .decode_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":"Hel"},"done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(first.role, Some(Role::Assistant));
        assert_eq!(first.content, "Hel");
        assert!(!first.done);

        let last = decoder
            .decode_line(r#"{"model":"llama3.2","message":{"role":"assistant","content":""},"done":true,"done_reason":"stop"}"#)
            .unwrap()
            .unwrap();
        assert!(last.done);
        assert!(decoder.decode_line("   ").unwrap().is_none());
    }

    #[test]
    fn numbers_tool_calls_without_index() {
        let mut decoder = NdjsonDecoder::default();
        let first = decoder
            .decode_line(r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"a","arguments":{"x":1}}}]},"done":false}"#)
            .unwrap()
            .unwrap();
        let second = decoder
            .decode_line(r#"{"message":{"role":"assistant","content":"","tool_calls":[{"function":{"name":"b","arguments":{}}}]},"done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(first.tool_calls[0].index, 0);
        assert_eq!(first.tool_calls[0].id, "0");
        assert_eq!(first.tool_calls[0].arguments, br#"{"x":1}"#.to_vec());
        assert_eq!(second.tool_calls[0].index, 1);
        assert_eq!(second.tool_calls[0].name, "b");
    }

    #[test]
    fn error_line_is_fatal() {
        let mut decoder = NdjsonDecoder::default();
        let err = decoder.decode_line(r#"{"error":"model runner crashed"}"#).unwrap_err();
        assert!(err.to_string().contains("model runner crashed"));
    }

    #[tokio::test]
    async fn exchange_streams_ndjson_body() {
        let body = [
            r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":"lo"},"done":false}"#,
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        ]
        .join("\n");
        let (url, server) = serve_once("200 OK", "application/x-ndjson", body).await;

        let backend = OllamaBackend::new("ollama", url).unwrap();
        let (sink, rx) = DeltaSink::channel(16);
        backend.exchange(round(vec![Message::user("hi")]), sink).await.unwrap();

        let deltas = drain(rx).await;
        let text: String = deltas.iter().map(|d| d.content.as_str()).collect();
        assert_eq!(text, "Hello");
        assert!(deltas.last().unwrap().done);

        let raw_request = server.await.unwrap();
        assert!(raw_request.starts_with("POST /api/chat"));
        assert!(raw_request.contains(r#""model":"llama3.2""#));
    }

    #[tokio::test]
    async fn exchange_without_done_sends_no_completion() {
        let body = r#"{"message":{"role":"assistant","content":"partial"},"done":false}"#.to_string();
        let (url, _server) = serve_once("200 OK", "application/x-ndjson", body).await;

        let backend = OllamaBackend::new("ollama", url).unwrap();
        let (sink, rx) = DeltaSink::channel(16);
        backend.exchange(round(vec![]), sink).await.unwrap();

        let deltas = drain(rx).await;
        assert_eq!(deltas.len(), 1);
        assert!(!deltas[0].done);
    }

    #[tokio::test]
    async fn unknown_model_maps_to_model_not_found() {
        let (url, _server) = serve_once(
            "404 Not Found",
            "application/json",
            r#"{"error":"model 'nope' not found"}"#.into(),
        )
        .await;
        let backend = OllamaBackend::new("ollama", url).unwrap();
        let (sink, _rx) = DeltaSink::channel(1);
        let err = backend.exchange(round(vec![]), sink).await.unwrap_err();
        assert_eq!(err, ProviderError::ModelNotFound("model 'nope' not found".into()));
    }
}
