//! OpenAI-compatible adapter.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! endpoint exposing a streaming `/chat/completions`.
//!
//! Supports:
//! - Streaming chat with tool calling
//! - Embeddings via `/embeddings`
//! - Summaries (one tool-less turn)

use agentflux_core::adapter::{
    Adapter, ChatOptions, ChatRequest, ChunkReceiver, Embed, Summarize, ToolSchema,
};
use agentflux_core::chunk::{FinishReason, StreamChunk, Usage};
use agentflux_core::error::AdapterError;
use agentflux_core::message::{Message, Role};
use agentflux_core::sse::SseFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::stream::{FrameParser, check_status, pump, summarize_with};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OLLAMA_BASE_URL: &str = "http://localhost:11434/v1";

/// An OpenAI-compatible streaming adapter.
pub struct OpenAiCompatAdapter {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    defaults: ChatOptions,
    channel_capacity: usize,
    client: reqwest::Client,
}

impl OpenAiCompatAdapter {
    /// Create a new adapter against `base_url`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            defaults: ChatOptions::default(),
            channel_capacity: 64,
            client,
        })
    }

    /// Create an OpenAI adapter (convenience constructor).
    pub fn openai(
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, AdapterError> {
        Self::new("openai", OPENAI_BASE_URL, api_key, model)
    }

    /// Create an Ollama adapter (convenience constructor).
    pub fn ollama(base_url: Option<&str>, model: impl Into<String>) -> Result<Self, AdapterError> {
        // Ollama doesn't need a real key
        Self::new("ollama", base_url.unwrap_or(OLLAMA_BASE_URL), "ollama", model)
    }

    /// Options applied when a request leaves them unset.
    pub fn with_defaults(mut self, defaults: ChatOptions) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, request: &ChatRequest) -> serde_json::Value {
        let options = &request.options;
        let model = options.model.as_deref().unwrap_or(&self.model);

        let mut body = serde_json::json!({
            "model": model,
            "messages": to_api_messages(&request.messages),
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(temperature) = options.temperature.or(self.defaults.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens.or(self.defaults.max_tokens) {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(to_api_tools(&request.tools));
        }
        if !options.stop.is_empty() {
            body["stop"] = serde_json::json!(options.stop);
        }

        body
    }
}

#[async_trait]
impl Adapter for OpenAiCompatAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, AdapterError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request);

        debug!(provider = %self.name, model = %body["model"], "Sending streaming request");

        let send = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(AdapterError::StreamInterrupted("cancelled before response".into()));
            }
            response = send => response.map_err(|e| AdapterError::Network(e.to_string()))?,
        };
        let response = check_status(&self.name, response).await?;

        Ok(pump(
            self.name.clone(),
            response,
            OpenAiStreamParser::default(),
            cancel,
            self.channel_capacity,
        ))
    }

    fn summarizer(&self) -> Option<&dyn Summarize> {
        Some(self)
    }

    fn embedder(&self) -> Option<&dyn Embed> {
        Some(self)
    }
}

#[async_trait]
impl Summarize for OpenAiCompatAdapter {
    async fn summarize(&self, text: &str, options: &ChatOptions) -> Result<String, AdapterError> {
        summarize_with(self, text, options).await
    }
}

#[async_trait]
impl Embed for OpenAiCompatAdapter {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AdapterError> {
        let url = format!("{}/embeddings", self.base_url);

        let body = serde_json::json!({
            "model": self.model,
            "input": inputs,
            "encoding_format": "float",
        });

        debug!(provider = %self.name, count = inputs.len(), "Sending embedding request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Network(e.to_string()))?;
        let response = check_status(&self.name, response).await?;

        let api_resp: EmbeddingApiResponse =
            response.json().await.map_err(|e| AdapterError::ApiError {
                status_code: 200,
                message: format!("Failed to parse embedding response: {e}"),
            })?;

        Ok(api_resp.data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Convert messages to the OpenAI wire format.
fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
    messages
        .iter()
        .map(|m| {
            let text = m.text();
            ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                    Role::Tool => "tool".into(),
                },
                content: if text.is_empty() && !m.tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
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
                                    arguments: if tc.arguments.trim().is_empty() {
                                        "{}".into()
                                    } else {
                                        tc.arguments.clone()
                                    },
                                },
                            })
                            .collect(),
                    )
                },
                tool_call_id: m.tool_call_id.clone(),
            }
        })
        .collect()
}

/// Convert tool schemas to the OpenAI wire format.
fn to_api_tools(tools: &[ToolSchema]) -> Vec<ApiToolDefinition> {
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

fn map_finish_reason(reason: &str) -> FinishReason {
    match reason {
        "tool_calls" | "function_call" => FinishReason::ToolCalls,
        "length" => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

/// Line parser for `/chat/completions` streams.
///
/// Tool-call fragments are keyed by `index` on the wire; only the first
/// fragment carries the call id, so the parser remembers the mapping.
#[derive(Debug, Default)]
pub(crate) struct OpenAiStreamParser {
    call_ids: HashMap<u32, String>,
    finish: Option<FinishReason>,
    usage: Option<Usage>,
}

impl OpenAiStreamParser {
    fn done(&mut self) -> StreamChunk {
        StreamChunk::done(self.finish.unwrap_or(FinishReason::Stop), self.usage)
    }
}

impl FrameParser for OpenAiStreamParser {
    fn frame(&mut self, frame: &SseFrame) -> Vec<StreamChunk> {
        let data = frame.data.trim();

        // "[DONE]" signals end of stream
        if data == "[DONE]" {
            return vec![self.done()];
        }

        let stream_resp = match serde_json::from_str::<StreamResponse>(data) {
            Ok(resp) => resp,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Vec::new();
            }
        };

        if let Some(error) = stream_resp.error {
            return vec![StreamChunk::error(error.message)];
        }

        let mut chunks = Vec::new();

        if let Some(choice) = stream_resp.choices.into_iter().next() {
            let delta = choice.delta;

            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                chunks.push(StreamChunk::content(content));
            }

            for tc_delta in delta.tool_calls.unwrap_or_default() {
                if let Some(id) = tc_delta.id {
                    self.call_ids.insert(tc_delta.index, id);
                }
                let call_id = self
                    .call_ids
                    .entry(tc_delta.index)
                    .or_insert_with(|| format!("call_{}", tc_delta.index))
                    .clone();

                let (tool_name, arguments_delta) = match tc_delta.function {
                    Some(f) => (f.name.filter(|n| !n.is_empty()), f.arguments.unwrap_or_default()),
                    None => (None, String::new()),
                };

                if tool_name.is_some() || !arguments_delta.is_empty() {
                    chunks.push(StreamChunk::ToolCallDelta {
                        call_id,
                        tool_name,
                        arguments_delta,
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                self.finish = Some(map_finish_reason(&reason));
            }
        }

        // Usage arrives in its own frame just before [DONE]
        if let Some(usage) = stream_resp.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                total_tokens: usage.total_tokens,
            });
        }

        chunks
    }

    fn finish(&mut self) -> Result<StreamChunk, AdapterError> {
        if self.finish.is_some() {
            return Ok(self.done());
        }
        Err(AdapterError::StreamInterrupted(
            "stream ended before a finish reason".into(),
        ))
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

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct EmbeddingApiResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<StreamToolCallDelta>>,
}

/// A tool call delta, arriving incrementally across chunks.
#[derive(Debug, Deserialize)]
struct StreamToolCallDelta {
    index: u32,
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
