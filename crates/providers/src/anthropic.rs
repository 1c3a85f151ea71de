//! Anthropic native adapter.
//!
//! Uses the Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Native tool use with `tool_use` / `tool_result` content blocks
//! - Streaming via typed SSE events

use agentflux_core::adapter::{
    Adapter, ChatOptions, ChatRequest, ChunkReceiver, Summarize, ToolSchema,
};
use agentflux_core::chunk::{FinishReason, StreamChunk, Usage};
use agentflux_core::error::AdapterError;
use agentflux_core::message::{Message, Role};
use agentflux_core::sse::SseFrame;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::stream::{FrameParser, check_status, pump, summarize_with};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API adapter.
pub struct AnthropicAdapter {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    defaults: ChatOptions,
    channel_capacity: usize,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| AdapterError::NotConfigured(format!("HTTP client: {e}")))?;

        Ok(Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            defaults: ChatOptions::default(),
            channel_capacity: 64,
            client,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

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
        let (system, messages) = extract_system(&request.messages);

        let mut body = serde_json::json!({
            "model": options.model.as_deref().unwrap_or(&self.model),
            "messages": to_api_messages(&messages),
            "max_tokens": options
                .max_tokens
                .or(self.defaults.max_tokens)
                .unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if let Some(temperature) = options.temperature.or(self.defaults.temperature) {
            body["temperature"] = serde_json::json!(temperature);
        }
        if let Some(ref sys) = system {
            body["system"] = serde_json::json!(sys);
        }
        if !request.tools.is_empty() {
            body["tools"] = serde_json::json!(to_api_tools(&request.tools));
        }
        if !options.stop.is_empty() {
            body["stop_sequences"] = serde_json::json!(options.stop);
        }

        body
    }
}

#[async_trait]
impl Adapter for AnthropicAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<ChunkReceiver, AdapterError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.request_body(&request);

        debug!(provider = "anthropic", model = %body["model"], "Sending streaming request");

        let send = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
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
            AnthropicStreamParser::default(),
            cancel,
            self.channel_capacity,
        ))
    }

    fn summarizer(&self) -> Option<&dyn Summarize> {
        Some(self)
    }
}

#[async_trait]
impl Summarize for AnthropicAdapter {
    async fn summarize(&self, text: &str, options: &ChatOptions) -> Result<String, AdapterError> {
        summarize_with(self, text, options).await
    }
}

/// Anthropic puts the system prompt in a top-level field, not in messages.
fn extract_system(messages: &[Message]) -> (Option<String>, Vec<&Message>) {
    let mut system_parts: Vec<String> = Vec::new();
    let mut non_system: Vec<&Message> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::System => system_parts.push(msg.text()),
            _ => non_system.push(msg),
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    (system, non_system)
}

/// Convert messages to content blocks. Consecutive tool results are merged
/// into one user turn, which is what the API expects after a multi-call turn.
fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
    let mut result: Vec<AnthropicMessage> = Vec::new();

    for msg in messages {
        match msg.role {
            Role::User => result.push(AnthropicMessage {
                role: "user",
                content: AnthropicContent::Text(msg.text()),
            }),
            Role::Assistant if msg.tool_calls.is_empty() => result.push(AnthropicMessage {
                role: "assistant",
                content: AnthropicContent::Text(msg.text()),
            }),
            Role::Assistant => {
                let mut blocks: Vec<ContentBlock> = Vec::new();
                let text = msg.text();
                if !text.is_empty() {
                    blocks.push(ContentBlock::Text { text });
                }
                for tc in &msg.tool_calls {
                    let input = tc
                        .parsed_arguments()
                        .unwrap_or_else(|_| serde_json::json!({}));
                    blocks.push(ContentBlock::ToolUse {
                        id: tc.id.clone(),
                        name: tc.name.clone(),
                        input,
                    });
                }
                result.push(AnthropicMessage {
                    role: "assistant",
                    content: AnthropicContent::Blocks(blocks),
                });
            }
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: msg.text(),
                    is_error: msg.is_error,
                };
                match result.last_mut() {
                    Some(AnthropicMessage {
                        role: "user",
                        content: AnthropicContent::Blocks(blocks),
                    }) if blocks.iter().all(|b| matches!(b, ContentBlock::ToolResult { .. })) => {
                        blocks.push(block)
                    }
                    _ => result.push(AnthropicMessage {
                        role: "user",
                        content: AnthropicContent::Blocks(vec![block]),
                    }),
                }
            }
            Role::System => {} // handled separately
        }
    }

    result
}

fn to_api_tools(tools: &[ToolSchema]) -> Vec<AnthropicTool> {
    tools
        .iter()
        .map(|t| AnthropicTool {
            name: t.name.clone(),
            description: t.description.clone(),
            input_schema: t.parameters.clone(),
        })
        .collect()
}

fn map_stop_reason(reason: &str) -> FinishReason {
    match reason {
        "tool_use" => FinishReason::ToolCalls,
        "max_tokens" => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}

/// Parser for Messages API event streams.
///
/// Tool-use blocks are addressed by content-block `index`; the block start
/// carries the id and name, later `input_json_delta`s only the index.
#[derive(Debug, Default)]
pub(crate) struct AnthropicStreamParser {
    blocks: HashMap<u64, String>,
    finish: Option<FinishReason>,
    usage: Usage,
}

impl FrameParser for AnthropicStreamParser {
    fn frame(&mut self, frame: &SseFrame) -> Vec<StreamChunk> {
        let event: serde_json::Value = match serde_json::from_str(frame.data.trim()) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %frame.data, "Ignoring unparseable Anthropic SSE");
                return Vec::new();
            }
        };

        let event_type = event["type"]
            .as_str()
            .or(frame.event.as_deref())
            .unwrap_or("");
        let index = event["index"].as_u64().unwrap_or(0);

        match event_type {
            "message_start" => {
                let usage = &event["message"]["usage"];
                self.usage.prompt_tokens = usage["input_tokens"].as_u64().unwrap_or(0) as u32;
                self.usage.completion_tokens = usage["output_tokens"].as_u64().unwrap_or(0) as u32;
                Vec::new()
            }
            "content_block_start" => {
                let block = &event["content_block"];
                if block["type"].as_str() != Some("tool_use") {
                    return Vec::new();
                }
                let call_id = block["id"].as_str().unwrap_or("").to_string();
                self.blocks.insert(index, call_id.clone());
                vec![StreamChunk::ToolCallDelta {
                    call_id,
                    tool_name: block["name"].as_str().map(str::to_string),
                    arguments_delta: String::new(),
                }]
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => delta["text"]
                        .as_str()
                        .filter(|t| !t.is_empty())
                        .map(|t| vec![StreamChunk::content(t)])
                        .unwrap_or_default(),
                    "input_json_delta" => {
                        let Some(call_id) = self.blocks.get(&index) else {
                            return Vec::new();
                        };
                        match delta["partial_json"].as_str().filter(|p| !p.is_empty()) {
                            Some(partial) => vec![StreamChunk::ToolCallDelta {
                                call_id: call_id.clone(),
                                tool_name: None,
                                arguments_delta: partial.to_string(),
                            }],
                            None => Vec::new(),
                        }
                    }
                    _ => Vec::new(),
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.finish = Some(map_stop_reason(reason));
                }
                if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                    self.usage.completion_tokens = out as u32;
                }
                Vec::new()
            }
            "message_stop" => {
                self.usage.total_tokens = self.usage.prompt_tokens + self.usage.completion_tokens;
                vec![StreamChunk::done(
                    self.finish.unwrap_or(FinishReason::Stop),
                    Some(self.usage),
                )]
            }
            "error" => {
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("Anthropic stream error")
                    .to_string();
                vec![StreamChunk::error(message)]
            }
            _ => Vec::new(),
        }
    }

    fn finish(&mut self) -> Result<StreamChunk, AdapterError> {
        Err(AdapterError::StreamInterrupted(
            "stream ended before message_stop".into(),
        ))
    }
}

// --- Anthropic API types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: AnthropicContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum AnthropicContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

#[derive(Debug, Serialize)]
struct AnthropicTool {
    name: String,
    description: String,
    input_schema: serde_json::Value,
}
