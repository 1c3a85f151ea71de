//! Adapter trait: the abstraction over model backends.
//!
//! An adapter knows how to send a conversation and a tool set to a model and
//! translate whatever streaming format the backend speaks into the normalized
//! [`StreamChunk`] protocol.
//!
//! Contract for implementors:
//! - argument fragments of a `tool-call-delta` concatenate, in emission
//!   order, to the call's serialized arguments;
//! - exactly one terminal chunk (`done` or `error`) per invocation;
//! - once the cancellation token fires, stop reading from the backend and
//!   emit nothing further except an acknowledging terminal chunk.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::chunk::StreamChunk;
use crate::error::AdapterError;
use crate::message::Message;

/// The receiving half of an adapter's chunk pipe.
pub type ChunkReceiver = mpsc::Receiver<std::result::Result<StreamChunk, AdapterError>>;

/// Per-request generation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    /// Model override; adapters fall back to their configured model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

/// A tool description sent to the model so it knows what it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One model invocation.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub options: ChatOptions,
}

/// Which optional capabilities an adapter exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub summarize: bool,
    pub embed: bool,
}

/// The core adapter trait. `chat_stream` is the only required operation.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// A human-readable name (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Start a streaming turn.
    ///
    /// Errors returned here happen before any chunk was produced (connection
    /// refused, authentication, bad status); failures after that travel
    /// through the receiver.
    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkReceiver, AdapterError>;

    fn summarizer(&self) -> Option<&dyn Summarize> {
        None
    }

    fn embedder(&self) -> Option<&dyn Embed> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            summarize: self.summarizer().is_some(),
            embed: self.embedder().is_some(),
        }
    }
}

/// Optional capability: condense a text.
#[async_trait]
pub trait Summarize: Send + Sync {
    async fn summarize(
        &self,
        text: &str,
        options: &ChatOptions,
    ) -> std::result::Result<String, AdapterError>;
}

/// Optional capability: embed texts into vectors.
#[async_trait]
pub trait Embed: Send + Sync {
    async fn embed(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Bare;

    #[async_trait]
    impl Adapter for Bare {
        fn name(&self) -> &str {
            "bare"
        }

        async fn chat_stream(
            &self,
            _request: ChatRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<ChunkReceiver, AdapterError> {
            Err(AdapterError::NotConfigured("bare".into()))
        }
    }

    struct Summarizing;

    #[async_trait]
    impl Summarize for Summarizing {
        async fn summarize(
            &self,
            text: &str,
            _options: &ChatOptions,
        ) -> std::result::Result<String, AdapterError> {
            Ok(text.chars().take(3).collect())
        }
    }

    struct WithSummary(Summarizing);

    #[async_trait]
    impl Adapter for WithSummary {
        fn name(&self) -> &str {
            "summary"
        }

        async fn chat_stream(
            &self,
            _request: ChatRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<ChunkReceiver, AdapterError> {
            let (_tx, rx) = mpsc::channel(1);
            Ok(rx)
        }

        fn summarizer(&self) -> Option<&dyn Summarize> {
            Some(&self.0)
        }
    }

    #[test]
    fn optional_capabilities_default_to_absent() {
        let caps = Bare.capabilities();
        assert!(!caps.summarize);
        assert!(!caps.embed);
    }

    #[tokio::test]
    async fn presence_check_exposes_sibling_capability() {
        let adapter = WithSummary(Summarizing);
        assert!(adapter.capabilities().summarize);
        let summary = adapter
            .summarizer()
            .unwrap()
            .summarize("abcdef", &ChatOptions::default())
            .await
            .unwrap();
        assert_eq!(summary, "abc");
    }

    #[test]
    fn tool_schema_serialization() {
        let tool = ToolSchema {
            name: "addToCart".into(),
            description: "Add an item to the cart".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "itemId": { "type": "string" } },
                "required": ["itemId"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("addToCart"));
        assert!(json.contains("itemId"));
    }
}
