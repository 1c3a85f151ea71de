//! Scripted adapter for tests across the workspace.
//!
//! Each call to `chat_stream` plays the next [`ScriptStep`]. The requests it
//! received are recorded so tests can assert on what the loop sent.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::{Adapter, ChatRequest, ChunkReceiver};
use crate::chunk::{FinishReason, StreamChunk, Usage};
use crate::error::AdapterError;

/// What one model invocation does.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Emit these chunks, then close.
    Turn(Vec<StreamChunk>),
    /// Fail before producing anything.
    Reject(AdapterError),
    /// Emit these chunks, then fail mid-stream.
    Interrupt(Vec<StreamChunk>, AdapterError),
    /// Emit these chunks, then hang until cancelled.
    Stall(Vec<StreamChunk>),
}

pub struct ScriptedAdapter {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ChatRequest>>,
    saw_cancel: std::sync::Arc<AtomicBool>,
}

impl ScriptedAdapter {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            requests: Mutex::new(Vec::new()),
            saw_cancel: std::sync::Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether a stalled step observed cancellation.
    pub fn saw_cancel(&self) -> bool {
        self.saw_cancel.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Adapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ChunkReceiver, AdapterError> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request);

        let step = self
            .steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| AdapterError::NotConfigured("script exhausted".into()))?;

        let (chunks, tail) = match step {
            ScriptStep::Reject(err) => return Err(err),
            ScriptStep::Turn(chunks) => (chunks, Tail::Close),
            ScriptStep::Interrupt(chunks, err) => (chunks, Tail::Fail(err)),
            ScriptStep::Stall(chunks) => (chunks, Tail::Stall),
        };

        let (tx, rx) = mpsc::channel(16);
        let saw_cancel = self.saw_cancel.clone();
        tokio::spawn(async move {
            for chunk in chunks {
                if cancel.is_cancelled() || tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
            match tail {
                Tail::Close => {}
                Tail::Fail(err) => {
                    let _ = tx.send(Err(err)).await;
                }
                Tail::Stall => {
                    cancel.cancelled().await;
                    saw_cancel.store(true, Ordering::SeqCst);
                }
            }
        });

        Ok(rx)
    }
}

enum Tail {
    Close,
    Fail(AdapterError),
    Stall,
}

/// Usage attached to every scripted `done`.
pub fn turn_usage() -> Usage {
    Usage {
        prompt_tokens: 10,
        completion_tokens: 5,
        total_tokens: 15,
    }
}

/// A turn that streams `text` in two deltas and stops.
pub fn text_turn(text: &str) -> ScriptStep {
    let mid = text
        .char_indices()
        .nth(text.chars().count() / 2)
        .map_or(text.len(), |(i, _)| i);
    let mut chunks = Vec::new();
    for part in [&text[..mid], &text[mid..]] {
        if !part.is_empty() {
            chunks.push(StreamChunk::content(part));
        }
    }
    chunks.push(StreamChunk::done(FinishReason::Stop, Some(turn_usage())));
    ScriptStep::Turn(chunks)
}

/// A turn that requests `calls` (id, tool name, arguments), each argument
/// payload split across two fragments, and finishes with `tool_calls`.
pub fn tool_turn(calls: &[(&str, &str, Value)]) -> ScriptStep {
    let mut chunks = Vec::new();
    for (id, name, arguments) in calls {
        let text = arguments.to_string();
        let mut mid = text.len() / 2;
        while !text.is_char_boundary(mid) {
            mid -= 1;
        }
        chunks.push(StreamChunk::ToolCallDelta {
            call_id: id.to_string(),
            tool_name: Some(name.to_string()),
            arguments_delta: text[..mid].to_string(),
        });
        chunks.push(StreamChunk::ToolCallDelta {
            call_id: id.to_string(),
            tool_name: None,
            arguments_delta: text[mid..].to_string(),
        });
    }
    chunks.push(StreamChunk::done(FinishReason::ToolCalls, Some(turn_usage())));
    ScriptStep::Turn(chunks)
}
