//! The normalized stream-chunk protocol.
//!
//! Every adapter translates its provider's wire format into [`StreamChunk`]s;
//! the orchestrator forwards them, wraps them in a sequenced [`StreamEvent`]
//! envelope, and the transport writes one envelope per frame.
//!
//! Wire names follow the UI-message-stream convention: kebab-case event
//! types and camelCase fields (`{"type":"done","finishReason":"stop"}`).

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Why a turn (or a whole stream) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// The model produced its final answer.
    Stop,
    /// The model requested tool calls.
    ToolCalls,
    /// A length limit was hit: provider max tokens or the loop's iteration cap.
    Length,
    /// The turn failed.
    Error,
}

/// Token usage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// What a suspended call is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingKind {
    /// A yes/no decision from the user.
    Approval,
    /// Execution by the client, which owns the implementation.
    ClientExecution,
}

/// A call the loop could not resolve on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCall {
    pub call_id: String,
    pub tool_name: String,
    pub kind: PendingKind,
    #[serde(default)]
    pub arguments: Value,
}

/// One protocol event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum StreamChunk {
    /// Partial assistant text.
    ContentDelta { delta: String },

    /// A fragment of a tool call's serialized arguments. The first fragment
    /// for a call id carries the tool name.
    ToolCallDelta {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_name: Option<String>,
        #[serde(default)]
        arguments_delta: String,
    },

    /// Informational progress from a running tool. Safe to ignore.
    ToolProgress {
        call_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    /// A call needs a user decision before it may run.
    ApprovalRequest {
        call_id: String,
        tool_name: String,
        #[serde(default)]
        arguments: Value,
    },

    /// A call was resolved; `output` is the tool-result payload.
    ToolResult {
        call_id: String,
        tool_name: String,
        output: Value,
        #[serde(default)]
        is_error: bool,
    },

    /// Terminal: the turn or stream is finished.
    Done {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        pending: Vec<PendingCall>,
    },

    /// Terminal: the turn or stream failed.
    Error { message: String },
}

impl StreamChunk {
    pub fn content(delta: impl Into<String>) -> Self {
        Self::ContentDelta {
            delta: delta.into(),
        }
    }

    pub fn done(finish_reason: FinishReason, usage: Option<Usage>) -> Self {
        Self::Done {
            finish_reason,
            usage,
            pending: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `done` and `error` are the only events allowed to end a turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }

    /// Event name used for the transport frame.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ContentDelta { .. } => "content-delta",
            Self::ToolCallDelta { .. } => "tool-call-delta",
            Self::ToolProgress { .. } => "tool-progress",
            Self::ApprovalRequest { .. } => "approval-request",
            Self::ToolResult { .. } => "tool-result",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}

/// A sequenced protocol event as it travels over the wire.
///
/// `seq` is strictly increasing per conversation across exchanges;
/// `message_id` names the assistant or tool message the chunk belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    pub seq: u64,
    pub message_id: String,
    #[serde(flatten)]
    pub chunk: StreamChunk,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn done_uses_camel_case_wire_names() {
        let chunk = StreamChunk::done(
            FinishReason::ToolCalls,
            Some(Usage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            }),
        );
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["type"], "done");
        assert_eq!(value["finishReason"], "tool_calls");
        assert_eq!(value["usage"]["totalTokens"], 3);
        assert!(value.get("pending").is_none());
    }

    #[test]
    fn tool_call_delta_serialization() {
        let chunk = StreamChunk::ToolCallDelta {
            call_id: "call_1".into(),
            tool_name: Some("addToCart".into()),
            arguments_delta: r#"{"itemId""#.into(),
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains(r#""type":"tool-call-delta""#));
        assert!(json.contains(r#""callId":"call_1""#));
        assert!(json.contains(r#""toolName":"addToCart""#));
    }

    #[test]
    fn envelope_flattens_chunk() {
        let event = StreamEvent {
            seq: 7,
            message_id: "msg_1".into(),
            chunk: StreamChunk::content("hi"),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"seq": 7, "messageId": "msg_1", "type": "content-delta", "delta": "hi"})
        );
        let back: StreamEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn approval_request_deserializes_from_wire() {
        let raw = concat!(
            r#"{"seq":3,"messageId":"m","type":"approval-request","#,
            r#""callId":"c9","toolName":"addToCart","arguments":{"qty":2}}"#
        );
        let event: StreamEvent = serde_json::from_str(raw).unwrap();
        match event.chunk {
            StreamChunk::ApprovalRequest {
                call_id, arguments, ..
            } => {
                assert_eq!(call_id, "c9");
                assert_eq!(arguments["qty"], 2);
            }
            other => panic!("unexpected chunk {other:?}"),
        }
    }

    #[test]
    fn only_done_and_error_are_terminal() {
        assert!(StreamChunk::done(FinishReason::Stop, None).is_terminal());
        assert!(StreamChunk::error("boom").is_terminal());
        assert!(!StreamChunk::content("x").is_terminal());
        assert!(
            !StreamChunk::ToolResult {
                call_id: "c".into(),
                tool_name: "t".into(),
                output: Value::Null,
                is_error: false,
            }
            .is_terminal()
        );
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total += Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        };
        total += Usage {
            prompt_tokens: 1,
            completion_tokens: 1,
            total_tokens: 2,
        };
        assert_eq!(total.total_tokens, 17);
        assert_eq!(total.prompt_tokens, 11);
    }

    #[test]
    fn event_type_names() {
        assert_eq!(StreamChunk::content("x").event_type(), "content-delta");
        assert_eq!(StreamChunk::error("x").event_type(), "error");
        assert_eq!(
            StreamChunk::done(FinishReason::Stop, None).event_type(),
            "done"
        );
    }
}
