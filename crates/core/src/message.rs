//! Message and Conversation domain types.
//!
//! These are the value objects that flow through the whole runtime: the
//! client sends a conversation → the orchestrator extends it turn by turn →
//! the client mirrors it from the event stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Unique identifier for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The model
    Assistant,
    /// Tool execution result
    Tool,
}

/// A structured content part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Json { value: serde_json::Value },
}

/// Message content: plain text or an ordered list of parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// The textual projection of the content. JSON parts are serialized inline.
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .map(|part| match part {
                    ContentPart::Text { text } => text.clone(),
                    ContentPart::Json { value } => value.to_string(),
                })
                .collect(),
        }
    }

    /// Append a text delta, extending the trailing text part if there is one.
    pub fn push_text(&mut self, delta: &str) {
        match self {
            Self::Text(text) => text.push_str(delta),
            Self::Parts(parts) => match parts.last_mut() {
                Some(ContentPart::Text { text }) => text.push_str(delta),
                _ => parts.push(ContentPart::Text {
                    text: delta.to_string(),
                }),
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// Lifecycle of a single tool call.
///
/// ```text
/// streaming-args → {awaiting-approval | pending-execution} → executing → {complete | error}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToolCallState {
    StreamingArgs,
    AwaitingApproval,
    PendingExecution,
    Executing,
    Complete,
    Error,
}

impl ToolCallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether `self → next` is a legal edge of the state machine.
    ///
    /// A call may resolve straight to a terminal state from any non-terminal
    /// state (schema failure, denial, client-supplied result). Staying in the
    /// same state is a no-op, terminal or not.
    pub fn can_transition_to(self, next: ToolCallState) -> bool {
        use ToolCallState::*;
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        matches!(
            (self, next),
            (StreamingArgs, AwaitingApproval)
                | (StreamingArgs, PendingExecution)
                | (StreamingArgs, Executing)
                | (AwaitingApproval, PendingExecution)
                | (AwaitingApproval, Executing)
                | (PendingExecution, Executing)
        )
    }
}

/// A tool call embedded in an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRef {
    /// Caller-assigned unique call id
    pub id: String,

    /// Name of the tool to invoke
    pub name: String,

    /// Serialized arguments, accumulated fragment by fragment
    #[serde(default)]
    pub arguments: String,

    #[serde(default = "default_call_state")]
    pub state: ToolCallState,
}

fn default_call_state() -> ToolCallState {
    ToolCallState::StreamingArgs
}

impl ToolCallRef {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: String::new(),
            state: ToolCallState::StreamingArgs,
        }
    }

    /// Parse the accumulated argument text. Empty text parses as `{}`.
    pub fn parsed_arguments(&self) -> std::result::Result<serde_json::Value, serde_json::Error> {
        if self.arguments.trim().is_empty() {
            return Ok(serde_json::Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&self.arguments)
    }

    /// Move the call to `next`, rejecting illegal edges without mutating.
    pub fn transition(&mut self, next: ToolCallState) -> std::result::Result<(), ProtocolError> {
        if !self.state.can_transition_to(next) {
            return Err(ProtocolError::IllegalTransition {
                call_id: self.id.clone(),
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The content
    #[serde(default)]
    pub content: MessageContent,

    /// Tool calls requested by the assistant (if any), in model order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// If this is a tool result, the tool that produced it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Tool result carrying an error payload
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl Message {
    fn with_role(role: Role, content: MessageContent) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
            is_error: false,
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<MessageContent>) -> Self {
        Self::with_role(Role::User, content.into())
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        Self::with_role(Role::Assistant, content.into())
    }

    /// Create a new system message.
    pub fn system(content: impl Into<MessageContent>) -> Self {
        Self::with_role(Role::System, content.into())
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: &serde_json::Value,
        is_error: bool,
    ) -> Self {
        let content = match output {
            serde_json::Value::String(s) => MessageContent::Text(s.clone()),
            other => MessageContent::Parts(vec![ContentPart::Json {
                value: other.clone(),
            }]),
        };
        let mut msg = Self::with_role(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg.tool_name = Some(tool_name.into());
        msg.is_error = is_error;
        msg
    }

    /// Override the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn text(&self) -> String {
        self.content.text()
    }

    pub fn find_call(&self, call_id: &str) -> Option<&ToolCallRef> {
        self.tool_calls.iter().find(|c| c.id == call_id)
    }

    pub fn find_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCallRef> {
        self.tool_calls.iter_mut().find(|c| c.id == call_id)
    }
}

/// A conversation is an ordered sequence of messages with shared context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    #[serde(default)]
    pub id: ConversationId,

    /// Ordered messages
    #[serde(default)]
    pub messages: Vec<Message>,

    /// When this conversation was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        Self::with_id(ConversationId::new())
    }

    pub fn with_id(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Index of the most recent assistant message that requested tools.
    pub fn last_tool_turn(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.role == Role::Assistant && !m.tool_calls.is_empty())
    }

    /// The tool result message answering `call_id`, if any.
    pub fn tool_result_for(&self, call_id: &str) -> Option<&Message> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Tool && m.tool_call_id.as_deref() == Some(call_id))
    }

    /// Calls of the latest tool turn that have no result message yet, in call order.
    ///
    /// A tool turn followed by a later assistant message is considered closed.
    pub fn outstanding_tool_calls(&self) -> Vec<ToolCallRef> {
        let Some(idx) = self.last_tool_turn() else {
            return Vec::new();
        };
        if self.messages[idx + 1..]
            .iter()
            .any(|m| m.role == Role::Assistant)
        {
            return Vec::new();
        }
        self.messages[idx]
            .tool_calls
            .iter()
            .filter(|c| self.tool_result_for(&c.id).is_none())
            .cloned()
            .collect()
    }

    /// Find a tool call anywhere in the conversation.
    pub fn find_call_mut(&mut self, call_id: &str) -> Option<&mut ToolCallRef> {
        self.messages
            .iter_mut()
            .rev()
            .find_map(|m| m.find_call_mut(call_id))
    }

    /// Reorder the tool results that follow the assistant message at
    /// `assistant_idx` so they match the order of its tool calls.
    ///
    /// Results that arrived across several exchanges may have been appended
    /// out of call order; this restores the ordering invariant once the batch
    /// is complete. Non-tool messages act as a boundary and are not moved.
    pub fn order_tool_results(&mut self, assistant_idx: usize) {
        let Some(assistant) = self.messages.get(assistant_idx) else {
            return;
        };
        let order: Vec<String> = assistant.tool_calls.iter().map(|c| c.id.clone()).collect();
        let start = assistant_idx + 1;
        let end = self.messages[start..]
            .iter()
            .position(|m| m.role != Role::Tool)
            .map_or(self.messages.len(), |p| start + p);
        self.messages[start..end].sort_by_key(|m| {
            m.tool_call_id
                .as_deref()
                .and_then(|id| order.iter().position(|o| o == id))
                .unwrap_or(usize::MAX)
        });
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
