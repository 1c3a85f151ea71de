//! Inputs a continuation request carries to resolve suspended calls, and
//! the request body that carries them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::adapter::ChatOptions;
use crate::message::Conversation;

/// A user's decision on one approval-gated call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalDecision {
    pub call_id: String,
    pub approved: bool,
}

/// The outcome of a call the client executed.
///
/// Exactly one of `output` or `error` is expected; an `error` wins if both
/// are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientToolResult {
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClientToolResult {
    pub fn success(call_id: impl Into<String>, output: Value) -> Self {
        Self {
            call_id: call_id.into(),
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            output: None,
            error: Some(error.into()),
        }
    }

    /// The tool-result payload and whether it is an error.
    pub fn payload(&self) -> (Value, bool) {
        match (&self.error, &self.output) {
            (Some(error), _) => (Value::String(error.clone()), true),
            (None, Some(output)) => (output.clone(), false),
            (None, None) => (Value::Null, false),
        }
    }
}

/// Decisions and client results indexed by call id.
#[derive(Debug, Clone, Default)]
pub struct ResumeInputs {
    approvals: HashMap<String, bool>,
    results: HashMap<String, ClientToolResult>,
}

impl ResumeInputs {
    pub fn new(approvals: Vec<ApprovalDecision>, results: Vec<ClientToolResult>) -> Self {
        Self {
            approvals: approvals
                .into_iter()
                .map(|d| (d.call_id, d.approved))
                .collect(),
            results: results
                .into_iter()
                .map(|r| (r.call_id.clone(), r))
                .collect(),
        }
    }

    pub fn decision(&self, call_id: &str) -> Option<bool> {
        self.approvals.get(call_id).copied()
    }

    pub fn result(&self, call_id: &str) -> Option<&ClientToolResult> {
        self.results.get(call_id)
    }

    pub fn is_empty(&self) -> bool {
        self.approvals.is_empty() && self.results.is_empty()
    }
}

/// Body of `POST /v1/chat`.
///
/// The first request of a conversation and every continuation share this
/// shape; the server keeps nothing between exchanges, so `conversation`
/// always carries the full history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBody {
    pub conversation: Conversation,

    /// Restrict the registry to these tool names for this request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ClientToolResult>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub approvals: Vec<ApprovalDecision>,

    /// Last sequence number the client applied; numbering resumes after it
    #[serde(default)]
    pub cursor: u64,
}

impl ChatBody {
    pub fn new(conversation: Conversation) -> Self {
        Self {
            conversation,
            tools: None,
            options: None,
            tool_results: Vec::new(),
            approvals: Vec::new(),
            cursor: 0,
        }
    }

    /// Split into the conversation and the indexed resume inputs.
    pub fn into_parts(self) -> (Conversation, ResumeInputs, u64) {
        let resume = ResumeInputs::new(self.approvals, self.tool_results);
        (self.conversation, resume, self.cursor)
    }
}
