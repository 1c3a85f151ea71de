//! Error types for the agentflux domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] unifies them.

use thiserror::Error;

use crate::message::ToolCallState;

/// The top-level error type for all agentflux operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Adapter errors ---
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Protocol errors ---
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // --- Request validation ---
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Failures raised by a model backend while producing a turn.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Adapter not configured: {0}")]
    NotConfigured(String),

    #[error("Capability not supported: {0}")]
    Unsupported(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failures local to a single tool call. These never abort a turn; the
/// execution engine turns them into error tool-results.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool call denied by user: {tool_name}")]
    Denied { tool_name: String },

    #[error("Tool execution cancelled: {0}")]
    Cancelled(String),

    #[error("Tool schema is invalid: {0}")]
    InvalidSchema(String),
}

/// Violations of the stream protocol or the tool-call state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Illegal tool call transition for {call_id}: {from:?} -> {to:?}")]
    IllegalTransition {
        call_id: String,
        from: ToolCallState,
        to: ToolCallState,
    },

    #[error("Unknown tool call id: {0}")]
    UnknownCall(String),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Stream ended without a terminal event")]
    MissingTerminal,
}
