//! # agentflux Core
//!
//! Domain types, the stream-chunk protocol, the adapter contract and the tool
//! registry shared by every agentflux crate. Nothing in here talks to the
//! network; the providers, gateway and client crates build on these types.

pub mod adapter;
pub mod arguments;
pub mod chunk;
pub mod error;
pub mod message;
pub mod resume;
pub mod sse;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use adapter::{Adapter, ChatOptions, ChatRequest, ChunkReceiver, ToolSchema};
pub use chunk::{FinishReason, PendingCall, PendingKind, StreamChunk, StreamEvent, Usage};
pub use error::{AdapterError, Error, ProtocolError, Result, ToolError};
pub use message::{Conversation, ConversationId, Message, Role, ToolCallRef, ToolCallState};
pub use resume::{ApprovalDecision, ChatBody, ClientToolResult, ResumeInputs};
pub use tool::{Tool, ToolContext, ToolDefinition, ToolRegistry};
