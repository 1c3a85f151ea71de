//! Tool definitions and the registry.
//!
//! A [`ToolDefinition`] is what the loop knows about a tool: its schemas,
//! whether a human must approve each call, and whether it runs on the server
//! (it carries a [`Tool`] executor) or only on the client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::adapter::ToolSchema;
use crate::chunk::StreamChunk;
use crate::error::ToolError;

/// Per-call execution context handed to a server executor.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// The call being executed
    pub call_id: String,

    /// Cancelled when the loop is cancelled. Observing it is optional.
    pub cancel: CancellationToken,

    progress: Option<mpsc::Sender<StreamChunk>>,
}

impl ToolContext {
    pub fn new(call_id: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            call_id: call_id.into(),
            cancel,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: mpsc::Sender<StreamChunk>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Report informational progress. Dropped silently when nobody listens
    /// or the pipe is full.
    pub fn report(&self, message: impl Into<String>, data: Option<Value>) {
        if let Some(tx) = &self.progress {
            let _ = tx.try_send(StreamChunk::ToolProgress {
                call_id: self.call_id.clone(),
                message: Some(message.into()),
                data,
            });
        }
    }
}

/// A server-side tool implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "addToCart").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's input.
    fn input_schema(&self) -> Value;

    /// JSON Schema describing this tool's output, if declared.
    fn output_schema(&self) -> Option<Value> {
        None
    }

    /// Whether every call must be approved by a human first.
    fn needs_approval(&self) -> bool {
        false
    }

    /// Execute the tool with validated arguments.
    async fn execute(
        &self,
        arguments: Value,
        ctx: ToolContext,
    ) -> std::result::Result<Value, ToolError>;
}

/// Everything the loop knows about one tool.
#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Option<Value>,
    pub needs_approval: bool,
    pub client_only: bool,
    executor: Option<Arc<dyn Tool>>,
}

impl ToolDefinition {
    /// A tool executed on the server by `tool`.
    pub fn server(tool: Arc<dyn Tool>) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
            output_schema: tool.output_schema(),
            needs_approval: tool.needs_approval(),
            client_only: false,
            executor: Some(tool),
        }
    }

    /// A tool the client executes; the server only forwards calls to it.
    pub fn client(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema: None,
            needs_approval: false,
            client_only: true,
            executor: None,
        }
    }

    pub fn with_approval(mut self, needs_approval: bool) -> Self {
        self.needs_approval = needs_approval;
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn executor(&self) -> Option<&Arc<dyn Tool>> {
        self.executor.as_ref()
    }

    /// Has an executor and is not pinned to the client.
    pub fn is_server_executable(&self) -> bool {
        self.executor.is_some() && !self.client_only
    }

    /// The definition as sent to the model.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.input_schema.clone(),
        }
    }

    pub fn info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            needs_approval: self.needs_approval,
            client_only: !self.is_server_executable(),
        }
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("needs_approval", &self.needs_approval)
            .field("client_only", &self.client_only)
            .field("has_executor", &self.executor.is_some())
            .finish()
    }
}

/// Public listing of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub needs_approval: bool,
    pub client_only: bool,
}

/// A registry of available tools.
///
/// The loop uses this to:
/// 1. Get tool schemas to send to the model
/// 2. Resolve definitions when the model requests a call
///
/// Definitions are shared as `Arc`s; once a registry is handed to a run it is
/// never mutated.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<ToolDefinition>>,
    order: Vec<String>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Replaces any existing tool with the same name.
    pub fn register(&mut self, definition: ToolDefinition) {
        let name = definition.name.clone();
        if self.tools.insert(name.clone(), Arc::new(definition)).is_none() {
            self.order.push(name);
        }
    }

    /// Register a server tool.
    pub fn register_tool(&mut self, tool: impl Tool + 'static) {
        self.register(ToolDefinition::server(Arc::new(tool)));
    }

    /// Get a definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<ToolDefinition>> {
        self.tools.get(name).cloned()
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &Arc<ToolDefinition>> {
        self.order.iter().filter_map(|name| self.tools.get(name))
    }

    /// All tool schemas (for sending to the model).
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.definitions().map(|d| d.schema()).collect()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.definitions().map(|d| d.info()).collect()
    }

    /// A registry restricted to `names`. Unknown names are an error.
    pub fn select(&self, names: &[String]) -> std::result::Result<ToolRegistry, ToolError> {
        let mut selected = ToolRegistry::new();
        for name in names {
            let definition = self
                .tools
                .get(name)
                .ok_or_else(|| ToolError::NotFound(name.clone()))?;
            if !selected.tools.contains_key(name) {
                selected.tools.insert(name.clone(), definition.clone());
                selected.order.push(name.clone());
            }
        }
        Ok(selected)
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.order.iter().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A simple test tool for unit tests.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn input_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }
        async fn execute(
            &self,
            arguments: Value,
            _ctx: ToolContext,
        ) -> std::result::Result<Value, ToolError> {
            Ok(arguments["text"].clone())
        }
    }

    #[test]
    fn registry_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn schemas_keep_registration_order() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition::client("b", "", json!({})));
        registry.register(ToolDefinition::client("a", "", json!({})));
        registry.register_tool(EchoTool);
        let names: Vec<_> = registry.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["b", "a", "echo"]);
    }

    #[test]
    fn re_registering_replaces_without_duplicating() {
        let mut registry = ToolRegistry::new();
        registry.register(ToolDefinition::client("a", "first", json!({})));
        registry.register(ToolDefinition::client("a", "second", json!({})));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("a").unwrap().description, "second");
    }

    #[test]
    fn server_and_client_partition() {
        let server = ToolDefinition::server(Arc::new(EchoTool));
        assert!(server.is_server_executable());

        let client = ToolDefinition::client("pickFile", "Pick a file", json!({}));
        assert!(!client.is_server_executable());
        assert!(client.info().client_only);

        let mut pinned = ToolDefinition::server(Arc::new(EchoTool));
        pinned.client_only = true;
        assert!(!pinned.is_server_executable());
    }

    #[test]
    fn select_rejects_unknown_names() {
        let mut registry = ToolRegistry::new();
        registry.register_tool(EchoTool);
        let selected = registry.select(&["echo".into()]).unwrap();
        assert_eq!(selected.names(), vec!["echo"]);

        let err = registry.select(&["missing".into()]).unwrap_err();
        assert!(matches!(err, ToolError::NotFound(name) if name == "missing"));
    }

    #[tokio::test]
    async fn progress_reports_reach_the_pipe() {
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = ToolContext::new("call_1", CancellationToken::new()).with_progress(tx);
        ctx.report("halfway", Some(json!({"pct": 50})));
        match rx.recv().await.unwrap() {
            StreamChunk::ToolProgress { call_id, message, .. } => {
                assert_eq!(call_id, "call_1");
                assert_eq!(message.as_deref(), Some("halfway"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn executor_runs_through_definition() {
        let def = ToolDefinition::server(Arc::new(EchoTool));
        let out = def
            .executor()
            .unwrap()
            .execute(json!({"text": "hello"}), ToolContext::new("c", CancellationToken::new()))
            .await
            .unwrap();
        assert_eq!(out, json!("hello"));
    }
}
