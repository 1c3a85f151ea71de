//! Tools the client executes itself.
//!
//! Implementations use the same [`Tool`] trait as server tools; the client
//! runs them off the stream task and reports each outcome as a
//! [`ClientToolResult`].

use agentflux_core::message::ToolCallRef;
use agentflux_core::resume::ClientToolResult;
use agentflux_core::tool::{Tool, ToolContext};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

#[derive(Default, Clone)]
pub struct ClientToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ClientToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run `calls` concurrently; results come back in call order.
    ///
    /// A missing implementation, unparseable arguments, a tool error or a
    /// panic each become a failure result for that call only.
    pub async fn run_all(
        &self,
        calls: Vec<ToolCallRef>,
        cancel: &CancellationToken,
    ) -> Vec<ClientToolResult> {
        let handles = calls.iter().map(|call| {
            let tool = self.get(&call.name);
            let arguments = call.parsed_arguments();
            let ctx = ToolContext::new(call.id.clone(), cancel.clone());
            let name = call.name.clone();
            tokio::spawn(async move {
                let Some(tool) = tool else {
                    return Err(format!("no local implementation for tool '{name}'"));
                };
                let arguments =
                    arguments.map_err(|e| format!("arguments are not valid JSON: {e}"))?;
                debug!(call_id = %ctx.call_id, tool = %name, "Running local tool");
                tool.execute(arguments, ctx).await.map_err(|e| e.to_string())
            })
        });
        let joined = join_all(handles).await;

        calls
            .iter()
            .zip(joined)
            .map(|(call, outcome)| match outcome {
                Ok(Ok(output)) => ClientToolResult::success(call.id.clone(), output),
                Ok(Err(error)) => {
                    warn!(call_id = %call.id, tool = %call.name, %error, "Local tool failed");
                    ClientToolResult::failure(call.id.clone(), error)
                }
                Err(join) => {
                    warn!(
                        call_id = %call.id,
                        tool = %call.name,
                        error = %join,
                        "Local tool crashed"
                    );
                    ClientToolResult::failure(call.id.clone(), "tool panicked")
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflux_core::error::ToolError;
    use async_trait::async_trait;
    use serde_json::{Value, json};

    struct Locate;

    #[async_trait]
    impl Tool for Locate {
        fn name(&self) -> &str {
            "getLocation"
        }
        fn description(&self) -> &str {
            "Where the device is"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
            Ok(json!({"city": "Porto"}))
        }
    }

    struct Explodes;

    #[async_trait]
    impl Tool for Explodes {
        fn name(&self) -> &str {
            "explodes"
        }
        fn description(&self) -> &str {
            "Panics"
        }
        fn input_schema(&self) -> Value {
            json!({})
        }
        async fn execute(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
            panic!("kaboom")
        }
    }

    fn call(id: &str, name: &str, arguments: &str) -> ToolCallRef {
        let mut call = ToolCallRef::new(id, name);
        call.arguments = arguments.into();
        call
    }

    #[tokio::test]
    async fn failures_are_isolated_and_ordered() {
        let mut registry = ClientToolRegistry::new();
        registry.register(Locate);
        registry.register(Explodes);

        let results = registry
            .run_all(
                vec![
                    call("a", "explodes", "{}"),
                    call("b", "getLocation", "{}"),
                    call("c", "missing", "{}"),
                    call("d", "getLocation", "{oops"),
                ],
                &CancellationToken::new(),
            )
            .await;

        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(results[0].error.as_deref(), Some("tool panicked"));
        assert_eq!(results[1].output, Some(json!({"city": "Porto"})));
        assert!(results[2].error.as_ref().unwrap().contains("missing"));
        assert!(results[3].error.as_ref().unwrap().contains("JSON"));
    }
}
