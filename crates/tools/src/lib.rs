//! Tool execution for agentflux.
//!
//! [`dispatch`] is the engine that turns a model turn's tool calls into
//! results or suspensions: approval gating, schema validation, concurrent
//! execution with per-call failure isolation, call-order results.
//!
//! The crate also ships the cart demo tools used by `agentflux serve`.

pub mod cart;
pub mod dispatch;
pub mod schema;

use agentflux_core::tool::{ToolDefinition, ToolRegistry};

pub use dispatch::{CallOutcome, DispatchContext, DispatchOutcome, dispatch};

/// Create the demo registry: the cart tools plus a client-side location tool.
pub fn default_registry() -> ToolRegistry {
    let cart = cart::Cart::new();
    let mut registry = ToolRegistry::new();
    registry.register_tool(cart::AddToCartTool::new(cart.clone()));
    registry.register_tool(cart::ViewCartTool::new(cart));
    registry.register(ToolDefinition::client(
        "getLocation",
        "Read the user's current location from their device.",
        serde_json::json!({ "type": "object", "properties": {} }),
    ));
    registry
}
