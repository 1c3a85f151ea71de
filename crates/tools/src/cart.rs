//! Shopping-cart demo tools.
//!
//! An in-memory cart shared by `addToCart` (approval-gated) and `viewCart`,
//! so the approval flow can be exercised end-to-end without a real store.

use agentflux_core::error::ToolError;
use agentflux_core::tool::{Tool, ToolContext};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Item id → quantity.
#[derive(Debug, Clone, Default)]
pub struct Cart {
    items: Arc<Mutex<BTreeMap<String, u64>>>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `qty` of `item_id`; returns the new quantity.
    pub fn add(&self, item_id: &str, qty: u64) -> u64 {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        let entry = items.entry(item_id.to_string()).or_insert(0);
        *entry += qty;
        *entry
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

pub struct AddToCartTool {
    cart: Cart,
}

impl AddToCartTool {
    pub fn new(cart: Cart) -> Self {
        Self { cart }
    }
}

#[async_trait]
impl Tool for AddToCartTool {
    fn name(&self) -> &str {
        "addToCart"
    }

    fn description(&self) -> &str {
        "Add an item to the user's shopping cart. Requires the user's approval."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "itemId": { "type": "string", "description": "Catalog id of the item" },
                "qty": { "type": "integer", "minimum": 1, "description": "How many to add" }
            },
            "required": ["itemId", "qty"]
        })
    }

    fn output_schema(&self) -> Option<Value> {
        Some(json!({
            "type": "object",
            "properties": {
                "itemId": { "type": "string" },
                "qty": { "type": "integer" }
            },
            "required": ["itemId", "qty"]
        }))
    }

    fn needs_approval(&self) -> bool {
        true
    }

    async fn execute(&self, arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        let item_id = arguments["itemId"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'itemId' argument".into()))?;
        let qty = arguments["qty"]
            .as_u64()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'qty' argument".into()))?;

        let total = self.cart.add(item_id, qty);
        Ok(json!({ "itemId": item_id, "qty": total }))
    }
}

pub struct ViewCartTool {
    cart: Cart,
}

impl ViewCartTool {
    pub fn new(cart: Cart) -> Self {
        Self { cart }
    }
}

#[async_trait]
impl Tool for ViewCartTool {
    fn name(&self) -> &str {
        "viewCart"
    }

    fn description(&self) -> &str {
        "List the items currently in the user's shopping cart."
    }

    fn input_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: Value, _ctx: ToolContext) -> Result<Value, ToolError> {
        Ok(json!({ "items": self.cart.snapshot() }))
    }
}
