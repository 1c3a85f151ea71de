//! Accumulation of streamed tool-call arguments.
//!
//! Fragments for several calls may interleave in one turn. The buffer keeps
//! one entry per call id, in first-seen order, and releases them all at once
//! when the turn ends.

use std::collections::HashMap;

use crate::message::ToolCallRef;

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: Option<String>,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct ArgumentBuffer {
    calls: Vec<PartialCall>,
    index: HashMap<String, usize>,
}

impl ArgumentBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment. A name on a later fragment is kept only if the
    /// call did not have one yet.
    pub fn push(&mut self, call_id: &str, tool_name: Option<&str>, fragment: &str) {
        let slot = match self.index.get(call_id) {
            Some(&slot) => slot,
            None => {
                self.calls.push(PartialCall {
                    id: call_id.to_string(),
                    ..Default::default()
                });
                let slot = self.calls.len() - 1;
                self.index.insert(call_id.to_string(), slot);
                slot
            }
        };

        let call = &mut self.calls[slot];
        if call.name.is_none()
            && let Some(name) = tool_name.filter(|n| !n.is_empty())
        {
            call.name = Some(name.to_string());
        }
        call.arguments.push_str(fragment);
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Release every buffered call, in the order its first fragment arrived.
    ///
    /// Calls whose name never arrived come out with an empty name and fail
    /// tool lookup downstream.
    pub fn finish(&mut self) -> Vec<ToolCallRef> {
        self.index.clear();
        self.calls
            .drain(..)
            .map(|partial| {
                let mut call = ToolCallRef::new(partial.id, partial.name.unwrap_or_default());
                call.arguments = partial.arguments;
                call
            })
            .collect()
    }
}
