//! Reassembly of tool calls that arrive split across streaming chunks.
//!
//! Providers stream a tool call as a series of deltas sharing a slot `index`. The first
//! delta usually carries the call id and function name; the arguments arrive as JSON text
//! cut at arbitrary byte positions. [`ToolCallReassembler`] appends fragments per slot in
//! arrival order and parses the arguments once, when the slot is finalized.

use std::collections::HashMap;

use super::openai_types::ChunkToolCall;
use crate::error::{ProxyError, Result};

/// A tool call whose arguments parsed cleanly.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Accumulated state for one slot.
#[derive(Debug, Clone, Default)]
pub struct ToolCallSlot {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The provider's call id, or a freshly minted one if it never sent any.
    fn ensure_id(&mut self) -> &str {
        self.id.get_or_insert_with(|| {
            format!("toolu_{}", uuid::Uuid::new_v4().simple())
        })
    }
}

#[derive(Debug, Default)]
pub struct ToolCallReassembler {
    slots: HashMap<u64, ToolCallSlot>,
    /// Slot indices in the order they were first seen.
    order: Vec<u64>,
}

impl ToolCallReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta. Returns `true` when this is the first delta for its slot.
    pub fn apply(&mut self, delta: &ChunkToolCall) -> bool {
        let is_new = !self.slots.contains_key(&delta.index);
        if is_new {
            self.order.push(delta.index);
        }
        let slot = self.slots.entry(delta.index).or_default();

        if slot.id.is_none() {
            slot.id = delta.id.clone().filter(|id| !id.is_empty());
        }
        if let Some(ref func) = delta.function {
            if let Some(ref name) = func.name {
                slot.name.push_str(name);
            }
            if let Some(ref args) = func.arguments {
                slot.arguments.push_str(args);
            }
        }

        is_new
    }

    pub fn slot(&self, index: u64) -> Option<&ToolCallSlot> {
        self.slots.get(&index)
    }

    /// Call id for `index`, minting one if the provider has not sent it.
    pub fn ensure_id(&mut self, index: u64) -> Option<String> {
        self.slots
            .get_mut(&index)
            .map(|slot| slot.ensure_id().to_string())
    }

    /// Parse and remove one slot. `None` if the slot is unknown or already finalized.
    pub fn finalize(&mut self, index: u64) -> Option<Result<CompletedToolCall>> {
        let mut slot = self.slots.remove(&index)?;
        self.order.retain(|i| *i != index);

        let id = slot.ensure_id().to_string();
        Some(parse_arguments(&id, &slot.arguments).map(|input| CompletedToolCall {
            id,
            name: slot.name,
            input,
        }))
    }

    /// Finalize every remaining slot in first-seen order.
    pub fn finalize_all(&mut self) -> Vec<Result<CompletedToolCall>> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|index| self.finalize(index))
            .collect()
    }
}

/// Parse tool-call arguments text. Blank arguments mean a call with no parameters.
///
/// # Errors
/// Returns `ProxyError::MalformedToolArguments` carrying the raw text if it is not JSON.
pub fn parse_arguments(tool_call_id: &str, raw: &str) -> Result<serde_json::Value> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|source| ProxyError::MalformedToolArguments {
        tool_call_id: tool_call_id.to_string(),
        raw: raw.to_string(),
        source,
    })
}
