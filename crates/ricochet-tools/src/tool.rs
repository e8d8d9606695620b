// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::Value;

use ricochet_config::{ToolGroup, TrustZone};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier from the provider (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub args: Value,
}

/// The result of executing a tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub content: String,
    /// If true, the tool execution failed non-fatally (returned error message).
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: msg.into(),
            is_error: true,
        }
    }
}

/// Coarse tool classification driving authorization and plan-mode validity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCategory {
    Read,
    Edit,
    Execute,
    Browser,
    Mcp,
    Meta,
}

impl ToolCategory {
    /// The mode tool-group this category maps onto.
    pub fn group(self) -> ToolGroup {
        match self {
            ToolCategory::Read => ToolGroup::Read,
            ToolCategory::Edit => ToolGroup::Edit,
            ToolCategory::Execute => ToolGroup::Command,
            ToolCategory::Browser => ToolGroup::Browser,
            ToolCategory::Mcp => ToolGroup::Mcp,
            ToolCategory::Meta => ToolGroup::Always,
        }
    }

    /// True for categories that mutate the workspace or run processes.
    pub fn has_side_effects(self) -> bool {
        matches!(self, ToolCategory::Edit | ToolCategory::Execute)
    }
}

/// Category assignment is by stable tool name so that authorization never
/// depends on which struct registered the name.  Unknown names land in `Mcp`
/// (dynamically-registered server tools).
pub fn category_for(name: &str) -> ToolCategory {
    match name {
        "read_file" | "view_file" | "list_dir" | "grep_search" | "codebase_search"
        | "find_by_name" => ToolCategory::Read,
        "write_file" | "write_to_file" | "replace_file_content" | "apply_diff"
        | "delete_file" | "create_directory" | "insert_code_block" => ToolCategory::Edit,
        "execute_command" | "run_command" => ToolCategory::Execute,
        "browser_open" | "browser_click" | "browser_type" | "browser_screenshot" => {
            ToolCategory::Browser
        }
        "switch_mode" | "update_todos" | "task_boundary" | "restore_checkpoint"
        | "update_plan" | "start_swarm" | "start_task" | "notify_user" | "start_subtask" => {
            ToolCategory::Meta
        }
        _ => ToolCategory::Mcp,
    }
}

/// Largest byte index `<= max` on a UTF-8 char boundary of `s`.  Tool output
/// (file contents, command output, web pages) is routinely non-ASCII; an
/// unchecked byte slice at a cap would panic mid-character.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Tool names exposed in every mode regardless of the mode's group set.
pub const ALWAYS_ALLOWED: &[&str] = &[
    "switch_mode",
    "update_todos",
    "task_boundary",
    "restore_checkpoint",
    "update_plan",
    "start_swarm",
    "start_task",
    "notify_user",
];

/// Trait that every built-in and dynamically-registered tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for parameters
    fn parameters_schema(&self) -> Value;
    /// Category for authorization; defaults to the name-based table.
    fn category(&self) -> ToolCategory {
        category_for(self.name())
    }
    /// Most restrictive trust zone this tool may still run in.  A call is
    /// allowed when `current.level() <= required.level()`.
    fn required_zone(&self) -> TrustZone {
        match self.category() {
            ToolCategory::Read | ToolCategory::Meta => TrustZone::ReadOnly,
            ToolCategory::Edit | ToolCategory::Browser | ToolCategory::Mcp => TrustZone::Safe,
            ToolCategory::Execute => TrustZone::Safe,
        }
    }
    /// Execute the tool.  Errors are reported via [`ToolOutput::err`], never
    /// propagated.
    async fn execute(&self, call: &ToolCall) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
