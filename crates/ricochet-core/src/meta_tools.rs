// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Schema-only definitions for the engine-intercepted meta tools.
//!
//! These tools exist so the model sees their schemas; their execution never
//! reaches the generic dispatcher — the controller handles each name with a
//! bespoke handler before dispatch.  The `execute` fallback only fires if an
//! embedder wires a registry without a controller in front of it.

use async_trait::async_trait;
use serde_json::{json, Value};

use ricochet_tools::{Tool, ToolCall, ToolOutput, ToolRegistry};

struct MetaTool {
    name: &'static str,
    description: &'static str,
    parameters: Value,
}

#[async_trait]
impl Tool for MetaTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        self.description
    }
    fn parameters_schema(&self) -> Value {
        self.parameters.clone()
    }
    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        ToolOutput::err(
            &call.id,
            format!("'{}' must be handled by the engine", self.name),
        )
    }
}

/// Register every intercepted meta tool schema into `reg`.
pub fn register_meta_tools(reg: &mut ToolRegistry) {
    reg.register(MetaTool {
        name: "switch_mode",
        description: "Switch the active operating mode. With handoff=true, prior \
                      history is condensed into .ricochet/SPEC.md so the next mode \
                      starts from distilled context.",
        parameters: json!({
            "type": "object",
            "properties": {
                "mode": { "type": "string", "description": "Target mode slug (e.g. code, architect, ask)" },
                "handoff": { "type": "boolean", "description": "Write a handoff SPEC.md before switching" }
            },
            "required": ["mode"],
            "additionalProperties": false
        }),
    });
    reg.register(MetaTool {
        name: "update_todos",
        description: "Replace the session todo list. Keep it current: mark items \
                      in_progress when you start them and completed when done.",
        parameters: json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string" },
                            "status": { "type": "string", "enum": ["pending", "in_progress", "completed", "cancelled"] }
                        },
                        "required": ["id", "content", "status"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        }),
    });
    reg.register(MetaTool {
        name: "task_boundary",
        description: "Mark the start of a new unit of work. Emits a progress event \
                      and resets the stuck detector.",
        parameters: json!({
            "type": "object",
            "properties": { "title": { "type": "string" } },
            "required": ["title"],
            "additionalProperties": false
        }),
    });
    reg.register(MetaTool {
        name: "restore_checkpoint",
        description: "Restore workspace files from a saved checkpoint (by id or \
                      unique id prefix).",
        parameters: json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        }),
    });
    reg.register(MetaTool {
        name: "update_plan",
        description: "Modify the session task plan. Actions: add (title, context?, \
                      priority?), remove (id), complete (id), fail (id), deps (id, \
                      depends_on), validate.",
        parameters: json!({
            "type": "object",
            "properties": {
                "action": { "type": "string", "enum": ["add", "remove", "complete", "fail", "deps", "validate"] },
                "id": { "type": "string" },
                "title": { "type": "string" },
                "context": { "type": "string" },
                "priority": { "type": "string", "enum": ["normal", "high", "critical"] },
                "depends_on": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["action"],
            "additionalProperties": false
        }),
    });
    reg.register(MetaTool {
        name: "start_swarm",
        description: "Start the background swarm: plan tasks are executed by \
                      parallel sub-agent workers. Seeds a reconnaissance plan when \
                      the plan is empty.",
        parameters: json!({ "type": "object", "properties": {}, "additionalProperties": false }),
    });
    reg.register(MetaTool {
        name: "start_task",
        description: "Mark a plan task active and announce it as the current task.",
        parameters: json!({
            "type": "object",
            "properties": { "id": { "type": "string" } },
            "required": ["id"],
            "additionalProperties": false
        }),
    });
    reg.register(MetaTool {
        name: "start_subtask",
        description: "Delegate a bounded goal to a sub-agent running in a fresh \
                      child session. Roles: architect, qa, researcher, or general \
                      (default). Returns the sub-agent's result as JSON.",
        parameters: json!({
            "type": "object",
            "properties": {
                "goal": { "type": "string", "description": "What the sub-agent must accomplish" },
                "context": { "type": "string", "description": "Background the sub-agent needs" },
                "role": { "type": "string", "enum": ["architect", "qa", "researcher", "general"] }
            },
            "required": ["goal"],
            "additionalProperties": false
        }),
    });
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use ricochet_tools::{category_for, ToolCategory};

    #[test]
    fn all_meta_tools_are_registered() {
        let mut reg = ToolRegistry::new();
        register_meta_tools(&mut reg);
        for name in [
            "switch_mode",
            "update_todos",
            "task_boundary",
            "restore_checkpoint",
            "update_plan",
            "start_swarm",
            "start_task",
            "start_subtask",
        ] {
            assert!(reg.get(name).is_some(), "{name}");
            assert_eq!(category_for(name), ToolCategory::Meta, "{name}");
        }
    }

    #[tokio::test]
    async fn fallback_execute_reports_engine_handling() {
        let mut reg = ToolRegistry::new();
        register_meta_tools(&mut reg);
        let out = reg
            .execute(&ToolCall {
                id: "m1".into(),
                name: "start_swarm".into(),
                args: json!({}),
            })
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("handled by the engine"));
    }
}
