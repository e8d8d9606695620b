// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{floor_char_boundary, Tool, ToolCall, ToolOutput};

const MAX_OUTPUT_BYTES: usize = 30_000;

async fn run_shell(
    workspace: &PathBuf,
    timeout_secs: u64,
    call: &ToolCall,
) -> ToolOutput {
    let command = match call.args.get("command").and_then(|v| v.as_str()) {
        Some(c) => c.to_string(),
        None => return ToolOutput::err(&call.id, "missing 'command'"),
    };
    let cwd = call
        .args
        .get("cwd")
        .and_then(|v| v.as_str())
        .map(|c| workspace.join(c))
        .unwrap_or_else(|| workspace.clone());

    debug!(command = %command, cwd = %cwd.display(), "exec tool");

    let child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(&cwd)
        .kill_on_drop(true)
        .output();

    let output = if timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(timeout_secs), child).await {
            Ok(r) => r,
            Err(_) => {
                return ToolOutput::err(
                    &call.id,
                    format!("command timed out after {timeout_secs}s: {command}"),
                )
            }
        }
    } else {
        child.await
    };

    let output = match output {
        Ok(o) => o,
        Err(e) => return ToolOutput::err(&call.id, format!("spawn error: {e}")),
    };

    let mut text = String::new();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stdout.is_empty() {
        text.push_str(&stdout);
    }
    if !stderr.is_empty() {
        if !text.is_empty() {
            text.push_str("\n--- stderr ---\n");
        }
        text.push_str(&stderr);
    }
    if text.len() > MAX_OUTPUT_BYTES {
        let cut = floor_char_boundary(&text, MAX_OUTPUT_BYTES);
        let omitted = text.len() - cut;
        text.truncate(cut);
        text.push_str(&format!("\n...[{omitted} bytes of output omitted]"));
    }

    let code = output.status.code().unwrap_or(-1);
    if output.status.success() {
        if text.is_empty() {
            text = "(no output)".into();
        }
        ToolOutput::ok(&call.id, text)
    } else {
        ToolOutput::err(&call.id, format!("exit code {code}\n{text}"))
    }
}

pub struct ExecuteCommandTool {
    pub workspace: PathBuf,
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace. stdout and stderr are captured; \
         a non-zero exit code is reported as a tool error with the output \
         attached. Long-running commands are killed at the configured timeout."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command line" },
                "cwd": { "type": "string", "description": "Working directory relative to the workspace" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        run_shell(&self.workspace, self.timeout_secs, call).await
    }
}

/// Alias name kept for front-ends that send `run_command`.
pub struct RunCommandTool {
    pub workspace: PathBuf,
    pub timeout_secs: u64,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run a shell command (same behavior as execute_command)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "cwd": { "type": "string" }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        run_shell(&self.workspace, self.timeout_secs, call).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
