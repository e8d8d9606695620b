// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::builtin::read_file::resolve;
use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_ENTRIES: usize = 500;

pub struct ListDirTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List a directory. Entries are sorted, directories suffixed with '/', \
         file sizes in bytes. Defaults to the workspace root."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: workspace root)"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let resolved = resolve(&self.workspace, path);

        let mut rd = match tokio::fs::read_dir(&resolved).await {
            Ok(rd) => rd,
            Err(e) => return ToolOutput::err(&call.id, format!("list error: {e}")),
        };

        let mut entries: Vec<String> = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata().await {
                Ok(md) if md.is_dir() => entries.push(format!("{name}/")),
                Ok(md) => entries.push(format!("{name}  ({} B)", md.len())),
                Err(_) => entries.push(name),
            }
            if entries.len() >= MAX_ENTRIES {
                break;
            }
        }
        entries.sort();

        if entries.is_empty() {
            return ToolOutput::ok(&call.id, "(empty directory)");
        }
        let mut content = entries.join("\n");
        if entries.len() >= MAX_ENTRIES {
            content.push_str(&format!("\n...[listing capped at {MAX_ENTRIES} entries]"));
        }
        ToolOutput::ok(&call.id, content)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
