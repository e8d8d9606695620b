// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolCall, ToolOutput};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small to avoid flooding the model context on the first read; the agent
/// can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 200;

/// Hard byte ceiling applied in addition to the line limit.
/// Whichever constraint is hit first determines where the output is cut.
const MAX_BYTES: usize = 20_000;

/// Resolve a possibly-relative path against the workspace root.
pub(crate) fn resolve(workspace: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        workspace.join(p)
    }
}

async fn read_paginated(
    workspace: &Path,
    call: &ToolCall,
    default_limit: usize,
) -> ToolOutput {
    let path = match call.args.get("path").and_then(|v| v.as_str()) {
        Some(p) => p.to_string(),
        None => {
            let args_preview =
                serde_json::to_string(&call.args).unwrap_or_else(|_| "null".to_string());
            return ToolOutput::err(
                &call.id,
                format!("missing required parameter 'path'. Received: {args_preview}"),
            );
        }
    };
    let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
    let limit = call
        .args
        .get("limit")
        .and_then(|v| v.as_u64())
        .unwrap_or(default_limit as u64) as usize;

    debug!(path = %path, offset, limit, "read file tool");

    let resolved = resolve(workspace, &path);
    let bytes = match tokio::fs::read(&resolved).await {
        Ok(b) => b,
        Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
    };
    let text = String::from_utf8_lossy(&bytes);

    let start = offset.saturating_sub(1);
    let all_lines: Vec<&str> = text.lines().collect();
    let total = all_lines.len();

    // Collect lines up to both the line limit and the byte cap.
    let mut selected: Vec<String> = Vec::new();
    let mut byte_count: usize = 0;
    let mut truncated_by_bytes = false;
    for (i, line) in all_lines.iter().enumerate().skip(start).take(limit) {
        let line_bytes = line.len() + 1;
        if byte_count + line_bytes > MAX_BYTES {
            truncated_by_bytes = true;
            break;
        }
        selected.push(format!("L{}:{}", i + 1, line));
        byte_count += line_bytes;
    }

    let last_shown = start + selected.len();
    let mut content = selected.join("\n");

    if last_shown < total {
        let reason = if truncated_by_bytes {
            format!("byte limit ({MAX_BYTES} B) reached")
        } else {
            format!("{} more lines", total - last_shown)
        };
        content.push_str(&format!(
            "\n...[{} — showing L{}-L{} of {}; use offset={} to continue]",
            reason,
            offset,
            offset + selected.len().saturating_sub(1),
            total,
            last_shown + 1
        ));
    }

    ToolOutput::ok(&call.id, content)
}

pub struct ReadFileTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a file. Default: 200 lines / 20 KB — whichever comes first.\n\
         Lines formatted as L{n}:content (1-indexed).\n\
         When more lines exist, a pagination notice shows the next offset.\n\
         Strategy: use grep_search to find the relevant region first, then read\n\
         only those lines with offset+limit."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Absolute or workspace-relative path to the file"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        read_paginated(&self.workspace, call, DEFAULT_LINE_LIMIT).await
    }
}

/// Same reader under the alias name some front-ends send; a larger default
/// window because callers of this variant expect the whole file at once.
pub struct ViewFileTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for ViewFileTool {
    fn name(&self) -> &str {
        "view_file"
    }

    fn description(&self) -> &str {
        "View a file's contents with line numbers. Equivalent to read_file but \
         defaults to the full file (subject to the 20 KB cap)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path to the file" },
                "offset": { "type": "integer" },
                "limit": { "type": "integer" }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        read_paginated(&self.workspace, call, usize::MAX).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "r1".into(),
            name: "read_file".into(),
            args,
        }
    }

    fn fixture(content: &str) -> (tempfile::TempDir, ReadFileTool) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), content).unwrap();
        let tool = ReadFileTool {
            workspace: dir.path().to_path_buf(),
        };
        (dir, tool)
    }

    #[tokio::test]
    async fn reads_file_with_line_numbers() {
        let (_dir, t) = fixture("alpha\nbeta\ngamma\n");
        let out = t.execute(&call(json!({"path": "f.txt"}))).await;
        assert!(!out.is_error, "{}", out.content);
        assert!(out.content.contains("L1:alpha"));
        assert!(out.content.contains("L3:gamma"));
    }

    #[tokio::test]
    async fn offset_and_limit_work() {
        let (_dir, t) = fixture("line1\nline2\nline3\nline4\nline5\n");
        let out = t
            .execute(&call(json!({"path": "f.txt", "offset": 2, "limit": 2})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("L2:line2"));
        assert!(out.content.contains("L3:line3"));
        assert!(!out.content.contains("L1:"));
        assert!(!out.content.contains("L4:"));
    }

    #[tokio::test]
    async fn missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = ReadFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "nope.txt"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("read error"));
    }

    #[tokio::test]
    async fn missing_path_is_error() {
        let (_dir, t) = fixture("x");
        let out = t.execute(&call(json!({}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("missing required parameter 'path'"));
    }

    #[tokio::test]
    async fn pagination_notice_when_more_lines_exist() {
        let (_dir, t) = fixture("a\nb\nc\nd\ne\n");
        let out = t.execute(&call(json!({"path": "f.txt", "limit": 2}))).await;
        assert!(!out.is_error);
        assert!(
            out.content.contains("offset=3"),
            "should suggest next offset: {}",
            out.content
        );
    }

    #[tokio::test]
    async fn no_pagination_notice_when_all_lines_shown() {
        let (_dir, t) = fixture("x\ny\n");
        let out = t.execute(&call(json!({"path": "f.txt"}))).await;
        assert!(!out.is_error);
        assert!(!out.content.contains("offset="));
    }

    #[tokio::test]
    async fn byte_cap_truncates_before_line_limit() {
        let line = "x".repeat(49);
        let content: String = (0..500).map(|_| format!("{line}\n")).collect();
        let (_dir, t) = fixture(&content);
        let out = t
            .execute(&call(json!({"path": "f.txt", "limit": 500})))
            .await;
        assert!(!out.is_error);
        assert!(out.content.contains("byte limit"));
    }

    #[tokio::test]
    async fn view_file_defaults_to_whole_file() {
        let content: String = (0..300).map(|i| format!("line {i}\n")).collect();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), &content).unwrap();
        let t = ViewFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "f.txt"}))).await;
        // read_file would stop at 200; view_file shows all 300
        assert!(out.content.contains("L300:"), "{}", out.content);
    }

    #[tokio::test]
    async fn absolute_paths_bypass_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("abs.txt");
        std::fs::write(&file, "absolute\n").unwrap();
        let t = ReadFileTool {
            workspace: PathBuf::from("/somewhere/else"),
        };
        let out = t
            .execute(&call(json!({"path": file.to_str().unwrap()})))
            .await;
        assert!(out.content.contains("L1:absolute"));
    }
}
