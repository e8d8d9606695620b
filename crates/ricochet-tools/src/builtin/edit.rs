// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Write-category tools: whole-file writes, targeted content replacement,
//! line insertion, deletion and directory creation.

use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tracing::debug;

use crate::builtin::read_file::resolve;
use crate::tool::{Tool, ToolCall, ToolOutput};

/// Minimum similarity ratio (0–1) for a fuzzy replacement window to be
/// accepted when the exact search string is not found.
const FUZZY_THRESHOLD: f64 = 0.85;

async fn write_whole_file(workspace: &PathBuf, call: &ToolCall) -> ToolOutput {
    let path = match call.args.get("path").and_then(|v| v.as_str()) {
        Some(p) => p.to_string(),
        None => return ToolOutput::err(&call.id, "missing 'path'"),
    };
    let content = match call.args.get("content").and_then(|v| v.as_str()) {
        Some(c) => c.to_string(),
        None => return ToolOutput::err(&call.id, "missing 'content'"),
    };

    debug!(path = %path, bytes = content.len(), "write file tool");
    let resolved = resolve(workspace, &path);
    if let Some(parent) = resolved.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            return ToolOutput::err(&call.id, format!("mkdir error: {e}"));
        }
    }
    match tokio::fs::write(&resolved, &content).await {
        Ok(()) => ToolOutput::ok(
            &call.id,
            format!("wrote {} bytes to {path}", content.len()),
        ),
        Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
    }
}

pub struct WriteFileTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating it (and parent directories) if \
         needed and replacing it entirely if it exists. For small targeted \
         changes prefer replace_file_content."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Target file path" },
                "content": { "type": "string", "description": "Full new file content" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        write_whole_file(&self.workspace, call).await
    }
}

/// Alias some front-ends use for the same whole-file write.
pub struct WriteToFileTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for WriteToFileTool {
    fn name(&self) -> &str {
        "write_to_file"
    }

    fn description(&self) -> &str {
        "Write content to a file (same behavior as write_file)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        write_whole_file(&self.workspace, call).await
    }
}

pub struct CreateDirectoryTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for CreateDirectoryTool {
    fn name(&self) -> &str {
        "create_directory"
    }

    fn description(&self) -> &str {
        "Create a directory (and any missing parents)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let resolved = resolve(&self.workspace, path);
        match tokio::fs::create_dir_all(&resolved).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("created {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("mkdir error: {e}")),
        }
    }
}

pub struct DeleteFileTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file. Directories are refused; remove their contents first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": { "path": { "type": "string" } },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let resolved = resolve(&self.workspace, path);
        if resolved.is_dir() {
            return ToolOutput::err(&call.id, format!("{path} is a directory"));
        }
        match tokio::fs::remove_file(&resolved).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("deleted {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("delete error: {e}")),
        }
    }
}

// ─── replace_file_content ─────────────────────────────────────────────────────

pub struct ReplaceFileContentTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for ReplaceFileContentTool {
    fn name(&self) -> &str {
        "replace_file_content"
    }

    fn description(&self) -> &str {
        "Replace one occurrence of old_str with new_str in a file.\n\
         old_str must match exactly (whitespace included); when it does not, \
         a fuzzy line-window match above 85% similarity is accepted. Fails \
         when old_str is ambiguous (matches more than once)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "old_str": { "type": "string", "description": "Exact text to replace" },
                "new_str": { "type": "string", "description": "Replacement text" }
            },
            "required": ["path", "old_str", "new_str"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let old_str = match call.args.get("old_str").and_then(|v| v.as_str()) {
            Some(s) => s.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'old_str'"),
        };
        let new_str = call
            .args
            .get("new_str")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if old_str.is_empty() {
            return ToolOutput::err(&call.id, "'old_str' must not be empty");
        }

        let resolved = resolve(&self.workspace, &path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let occurrences = text.matches(&old_str).count();
        let new_text = match occurrences {
            1 => text.replacen(&old_str, &new_str, 1),
            0 => match fuzzy_replace(&text, &old_str, &new_str) {
                Some(t) => t,
                None => {
                    return ToolOutput::err(
                        &call.id,
                        "old_str not found in file (no exact or fuzzy match)",
                    )
                }
            },
            n => {
                return ToolOutput::err(
                    &call.id,
                    format!("old_str is ambiguous: {n} occurrences; add surrounding context"),
                )
            }
        };

        match tokio::fs::write(&resolved, &new_text).await {
            Ok(()) => ToolOutput::ok(&call.id, format!("replaced content in {path}")),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

/// Slide a window of `old` line-count over the file and accept the best
/// window whose similarity clears [`FUZZY_THRESHOLD`].
fn fuzzy_replace(text: &str, old: &str, new: &str) -> Option<String> {
    let file_lines: Vec<&str> = text.lines().collect();
    let old_lines: Vec<&str> = old.lines().collect();
    if old_lines.is_empty() || file_lines.len() < old_lines.len() {
        return None;
    }

    let mut best: Option<(f64, usize)> = None;
    for start in 0..=(file_lines.len() - old_lines.len()) {
        let window = file_lines[start..start + old_lines.len()].join("\n");
        let ratio = TextDiff::from_chars(old, window.as_str()).ratio() as f64;
        if ratio >= FUZZY_THRESHOLD && best.map(|(r, _)| ratio > r).unwrap_or(true) {
            best = Some((ratio, start));
        }
    }

    let (_, start) = best?;
    let mut out: Vec<String> = Vec::with_capacity(file_lines.len());
    out.extend(file_lines[..start].iter().map(|s| s.to_string()));
    out.extend(new.lines().map(|s| s.to_string()));
    out.extend(
        file_lines[start + old_lines.len()..]
            .iter()
            .map(|s| s.to_string()),
    );
    let mut joined = out.join("\n");
    if text.ends_with('\n') {
        joined.push('\n');
    }
    Some(joined)
}

// ─── insert_code_block ────────────────────────────────────────────────────────

pub struct InsertCodeBlockTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for InsertCodeBlockTool {
    fn name(&self) -> &str {
        "insert_code_block"
    }

    fn description(&self) -> &str {
        "Insert a block of text before the given 1-indexed line. line=0 \
         appends at the end of the file."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "line": { "type": "integer", "description": "1-indexed insertion point; 0 appends" },
                "content": { "type": "string" }
            },
            "required": ["path", "line", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let line = call.args.get("line").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'content'"),
        };

        let resolved = resolve(&self.workspace, &path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let mut lines: Vec<String> = text.lines().map(|s| s.to_string()).collect();
        let insert_at = if line == 0 || line > lines.len() + 1 {
            lines.len()
        } else {
            line - 1
        };
        let block: Vec<String> = content.lines().map(|s| s.to_string()).collect();
        let inserted = block.len();
        lines.splice(insert_at..insert_at, block);

        let mut joined = lines.join("\n");
        if text.ends_with('\n') || !text.contains('\n') {
            joined.push('\n');
        }
        match tokio::fs::write(&resolved, &joined).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                format!("inserted {inserted} lines into {path} at line {}", insert_at + 1),
            ),
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(args: Value) -> ToolCall {
        ToolCall {
            id: "e1".into(),
            name: "edit".into(),
            args,
        }
    }

    fn ws() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    // ── write_file ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn write_creates_file_and_parents() {
        let dir = ws();
        let t = WriteFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({"path": "deep/nested/f.txt", "content": "hello"})))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let got = std::fs::read_to_string(dir.path().join("deep/nested/f.txt")).unwrap();
        assert_eq!(got, "hello");
    }

    #[tokio::test]
    async fn write_overwrites_existing() {
        let dir = ws();
        std::fs::write(dir.path().join("f.txt"), "old").unwrap();
        let t = WriteFileTool {
            workspace: dir.path().to_path_buf(),
        };
        t.execute(&call(json!({"path": "f.txt", "content": "new"})))
            .await;
        assert_eq!(
            std::fs::read_to_string(dir.path().join("f.txt")).unwrap(),
            "new"
        );
    }

    #[tokio::test]
    async fn write_to_file_alias_behaves_identically() {
        let dir = ws();
        let t = WriteToFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({"path": "g.txt", "content": "x"})))
            .await;
        assert!(!out.is_error);
        assert!(dir.path().join("g.txt").exists());
    }

    #[tokio::test]
    async fn write_missing_content_is_error() {
        let dir = ws();
        let t = WriteFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "f.txt"}))).await;
        assert!(out.is_error);
    }

    // ── create_directory / delete_file ────────────────────────────────────────

    #[tokio::test]
    async fn create_directory_makes_parents() {
        let dir = ws();
        let t = CreateDirectoryTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "a/b/c"}))).await;
        assert!(!out.is_error);
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn delete_file_removes_file() {
        let dir = ws();
        std::fs::write(dir.path().join("gone.txt"), "x").unwrap();
        let t = DeleteFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "gone.txt"}))).await;
        assert!(!out.is_error);
        assert!(!dir.path().join("gone.txt").exists());
    }

    #[tokio::test]
    async fn delete_refuses_directories() {
        let dir = ws();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let t = DeleteFileTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call(json!({"path": "sub"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("directory"));
    }

    // ── replace_file_content ──────────────────────────────────────────────────

    #[tokio::test]
    async fn exact_replacement_works() {
        let dir = ws();
        std::fs::write(dir.path().join("f.rs"), "fn a() {}\nfn b() {}\n").unwrap();
        let t = ReplaceFileContentTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({
                "path": "f.rs",
                "old_str": "fn b() {}",
                "new_str": "fn b() { todo!() }"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let got = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert!(got.contains("todo!()"));
        assert!(got.contains("fn a() {}"));
    }

    #[tokio::test]
    async fn ambiguous_replacement_is_error() {
        let dir = ws();
        std::fs::write(dir.path().join("f.txt"), "dup\ndup\n").unwrap();
        let t = ReplaceFileContentTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({"path": "f.txt", "old_str": "dup", "new_str": "x"})))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("ambiguous"));
    }

    #[tokio::test]
    async fn fuzzy_replacement_tolerates_whitespace_drift() {
        let dir = ws();
        std::fs::write(
            dir.path().join("f.rs"),
            "fn compute(x: i32)  -> i32 {\n    x + 1\n}\n",
        )
        .unwrap();
        let t = ReplaceFileContentTool {
            workspace: dir.path().to_path_buf(),
        };
        // old_str has single space before "->" — not an exact match
        let out = t
            .execute(&call(json!({
                "path": "f.rs",
                "old_str": "fn compute(x: i32) -> i32 {\n    x + 1\n}",
                "new_str": "fn compute(x: i32) -> i32 {\n    x + 2\n}"
            })))
            .await;
        assert!(!out.is_error, "{}", out.content);
        let got = std::fs::read_to_string(dir.path().join("f.rs")).unwrap();
        assert!(got.contains("x + 2"));
    }

    #[tokio::test]
    async fn no_match_at_all_is_error() {
        let dir = ws();
        std::fs::write(dir.path().join("f.txt"), "completely different\n").unwrap();
        let t = ReplaceFileContentTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({
                "path": "f.txt",
                "old_str": "nothing like this exists here",
                "new_str": "x"
            })))
            .await;
        assert!(out.is_error);
        assert!(out.content.contains("not found"));
    }

    // ── insert_code_block ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn insert_before_line() {
        let dir = ws();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\n").unwrap();
        let t = InsertCodeBlockTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({"path": "f.txt", "line": 2, "content": "inserted"})))
            .await;
        assert!(!out.is_error);
        let got = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(got, "one\ninserted\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn insert_line_zero_appends() {
        let dir = ws();
        std::fs::write(dir.path().join("f.txt"), "a\nb\n").unwrap();
        let t = InsertCodeBlockTool {
            workspace: dir.path().to_path_buf(),
        };
        t.execute(&call(json!({"path": "f.txt", "line": 0, "content": "tail"})))
            .await;
        let got = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(got, "a\nb\ntail\n");
    }

    #[tokio::test]
    async fn insert_multi_line_block() {
        let dir = ws();
        std::fs::write(dir.path().join("f.txt"), "top\nbottom\n").unwrap();
        let t = InsertCodeBlockTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(json!({"path": "f.txt", "line": 2, "content": "m1\nm2"})))
            .await;
        assert!(out.content.contains("inserted 2 lines"));
        let got = std::fs::read_to_string(dir.path().join("f.txt")).unwrap();
        assert_eq!(got, "top\nm1\nm2\nbottom\n");
    }
}
