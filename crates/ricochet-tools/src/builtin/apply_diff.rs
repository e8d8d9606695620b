// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::read_file::resolve;
use crate::tool::{Tool, ToolCall, ToolOutput};

pub struct ApplyDiffTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for ApplyDiffTool {
    fn name(&self) -> &str {
        "apply_diff"
    }

    fn description(&self) -> &str {
        "Apply a unified diff to one file.\n\
         Format: one or more hunks, each starting with @@ (hunk line numbers \
         are ignored; context lines anchor the hunk).\n\
          context line (space prefix)\n\
         -removed line\n\
         +added line\n\
         Hunks are located by their context+removed lines; the tool fails if \
         a hunk does not match anywhere or matches more than once."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "File to patch" },
                "diff": { "type": "string", "description": "Unified diff hunks for this file" }
            },
            "required": ["path", "diff"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let path = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'path'"),
        };
        let diff = match call.args.get("diff").and_then(|v| v.as_str()) {
            Some(d) => d.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'diff'"),
        };

        debug!(path = %path, "apply_diff tool");
        let resolved = resolve(&self.workspace, &path);
        let text = match tokio::fs::read_to_string(&resolved).await {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("read error: {e}")),
        };

        let patched = match apply_unified_diff(&text, &diff) {
            Ok(t) => t,
            Err(e) => return ToolOutput::err(&call.id, format!("patch error: {e}")),
        };

        match tokio::fs::write(&resolved, &patched).await {
            Ok(()) => {
                let hunks = diff.lines().filter(|l| l.starts_with("@@")).count().max(1);
                ToolOutput::ok(&call.id, format!("applied {hunks} hunk(s) to {path}"))
            }
            Err(e) => ToolOutput::err(&call.id, format!("write error: {e}")),
        }
    }
}

struct Hunk {
    /// Lines the hunk expects to find (context + removed), in order.
    expect: Vec<String>,
    /// Lines the matched region is replaced with (context + added), in order.
    replace: Vec<String>,
}

fn parse_hunks(diff: &str) -> anyhow::Result<Vec<Hunk>> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        // File headers from `diff -u` output are tolerated and skipped.
        if line.starts_with("---") || line.starts_with("+++") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                hunks.push(h);
            }
            current = Some(Hunk {
                expect: Vec::new(),
                replace: Vec::new(),
            });
            continue;
        }
        let Some(h) = current.as_mut() else {
            if line.trim().is_empty() {
                continue;
            }
            anyhow::bail!("diff content before first @@ hunk header");
        };
        if let Some(rest) = line.strip_prefix('-') {
            h.expect.push(rest.to_string());
        } else if let Some(rest) = line.strip_prefix('+') {
            h.replace.push(rest.to_string());
        } else {
            // Context: either " line" or (tolerated) a bare line.
            let ctx = line.strip_prefix(' ').unwrap_or(line).to_string();
            h.expect.push(ctx.clone());
            h.replace.push(ctx);
        }
    }
    if let Some(h) = current.take() {
        hunks.push(h);
    }
    if hunks.is_empty() {
        anyhow::bail!("no @@ hunks found in diff");
    }
    Ok(hunks)
}

/// Apply parsed hunks by exact context match.  Each hunk must match exactly
/// one region of the current file state (hunks are applied in order, so a
/// later hunk sees the effects of earlier ones).
fn apply_unified_diff(text: &str, diff: &str) -> anyhow::Result<String> {
    let hunks = parse_hunks(diff)?;
    let had_trailing_newline = text.ends_with('\n');
    let mut lines: Vec<String> = text.lines().map(|s| s.to_string()).collect();

    for (idx, hunk) in hunks.iter().enumerate() {
        if hunk.expect.is_empty() {
            // Pure insertion without context: append at end.
            lines.extend(hunk.replace.iter().cloned());
            continue;
        }
        let positions: Vec<usize> = (0..=lines.len().saturating_sub(hunk.expect.len()))
            .filter(|&start| {
                lines[start..start + hunk.expect.len()]
                    .iter()
                    .zip(&hunk.expect)
                    .all(|(a, b)| a == b)
            })
            .collect();
        match positions.len() {
            0 => anyhow::bail!("hunk {} does not match the file", idx + 1),
            1 => {
                let start = positions[0];
                lines.splice(start..start + hunk.expect.len(), hunk.replace.iter().cloned());
            }
            n => anyhow::bail!(
                "hunk {} is ambiguous ({n} matches); add more context lines",
                idx + 1
            ),
        }
    }

    let mut out = lines.join("\n");
    if had_trailing_newline {
        out.push('\n');
    }
    Ok(out)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const FILE: &str = "fn main() {\n    let x = 1;\n    println!(\"{x}\");\n}\n";

    #[test]
    fn simple_hunk_applies() {
        let diff = "@@\n     let x = 1;\n-    println!(\"{x}\");\n+    println!(\"x = {x}\");\n";
        let out = apply_unified_diff(FILE, diff).unwrap();
        assert!(out.contains("x = {x}"));
        assert!(out.contains("let x = 1;"));
    }

    #[test]
    fn removal_only_hunk() {
        let diff = "@@\n-    let x = 1;\n";
        let out = apply_unified_diff(FILE, diff).unwrap();
        assert!(!out.contains("let x = 1;"));
        assert!(out.contains("fn main()"));
    }

    #[test]
    fn addition_with_context() {
        let diff = "@@\n fn main() {\n+    // entry\n";
        let out = apply_unified_diff(FILE, diff).unwrap();
        assert!(out.starts_with("fn main() {\n    // entry\n"));
    }

    #[test]
    fn non_matching_hunk_is_error() {
        let diff = "@@\n-this line is not in the file\n+x\n";
        let err = apply_unified_diff(FILE, diff).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn ambiguous_hunk_is_error() {
        let text = "same\nsame\n";
        let diff = "@@\n-same\n+different\n";
        let err = apply_unified_diff(text, diff).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }

    #[test]
    fn multiple_hunks_apply_in_order() {
        let diff = "@@\n-fn main() {\n+fn main() { // patched\n@@\n-    let x = 1;\n+    let x = 2;\n";
        let out = apply_unified_diff(FILE, diff).unwrap();
        assert!(out.contains("// patched"));
        assert!(out.contains("let x = 2;"));
    }

    #[test]
    fn file_headers_are_tolerated() {
        let diff = "--- a/f.rs\n+++ b/f.rs\n@@\n-    let x = 1;\n+    let x = 9;\n";
        let out = apply_unified_diff(FILE, diff).unwrap();
        assert!(out.contains("let x = 9;"));
    }

    #[test]
    fn empty_diff_is_error() {
        assert!(apply_unified_diff(FILE, "").is_err());
    }

    #[test]
    fn trailing_newline_preserved() {
        let diff = "@@\n-    let x = 1;\n+    let x = 3;\n";
        let out = apply_unified_diff(FILE, diff).unwrap();
        assert!(out.ends_with("}\n"));
    }

    #[tokio::test]
    async fn tool_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.rs"), FILE).unwrap();
        let t = ApplyDiffTool {
            workspace: dir.path().to_path_buf(),
        };
        let call = ToolCall {
            id: "d1".into(),
            name: "apply_diff".into(),
            args: json!({
                "path": "m.rs",
                "diff": "@@\n-    let x = 1;\n+    let x = 42;\n"
            }),
        };
        let out = t.execute(&call).await;
        assert!(!out.is_error, "{}", out.content);
        let got = std::fs::read_to_string(dir.path().join("m.rs")).unwrap();
        assert!(got.contains("let x = 42;"));
    }

    #[tokio::test]
    async fn tool_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = ApplyDiffTool {
            workspace: dir.path().to_path_buf(),
        };
        let call = ToolCall {
            id: "d2".into(),
            name: "apply_diff".into(),
            args: json!({"path": "ghost.rs", "diff": "@@\n-x\n+y\n"}),
        };
        let out = t.execute(&call).await;
        assert!(out.is_error);
    }
}
