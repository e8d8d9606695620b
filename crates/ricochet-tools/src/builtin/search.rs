// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Workspace search tools: regex grep, filename lookup, and a lightweight
//! relevance search used when no embedding index is configured.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::tool::{Tool, ToolCall, ToolOutput};

const MAX_MATCHES: usize = 100;
const MAX_FILE_BYTES: u64 = 1_000_000;

/// Directories that are never worth searching.
fn skip_dir(name: &str) -> bool {
    matches!(
        name,
        ".git" | "target" | "node_modules" | ".ricochet" | "dist" | "build" | ".venv"
    )
}

fn walk_files(root: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|n| !skip_dir(n))
                .unwrap_or(true)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| e.metadata().map(|m| m.len() <= MAX_FILE_BYTES).unwrap_or(false))
        .map(|e| e.into_path())
}

fn rel(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

// ─── grep_search ──────────────────────────────────────────────────────────────

pub struct GrepSearchTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Returns matches as \
         path:line:text, capped at 100. Use case_sensitive=false for \
         case-insensitive search and include to filter by filename substring."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Regular expression to search for" },
                "include": { "type": "string", "description": "Only search files whose path contains this substring" },
                "case_sensitive": { "type": "boolean", "description": "Default true" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'query'"),
        };
        let include = call
            .args
            .get("include")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());
        let case_sensitive = call
            .args
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let re = match RegexBuilder::new(&query)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid regex: {e}")),
        };

        let root = self.workspace.clone();
        let out = tokio::task::spawn_blocking(move || {
            let mut matches: Vec<String> = Vec::new();
            let mut total = 0usize;
            for path in walk_files(&root) {
                let relpath = rel(&root, &path);
                if let Some(inc) = &include {
                    if !relpath.contains(inc.as_str()) {
                        continue;
                    }
                }
                let Ok(text) = std::fs::read_to_string(&path) else {
                    continue; // binary or unreadable
                };
                for (i, line) in text.lines().enumerate() {
                    if re.is_match(line) {
                        total += 1;
                        if matches.len() < MAX_MATCHES {
                            matches.push(format!("{relpath}:{}:{}", i + 1, line.trim_end()));
                        }
                    }
                }
            }
            (matches, total)
        })
        .await;

        let (matches, total) = match out {
            Ok(x) => x,
            Err(e) => return ToolOutput::err(&call.id, format!("search failed: {e}")),
        };

        if matches.is_empty() {
            return ToolOutput::ok(&call.id, "no matches");
        }
        let mut content = matches.join("\n");
        if total > MAX_MATCHES {
            content.push_str(&format!(
                "\n...[{} more matches omitted; use a more specific pattern]",
                total - MAX_MATCHES
            ));
        }
        ToolOutput::ok(&call.id, content)
    }
}

// ─── find_by_name ─────────────────────────────────────────────────────────────

pub struct FindByNameTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for FindByNameTool {
    fn name(&self) -> &str {
        "find_by_name"
    }

    fn description(&self) -> &str {
        "Find files whose name matches a glob-like pattern ('*' and '?' \
         supported, matched against the file name, or against the whole \
         relative path when the pattern contains '/')."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "e.g. *.rs or src/*/main.rs" }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p.to_string(),
            None => return ToolOutput::err(&call.id, "missing 'pattern'"),
        };
        let Some(re) = glob_to_regex(&pattern) else {
            return ToolOutput::err(&call.id, "invalid pattern");
        };
        let match_full_path = pattern.contains('/');

        let root = self.workspace.clone();
        let found = tokio::task::spawn_blocking(move || {
            let mut found: Vec<String> = Vec::new();
            for path in walk_files(&root) {
                let relpath = rel(&root, &path);
                let candidate = if match_full_path {
                    relpath.clone()
                } else {
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default()
                };
                if re.is_match(&candidate) {
                    found.push(relpath);
                    if found.len() >= MAX_MATCHES {
                        break;
                    }
                }
            }
            found.sort();
            found
        })
        .await
        .unwrap_or_default();

        if found.is_empty() {
            ToolOutput::ok(&call.id, "no files found")
        } else {
            ToolOutput::ok(&call.id, found.join("\n"))
        }
    }
}

/// Convert a simple shell glob pattern to a [`regex::Regex`].
/// Only `*` (match anything) and `?` (match one char) are supported.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut re = String::from("^");
    for ch in pattern.chars() {
        match ch {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            c => {
                for esc in regex::escape(&c.to_string()).chars() {
                    re.push(esc);
                }
            }
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}

// ─── codebase_search ──────────────────────────────────────────────────────────

pub struct CodebaseSearchTool {
    pub workspace: PathBuf,
}

#[async_trait]
impl Tool for CodebaseSearchTool {
    fn name(&self) -> &str {
        "codebase_search"
    }

    fn description(&self) -> &str {
        "Relevance search across the codebase. Splits the query into terms and \
         ranks lines by how many distinct terms they contain. Better than \
         grep_search when you only know roughly what you are looking for."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language or keyword query" }
            },
            "required": ["query"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let query = match call.args.get("query").and_then(|v| v.as_str()) {
            Some(q) => q.to_lowercase(),
            None => return ToolOutput::err(&call.id, "missing 'query'"),
        };
        let terms: Vec<String> = query
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|t| t.len() >= 3)
            .map(|t| t.to_string())
            .collect();
        if terms.is_empty() {
            return ToolOutput::err(&call.id, "query has no searchable terms (min 3 chars)");
        }

        let root = self.workspace.clone();
        let ranked = tokio::task::spawn_blocking(move || {
            // (score, path:line:text) — score = distinct terms matched
            let mut hits: Vec<(usize, String)> = Vec::new();
            for path in walk_files(&root) {
                let relpath = rel(&root, &path);
                let Ok(text) = std::fs::read_to_string(&path) else {
                    continue;
                };
                for (i, line) in text.lines().enumerate() {
                    let lower = line.to_lowercase();
                    let score = terms.iter().filter(|t| lower.contains(t.as_str())).count();
                    if score > 0 {
                        hits.push((score, format!("{relpath}:{}:{}", i + 1, line.trim_end())));
                    }
                }
            }
            // Highest score first; insertion order breaks ties.
            hits.sort_by(|a, b| b.0.cmp(&a.0));
            hits.truncate(30);
            hits
        })
        .await
        .unwrap_or_default();

        if ranked.is_empty() {
            return ToolOutput::ok(&call.id, "no relevant lines found");
        }
        let content: Vec<String> = ranked
            .into_iter()
            .map(|(score, line)| format!("[{score}] {line}"))
            .collect();
        ToolOutput::ok(&call.id, content.join("\n"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "s1".into(),
            name: name.into(),
            args,
        }
    }

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(
            dir.path().join("src/main.rs"),
            "fn main() {\n    println!(\"hello\");\n}\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("src/lib.rs"),
            "pub fn greet_user(name: &str) -> String {\n    format!(\"hi {name}\")\n}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("README.md"), "A greeting library\n").unwrap();
        dir
    }

    // ── grep_search ───────────────────────────────────────────────────────────

    #[tokio::test]
    async fn grep_finds_matches_with_location() {
        let dir = fixture();
        let t = GrepSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call("grep_search", json!({"query": "fn main"}))).await;
        assert!(!out.is_error);
        assert!(out.content.contains("src/main.rs:1:"), "{}", out.content);
    }

    #[tokio::test]
    async fn grep_no_matches_reports_cleanly() {
        let dir = fixture();
        let t = GrepSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call("grep_search", json!({"query": "nonexistent_symbol_xyz"})))
            .await;
        assert_eq!(out.content, "no matches");
    }

    #[tokio::test]
    async fn grep_invalid_regex_is_error() {
        let dir = fixture();
        let t = GrepSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call("grep_search", json!({"query": "[unclosed"}))).await;
        assert!(out.is_error);
        assert!(out.content.contains("invalid regex"));
    }

    #[tokio::test]
    async fn grep_include_filters_by_path() {
        let dir = fixture();
        let t = GrepSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(
                "grep_search",
                json!({"query": "greet|hello", "include": "lib"}),
            ))
            .await;
        assert!(out.content.contains("lib.rs"));
        assert!(!out.content.contains("main.rs"));
    }

    #[tokio::test]
    async fn grep_case_insensitive_option() {
        let dir = fixture();
        let t = GrepSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call(
                "grep_search",
                json!({"query": "GREETING", "case_sensitive": false}),
            ))
            .await;
        assert!(out.content.contains("README.md"));
    }

    // ── find_by_name ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn find_by_extension() {
        let dir = fixture();
        let t = FindByNameTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call("find_by_name", json!({"pattern": "*.rs"}))).await;
        assert!(out.content.contains("src/lib.rs"));
        assert!(out.content.contains("src/main.rs"));
        assert!(!out.content.contains("README.md"));
    }

    #[tokio::test]
    async fn find_with_path_pattern() {
        let dir = fixture();
        let t = FindByNameTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call("find_by_name", json!({"pattern": "src/*.rs"})))
            .await;
        assert!(out.content.contains("src/main.rs"));
    }

    #[tokio::test]
    async fn find_nothing_reports_cleanly() {
        let dir = fixture();
        let t = FindByNameTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call("find_by_name", json!({"pattern": "*.zig"})))
            .await;
        assert_eq!(out.content, "no files found");
    }

    #[test]
    fn glob_question_mark_matches_one_char() {
        let re = glob_to_regex("a?.rs").unwrap();
        assert!(re.is_match("ab.rs"));
        assert!(!re.is_match("abc.rs"));
    }

    // ── codebase_search ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn codebase_search_ranks_multi_term_lines_higher() {
        let dir = fixture();
        let t = CodebaseSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t
            .execute(&call("codebase_search", json!({"query": "greet user name"})))
            .await;
        assert!(!out.is_error);
        // The lib.rs signature line contains all three terms → top-ranked.
        let first = out.content.lines().next().unwrap();
        assert!(first.contains("lib.rs"), "{}", out.content);
        assert!(first.starts_with("[3]") || first.starts_with("[2]"));
    }

    #[tokio::test]
    async fn codebase_search_short_terms_rejected() {
        let dir = fixture();
        let t = CodebaseSearchTool {
            workspace: dir.path().to_path_buf(),
        };
        let out = t.execute(&call("codebase_search", json!({"query": "a b"}))).await;
        assert!(out.is_error);
    }
}
