// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! `@file` and `!{command}` expansion in user input.
//!
//! Expansion happens before the user message is appended to the session, so
//! the model sees the inlined content as part of the user's own words.  Read
//! failures produce info messages rather than failing the turn.

use std::path::Path;

use regex::Regex;

use crate::condense::floor_char_boundary;

const MAX_INLINE_BYTES: usize = 20_000;

/// Byte-cap a string on a char boundary; `String::truncate` panics when the
/// index splits a multi-byte character.
fn truncate_inline(text: &mut String) {
    if text.len() > MAX_INLINE_BYTES {
        let cut = floor_char_boundary(text, MAX_INLINE_BYTES);
        text.truncate(cut);
        text.push_str("\n…[truncated]");
    }
}

/// Result of one preprocessing pass.
#[derive(Debug, Clone)]
pub struct Expanded {
    pub content: String,
    /// One line per expansion (or failed expansion) for the UI.
    pub info: Vec<String>,
}

pub fn process(content: &str, workspace: &Path) -> Expanded {
    let mut info = Vec::new();

    // `!{command}` first, so a command's output containing @words is not
    // then treated as a file reference.
    let cmd_re = Regex::new(r"!\{([^}]+)\}").expect("static regex");
    let content = cmd_re
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let cmd = caps[1].trim().to_string();
            match run_command(&cmd, workspace) {
                Ok(output) => {
                    info.push(format!("expanded !{{{cmd}}}"));
                    format!("\n```\n$ {cmd}\n{output}\n```\n")
                }
                Err(e) => {
                    info.push(format!("could not run !{{{cmd}}}: {e}"));
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    let file_re = Regex::new(r"@([\w~./-]+)").expect("static regex");
    let content = file_re
        .replace_all(&content, |caps: &regex::Captures<'_>| {
            let path = caps[1].to_string();
            let full = workspace.join(&path);
            match std::fs::read_to_string(&full) {
                Ok(mut text) => {
                    truncate_inline(&mut text);
                    info.push(format!("inlined @{path}"));
                    format!("\n```{path}\n{text}\n```\n")
                }
                Err(e) => {
                    info.push(format!("could not read @{path}: {e}"));
                    caps[0].to_string()
                }
            }
        })
        .into_owned();

    Expanded { content, info }
}

fn run_command(cmd: &str, workspace: &Path) -> Result<String, String> {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .current_dir(workspace)
        .output()
        .map_err(|e| e.to_string())?;
    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }
    truncate_inline(&mut text);
    Ok(text.trim_end().to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
