// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Context window management: estimate, condense via summarization, slide.
//!
//! The manager never throws the original system messages away, and the
//! recent tail survives verbatim — only the middle of the history is traded
//! for a model-written summary.  When the summarization call itself fails,
//! the deterministic drop path still guarantees the result fits.

use ricochet_model::{Message, ModelProvider, Role};
use tracing::warn;

use crate::events::ContextStatus;

/// Per-result cap when serializing tool results into the summary prompt.
const RESULT_SNIPPET_BYTES: usize = 2_048;

/// Output budget handed to the summarization call.
const SUMMARY_MAX_TOKENS: u32 = 1_024;

const SUMMARIZE_PROMPT: &str =
    "You are a context compaction assistant. Summarise the following conversation history \
     in a concise, information-dense way. Preserve all technical details, decisions, file \
     names, code snippets, and tool outputs that may be relevant to future work. \
     The summary will replace the original history to free up context space.";

#[derive(Debug, Clone)]
pub struct CondenseResult {
    pub messages: Vec<Message>,
    pub tokens_used: usize,
    pub tokens_max: usize,
    pub percent: f32,
    pub was_condensed: bool,
    pub was_truncated: bool,
    /// The generated summary; empty when no condensation happened.
    pub summary: String,
}

impl CondenseResult {
    pub fn status(&self) -> ContextStatus {
        ContextStatus {
            tokens_used: self.tokens_used,
            tokens_max: self.tokens_max,
            percent: self.percent,
            was_condensed: self.was_condensed,
            was_truncated: self.was_truncated,
        }
    }
}

/// Estimated tokens for a system prompt plus message log (`len/4`).
pub fn estimate_tokens(system: &str, messages: &[Message]) -> usize {
    system.len() / 4 + messages.iter().map(|m| m.approx_tokens()).sum::<usize>()
}

/// Largest byte index `<= max` that sits on a UTF-8 char boundary of `s`.
/// Slicing at an unchecked byte offset panics on multi-byte content, and
/// tool output is routinely non-ASCII.
pub(crate) fn floor_char_boundary(s: &str, max: usize) -> usize {
    let mut end = max.min(s.len());
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Manage the context window for one provider call.
///
/// 1. Under `threshold × budget` → pass through unchanged.
/// 2. Otherwise summarise everything except the original system messages and
///    the last `keep_recent` messages, and rebuild as
///    `[system…] + [summary system message] + [tail…]`.
/// 3. Still over budget → drop oldest non-system, non-tail messages.
pub async fn manage_context(
    provider: &dyn ModelProvider,
    system: &str,
    messages: Vec<Message>,
    budget: usize,
    threshold: f32,
    keep_recent: usize,
) -> CondenseResult {
    let tokens = estimate_tokens(system, &messages);
    let max = budget.max(1);
    if budget == 0 || (tokens as f32) < threshold * budget as f32 {
        return CondenseResult {
            percent: tokens as f32 / max as f32,
            messages,
            tokens_used: tokens,
            tokens_max: budget,
            was_condensed: false,
            was_truncated: false,
            summary: String::new(),
        };
    }

    let system_messages: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .cloned()
        .collect();
    let non_system: Vec<Message> = messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    let keep = keep_recent.min(non_system.len());
    let tail_start = non_system.len() - keep;
    let to_summarize = &non_system[..tail_start];
    let tail = &non_system[tail_start..];

    // Summarize the middle.  An empty middle means there is nothing to trade
    // for space; go straight to truncation.
    let summary = if to_summarize.is_empty() {
        String::new()
    } else {
        let prompt = format!(
            "{SUMMARIZE_PROMPT}\n\n---\n\n{}",
            serialize_history(to_summarize)
        );
        match provider.summarize(&prompt, SUMMARY_MAX_TOKENS).await {
            Ok(s) => s,
            Err(e) => {
                warn!("summarization failed, falling back to truncation: {e}");
                String::new()
            }
        }
    };

    let was_condensed = !summary.is_empty();
    let mut rebuilt: Vec<Message> = system_messages.clone();
    if was_condensed {
        rebuilt.push(Message::system(format!(
            "[Previous context summary]\n{summary}"
        )));
    }
    let head_len = rebuilt.len();
    rebuilt.extend(tail.iter().cloned());

    // When summarization produced nothing, the middle was dropped outright —
    // that is a truncation, not a condensation.
    let mut was_truncated = !was_condensed && !to_summarize.is_empty();
    // Slide: drop the oldest kept messages until the estimate fits.
    let mut tokens_used = estimate_tokens(system, &rebuilt);
    while tokens_used > budget && rebuilt.len() > head_len {
        rebuilt.remove(head_len);
        was_truncated = true;
        tokens_used = estimate_tokens(system, &rebuilt);
    }

    CondenseResult {
        tokens_used,
        tokens_max: budget,
        percent: tokens_used as f32 / max as f32,
        messages: rebuilt,
        was_condensed,
        was_truncated,
        summary,
    }
}

/// Serialize history for the summarization prompt: tool calls rendered as
/// `NAME(args)`, tool results truncated to ~2 KB each.
fn serialize_history(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::System => "System",
            };
            let mut parts: Vec<String> = Vec::new();
            if !m.content.is_empty() {
                parts.push(m.content.clone());
            }
            for c in &m.tool_calls {
                parts.push(format!("[tool_call: {}({})]", c.name, c.arguments));
            }
            for r in &m.tool_results {
                let snippet = if r.content.len() > RESULT_SNIPPET_BYTES {
                    let cut = floor_char_boundary(&r.content, RESULT_SNIPPET_BYTES);
                    format!(
                        "{}…[{} bytes truncated]",
                        &r.content[..cut],
                        r.content.len() - cut
                    )
                } else {
                    r.content.clone()
                };
                parts.push(format!("[tool_result: {snippet}]"));
            }
            format!("{role}: {}", parts.join(" "))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
