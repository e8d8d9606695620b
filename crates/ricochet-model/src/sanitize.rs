// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Conversation-history repair: restore the tool-call/tool-result pairing
//! invariants before every provider call.
//!
//! Providers reject histories where a `tool_use` block has no matching
//! `tool_result` (or vice versa) with a 400.  Aborted turns, crashed tools
//! and resumed sessions can all leave the log in that state, so the engine
//! runs [`sanitize`] on the outgoing message list every time.  The repair is
//! deliberately conservative: synthesize what is missing, drop what is
//! orphaned, touch nothing else.

use tracing::warn;

use crate::types::{Message, Role, ToolResult};

const MISSING_RESULT: &str = "Tool execution result missing";

/// Restore the pairing invariants over `messages`:
///
/// - an assistant message with tool calls followed by anything other than a
///   matching user message with tool results gets a synthetic
///   `is_error = true` result per dangling call — merged into the next user
///   text message when there is one, otherwise inserted as a fresh user
///   message;
/// - a user message with tool results that no preceding assistant call
///   accounts for is dropped (results referencing unknown call ids are
///   removed individually);
/// - a trailing assistant message with tool calls gets synthesized error
///   results appended.
///
/// Idempotent: `sanitize(sanitize(xs)) == sanitize(xs)`.  The relative order
/// of all surviving messages is preserved.
pub fn sanitize(messages: Vec<Message>) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    let mut iter = messages.into_iter().peekable();

    while let Some(mut msg) = iter.next() {
        // Tool calls only make sense on assistant messages; tool results only
        // on user messages.  Strip anything else outright.
        if msg.role != Role::Assistant && !msg.tool_calls.is_empty() {
            warn!(role = ?msg.role, "stripping tool calls from non-assistant message");
            msg.tool_calls.clear();
        }
        if msg.role != Role::User && !msg.tool_results.is_empty() {
            warn!(role = ?msg.role, "stripping tool results from non-user message");
            msg.tool_results.clear();
        }
        // A message must not carry both; the calls win on an assistant turn.
        if !msg.tool_calls.is_empty() && !msg.tool_results.is_empty() {
            msg.tool_results.clear();
        }

        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            let call_ids: Vec<String> = msg.tool_calls.iter().map(|c| c.id.clone()).collect();
            out.push(msg);

            // Pair the following user message (if any) with these calls.
            let next_is_user = matches!(iter.peek(), Some(n) if n.role == Role::User);
            if next_is_user {
                let mut user = iter.next().expect("peeked");
                // Keep only results that answer one of our calls; anything
                // else references a summarised-away or foreign call id.
                user.tool_results.retain(|r| {
                    let known = call_ids.contains(&r.call_id);
                    if !known {
                        warn!(call_id = %r.call_id, "dropping tool result with unknown call id");
                    }
                    known
                });
                // Synthesize a result for every call the user message missed.
                for id in &call_ids {
                    if !user.tool_results.iter().any(|r| &r.call_id == id) {
                        user.tool_results.push(ToolResult::err(id, MISSING_RESULT));
                    }
                }
                out.push(user);
            } else {
                // Next message is assistant/system or the history ends here:
                // insert a fresh user message carrying synthesized results.
                let results = call_ids
                    .iter()
                    .map(|id| ToolResult::err(id, MISSING_RESULT))
                    .collect();
                out.push(Message::tool_results(results));
            }
            continue;
        }

        if msg.role == Role::User && !msg.tool_results.is_empty() {
            // Reached only when the preceding message was not an
            // assistant-with-calls (those consume their user pair above).
            warn!(
                count = msg.tool_results.len(),
                "dropping orphaned tool results"
            );
            msg.tool_results.clear();
            if msg.content.is_empty() {
                continue; // nothing left of this message
            }
        }

        out.push(msg);
    }

    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
