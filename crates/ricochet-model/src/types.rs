// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

// ─── Message types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Where a user message entered the engine from.  Purely informational; the
/// turn loop treats all sources identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    Ide,
    Telegram,
    Discord,
    Workflow,
    Subtask,
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Opaque identifier assigned by the provider (forwarded verbatim)
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one tool invocation, paired to its call by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            content: content.into(),
            is_error: true,
        }
    }
}

/// A single message in the conversation history.
///
/// Invariants maintained by [`crate::sanitize::sanitize`]:
/// - a message carries tool_calls or tool_results, never both;
/// - an assistant message with tool_calls is immediately followed by a user
///   message whose tool_results match those calls by id;
/// - every tool_result references exactly one earlier tool_call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Model reasoning, stored separately and never merged into `content`.
    /// Re-sent to providers that reject tool calls without prior reasoning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Assistant only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// User only
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_results: Vec<ToolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<MessageSource>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            source: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            source: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
            source: None,
        }
    }

    /// Assistant message carrying tool calls (and optionally text).
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            reasoning: None,
            tool_calls: calls,
            tool_results: Vec::new(),
            source: None,
        }
    }

    /// User message carrying tool results for a preceding assistant message.
    pub fn tool_results(results: Vec<ToolResult>) -> Self {
        Self {
            role: Role::User,
            content: String::new(),
            reasoning: None,
            tool_calls: Vec::new(),
            tool_results: results,
            source: None,
        }
    }

    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn has_tool_results(&self) -> bool {
        !self.tool_results.is_empty()
    }

    /// Approximate token count used for context management.
    ///
    /// Uses the 4-chars-per-token heuristic over content, reasoning, tool-call
    /// arguments and tool-result content; every message costs at least 1.
    pub fn approx_tokens(&self) -> usize {
        let mut chars = self.content.len();
        if let Some(r) = &self.reasoning {
            chars += r.len();
        }
        for tc in &self.tool_calls {
            chars += tc.name.len() + tc.arguments.to_string().len();
        }
        for tr in &self.tool_results {
            chars += tr.content.len();
        }
        (chars / 4).max(1)
    }
}

// ─── Request / response types ─────────────────────────────────────────────────

/// A tool schema provided to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object
    pub parameters: serde_json::Value,
}

/// Request sent to a model provider.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Model identifier; empty = the adapter's configured default.
    pub model: String,
    /// System prompt, separated from the message log because several vendors
    /// take it as a top-level field rather than a conversation turn.
    pub system: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub tools: Vec<ToolSchema>,
}

/// A non-streaming chat response.
#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: String,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<String>,
}

/// One canonical streaming event.
///
/// Adapters buffer vendor-specific tool-call argument fragments internally
/// and emit exactly one `ToolUse` per completed call.
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Text and/or reasoning delta.  Reasoning arrives separately so the
    /// engine can persist it without merging into the visible text.
    ContentDelta {
        text: String,
        reasoning: Option<String>,
    },
    /// One fully-buffered tool call.
    ToolUse {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// End-of-message metadata.
    MessageDelta { stop_reason: Option<String> },
    /// The stream finished normally.
    MessageStop,
}

impl StreamChunk {
    pub fn text(t: impl Into<String>) -> Self {
        Self::ContentDelta {
            text: t.into(),
            reasoning: None,
        }
    }

    pub fn reasoning(r: impl Into<String>) -> Self {
        Self::ContentDelta {
            text: String::new(),
            reasoning: Some(r.into()),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
