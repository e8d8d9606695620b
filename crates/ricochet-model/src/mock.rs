// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use serde_json::Value;

use crate::{
    error::ProviderError,
    provider::{ChunkStream, ModelProvider},
    ChatRequest, StreamChunk,
};

/// Deterministic mock provider for tests.  Echoes the last user message
/// back as the assistant response.
#[derive(Default)]
pub struct MockProvider;

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let reply = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, crate::Role::User))
            .map(|m| m.content.clone())
            .unwrap_or_else(|| "[no input]".into());

        let events: Vec<Result<StreamChunk, ProviderError>> = vec![
            Ok(StreamChunk::text(format!("MOCK: {reply}"))),
            Ok(StreamChunk::MessageDelta {
                stop_reason: Some("stop".into()),
            }),
            Ok(StreamChunk::MessageStop),
        ];
        Ok(Box::pin(stream::iter(events)))
    }

    /// Deterministic toy embedding: character-class histogram, normalised.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|t| {
                let len = t.len().max(1) as f32;
                let alpha = t.chars().filter(|c| c.is_alphabetic()).count() as f32;
                let digit = t.chars().filter(|c| c.is_numeric()).count() as f32;
                let space = t.chars().filter(|c| c.is_whitespace()).count() as f32;
                vec![alpha / len, digit / len, space / len, len.ln()]
            })
            .collect())
    }
}

/// A pre-scripted mock provider.  Each call to `chat_stream` pops the next
/// chunk script from the front of the queue.  This lets tests specify exact
/// event sequences — including tool calls — without network access.
pub struct ScriptedMockProvider {
    scripts: Arc<Mutex<Vec<Vec<StreamChunk>>>>,
    /// The last [`ChatRequest`] seen by this provider.  Written on each
    /// call so tests can inspect what was sent.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
}

impl ScriptedMockProvider {
    /// Build a provider from a list of chunk scripts.  The outer `Vec` is the
    /// ordered list of calls; the inner `Vec` is the chunk sequence for that
    /// call.  A `MessageStop` is appended to any script missing one.
    pub fn new(scripts: Vec<Vec<StreamChunk>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// Convenience: provider that always returns a single text reply, on
    /// every call.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let p = Self::new(vec![]);
        *p.scripts.lock().unwrap() = vec![vec![StreamChunk::text(reply.into())]];
        p
    }

    /// Convenience: one turn that calls a tool, then one final text turn.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: Value,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![StreamChunk::ToolUse {
                id: tool_id.into(),
                name: tool_name.into(),
                arguments,
            }],
            vec![StreamChunk::text(final_text.into())],
        ])
    }

    /// Number of scripted calls not yet consumed.
    pub fn remaining(&self) -> usize {
        self.scripts.lock().unwrap().len()
    }

    /// Append another scripted call; lets a test script a turn whose content
    /// depends on values produced earlier in the test.
    pub fn push_script(&self, script: Vec<StreamChunk>) {
        self.scripts.lock().unwrap().push(script);
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockProvider {
    fn name(&self) -> &str {
        "mock"
    }
    fn model_name(&self) -> &str {
        "mock-model"
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        *self.last_request.lock().unwrap() = Some(req);

        let mut scripts = self.scripts.lock().unwrap();
        let mut script = if scripts.is_empty() {
            // Out of script: keep answering so over-long loops terminate.
            vec![StreamChunk::text("(scripted mock exhausted)")]
        } else {
            scripts.remove(0)
        };
        if !matches!(script.last(), Some(StreamChunk::MessageStop)) {
            script.push(StreamChunk::MessageDelta {
                stop_reason: Some("stop".into()),
            });
            script.push(StreamChunk::MessageStop);
        }
        let events: Vec<Result<StreamChunk, ProviderError>> =
            script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
