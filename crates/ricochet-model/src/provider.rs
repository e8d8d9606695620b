// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::{
    catalog::{lookup, ModelCatalogEntry},
    error::ProviderError,
    ChatRequest, ChatResponse, StreamChunk,
};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, ProviderError>> + Send>>;

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider identifier ("openai", "anthropic", "google", "mock").
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a chat request and stream canonical chunks.
    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError>;

    /// Non-streaming chat.  The default implementation drains the stream and
    /// assembles the response; adapters may override with a native call.
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut stream = self.chat_stream(req).await?;
        let mut resp = ChatResponse::default();
        let mut reasoning = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk? {
                StreamChunk::ContentDelta { text, reasoning: r } => {
                    resp.content.push_str(&text);
                    if let Some(r) = r {
                        reasoning.push_str(&r);
                    }
                }
                StreamChunk::ToolUse {
                    id,
                    name,
                    arguments,
                } => resp.tool_calls.push(crate::ToolCall::new(id, name, arguments)),
                StreamChunk::MessageDelta { stop_reason } => {
                    if stop_reason.is_some() {
                        resp.stop_reason = stop_reason;
                    }
                }
                StreamChunk::MessageStop => break,
            }
        }
        if !reasoning.is_empty() {
            resp.reasoning = Some(reasoning);
        }
        Ok(resp)
    }

    /// Embed a batch of texts.  Providers without an embedding endpoint
    /// return [`ProviderError::Unsupported`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let _ = texts;
        Err(ProviderError::Unsupported("embeddings"))
    }

    /// Summarize arbitrary text in one bounded, tool-free turn.  Used by the
    /// context window manager; the prompt already contains the serialized
    /// history.
    async fn summarize(&self, prompt: &str, max_tokens: u32) -> Result<String, ProviderError> {
        let req = ChatRequest {
            model: self.model_name().to_string(),
            system: String::new(),
            messages: vec![crate::Message::user(prompt)],
            max_tokens,
            temperature: 0.2,
            tools: Vec::new(),
        };
        let resp = self.chat(req).await?;
        Ok(resp.content)
    }

    /// Catalog entry for this provider/model pair, if known.
    fn catalog_entry(&self) -> Option<ModelCatalogEntry> {
        lookup(self.name(), self.model_name())
    }

    /// Context window size, read from the static catalog.
    fn context_window(&self) -> Option<u32> {
        self.catalog_entry().map(|e| e.context_window)
    }

    /// Maximum output tokens, read from the static catalog.
    fn max_output_tokens(&self) -> Option<u32> {
        self.catalog_entry().map(|e| e.max_output_tokens)
    }
}
