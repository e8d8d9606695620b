// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::{
    error::ProviderError,
    http::{build_client, send_with_retry, sse_json_stream},
    provider::{ChunkStream, ModelProvider},
    ChatRequest, Message, Role, StreamChunk,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: Option<String>,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            model,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: build_client(),
        }
    }
}

#[async_trait]
impl ModelProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("ANTHROPIC_API_KEY not set".into()))?
            .to_string();

        let messages = build_anthropic_messages(&req.messages);
        let model = if req.model.is_empty() {
            self.model.clone()
        } else {
            req.model.clone()
        };
        let max_tokens = if req.max_tokens > 0 {
            req.max_tokens
        } else {
            self.max_tokens
        };

        let mut body = json!({
            "model": model,
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": if req.temperature > 0.0 { req.temperature } else { self.temperature },
            "stream": true,
        });
        if !req.system.is_empty() {
            body["system"] = json!(req.system);
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "name": t.name,
                            "description": t.description,
                            "input_schema": t.parameters,
                        })
                    })
                    .collect(),
            );
        }

        debug!(model = %self.model, tools = req.tools.len(), "sending anthropic request");
        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let client = self.client.clone();
        let resp = send_with_retry("anthropic", move || {
            client
                .post(&url)
                .header("x-api-key", &key)
                .header("anthropic-version", API_VERSION)
                .json(&body)
        })
        .await?;

        let raw = sse_json_stream(resp);
        let events = raw
            .scan(BlockState::default(), |state, item| {
                let out: Vec<Result<StreamChunk, ProviderError>> = match item {
                    Ok(v) => state.ingest(&v),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }
}

// ─── Streaming parse ──────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingBlock {
    id: String,
    name: String,
    args_buf: String,
}

/// Tracks open `tool_use` content blocks by index.  Anthropic scopes the
/// `input_json_delta` fragments to the block opened by the preceding
/// `content_block_start`, so each block buffers independently and flushes
/// exactly one `ToolUse` on its `content_block_stop`.
#[derive(Default)]
struct BlockState {
    open: Vec<(u32, PendingBlock)>,
}

impl BlockState {
    fn ingest(&mut self, v: &Value) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        match v["type"].as_str().unwrap_or("") {
            "content_block_start" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let block = &v["content_block"];
                if block["type"].as_str() == Some("tool_use") {
                    self.open.push((
                        index,
                        PendingBlock {
                            id: block["id"].as_str().unwrap_or("").to_string(),
                            name: block["name"].as_str().unwrap_or("").to_string(),
                            args_buf: String::new(),
                        },
                    ));
                }
            }
            "content_block_delta" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                let delta = &v["delta"];
                match delta["type"].as_str().unwrap_or("") {
                    "text_delta" => {
                        let text = delta["text"].as_str().unwrap_or("");
                        if !text.is_empty() {
                            out.push(Ok(StreamChunk::text(text)));
                        }
                    }
                    "input_json_delta" => {
                        if let Some((_, b)) = self.open.iter_mut().find(|(i, _)| *i == index) {
                            b.args_buf
                                .push_str(delta["partial_json"].as_str().unwrap_or(""));
                        }
                    }
                    // Extended thinking streams the chain-of-thought as its own
                    // delta type; map it onto the canonical reasoning channel.
                    "thinking_delta" => {
                        let thinking = delta["thinking"].as_str().unwrap_or("");
                        if !thinking.is_empty() {
                            out.push(Ok(StreamChunk::reasoning(thinking)));
                        }
                    }
                    // The encrypted signature blob at the end of a thinking
                    // block is not human-readable; never surface it.
                    "signature_delta" => {}
                    _ => {}
                }
            }
            "content_block_stop" => {
                let index = v["index"].as_u64().unwrap_or(0) as u32;
                if let Some(pos) = self.open.iter().position(|(i, _)| *i == index) {
                    let (_, b) = self.open.remove(pos);
                    if b.name.is_empty() {
                        warn!("dropping tool_use block with empty name");
                    } else {
                        let arguments = if b.args_buf.is_empty() {
                            json!({})
                        } else {
                            serde_json::from_str(&b.args_buf).unwrap_or_else(|_| {
                                warn!(tool = %b.name, "invalid tool_use input JSON; substituting {{}}");
                                json!({})
                            })
                        };
                        let id = if b.id.is_empty() {
                            format!("toolu_synthetic_{index}")
                        } else {
                            b.id
                        };
                        out.push(Ok(StreamChunk::ToolUse {
                            id,
                            name: b.name,
                            arguments,
                        }));
                    }
                }
            }
            "message_delta" => {
                let stop = v["delta"]["stop_reason"].as_str().map(|s| s.to_string());
                out.push(Ok(StreamChunk::MessageDelta { stop_reason: stop }));
            }
            "message_stop" => out.push(Ok(StreamChunk::MessageStop)),
            // message_start / ping / unknown events carry nothing we surface
            _ => {}
        }
        out
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

/// Convert the canonical log into Anthropic conversation turns.
///
/// The system prompt is a top-level request field and never appears here.
/// Tool results ride as `tool_result` content blocks on a user turn pinned
/// to the originating `tool_use` id.  An assistant message that carries
/// both stored reasoning and tool calls gets the reasoning back as a
/// `thinking` block in front of the `tool_use` blocks — the API rejects
/// tool calls from thinking-enabled turns that lost their thinking.
pub(crate) fn build_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => continue, // folded into the top-level system field by the caller
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if !m.tool_calls.is_empty() {
                    if let Some(reasoning) = &m.reasoning {
                        if !reasoning.is_empty() {
                            blocks.push(json!({ "type": "thinking", "thinking": reasoning }));
                        }
                    }
                }
                if !m.content.is_empty() {
                    blocks.push(json!({ "type": "text", "text": m.content }));
                }
                for c in &m.tool_calls {
                    // tool_use.id must match ^[a-zA-Z0-9_-]+$; an empty id
                    // would 400 the whole request.
                    let safe_id = if c.id.is_empty() {
                        warn!(tool = %c.name, "tool call with empty id; substituting fallback");
                        "toolu_fallback".to_string()
                    } else {
                        c.id.clone()
                    };
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": safe_id,
                        "name": c.name,
                        "input": c.arguments,
                    }));
                }
                if blocks.is_empty() {
                    out.push(json!({ "role": "assistant", "content": "" }));
                } else if blocks.len() == 1 && m.tool_calls.is_empty() {
                    out.push(json!({ "role": "assistant", "content": m.content }));
                } else {
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
            }
            Role::User => {
                if m.tool_results.is_empty() {
                    out.push(json!({ "role": "user", "content": m.content }));
                } else {
                    let mut blocks: Vec<Value> = m
                        .tool_results
                        .iter()
                        .map(|r| {
                            json!({
                                "type": "tool_result",
                                "tool_use_id": r.call_id,
                                "content": r.content,
                                "is_error": r.is_error,
                            })
                        })
                        .collect();
                    if !m.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": m.content }));
                    }
                    out.push(json!({ "role": "user", "content": blocks }));
                }
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
