// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! OpenAI-style chat-completions adapter.
//!
//! This is also the wire format spoken by most gateways and local servers,
//! so the adapter keeps strictly to the common subset: `/chat/completions`
//! SSE streaming with `tool_calls` deltas, plus `/embeddings`.
//!
//! Reasoning-capable models served over this protocol emit
//! `reasoning_content` deltas separately from `content`.  Those are mapped
//! onto the canonical reasoning channel; models that instead inline
//! `<think>...</think>` into the text stream are handled downstream by the
//! turn loop's inline-thinking reclassifier.

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";

pub struct OpenAiProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiProvider {
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

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("OPENAI_API_KEY not set".into()))
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat_stream(&self, req: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let key = self.key()?.to_string();
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
            "messages": build_openai_messages(&req.system, &req.messages),
            "max_tokens": max_tokens,
            "temperature": if req.temperature > 0.0 { req.temperature } else { self.temperature },
            "stream": true,
        });
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }

        debug!(model = %self.model, tools = req.tools.len(), "sending openai request");
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let client = self.client.clone();
        let resp = send_with_retry("openai", move || {
            client.post(&url).bearer_auth(&key).json(&body)
        })
        .await?;

        let raw = sse_json_stream(resp);
        // Streaming tool-call arguments arrive as fragments keyed by index;
        // they are buffered here and flushed as single ToolUse chunks when
        // the stream reports a finish reason (or ends).
        let events = raw
            .scan(ToolCallBuffer::default(), |buf, item| {
                let out: Vec<Result<StreamChunk, ProviderError>> = match item {
                    Ok(v) => buf.ingest(&v),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let key = self.key()?.to_string();
        let body = json!({
            "model": DEFAULT_EMBED_MODEL,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let client = self.client.clone();
        let resp = send_with_retry("openai", move || {
            client.post(&url).bearer_auth(&key).json(&body)
        })
        .await?;
        let v: Value = resp.json().await.map_err(ProviderError::from)?;
        let mut vectors = Vec::new();
        for item in v["data"].as_array().cloned().unwrap_or_default() {
            let vec: Vec<f32> = item["embedding"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|x| x.as_f64())
                        .map(|x| x as f32)
                        .collect()
                })
                .unwrap_or_default();
            vectors.push(vec);
        }
        Ok(vectors)
    }
}

// ─── Wire format ──────────────────────────────────────────────────────────────

/// Translate the canonical log into chat-completions messages.
///
/// Tool calls ride on the assistant message as a `tool_calls` array;
/// each tool result becomes its own `role: "tool"` message pinned to the
/// call id — the pairing invariants of the canonical log map 1:1 onto the
/// wire requirements.
pub(crate) fn build_openai_messages(system: &str, messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    if !system.is_empty() {
        out.push(json!({ "role": "system", "content": system }));
    }
    for m in messages {
        match m.role {
            Role::System => out.push(json!({ "role": "system", "content": m.content })),
            Role::Assistant => {
                if m.tool_calls.is_empty() {
                    out.push(json!({ "role": "assistant", "content": m.content }));
                } else {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": {
                                    "name": c.name,
                                    "arguments": c.arguments.to_string(),
                                }
                            })
                        })
                        .collect();
                    let content = if m.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(m.content.clone())
                    };
                    out.push(json!({
                        "role": "assistant",
                        "content": content,
                        "tool_calls": calls,
                    }));
                }
            }
            Role::User => {
                for r in &m.tool_results {
                    out.push(json!({
                        "role": "tool",
                        "tool_call_id": r.call_id,
                        "content": r.content,
                    }));
                }
                if !m.content.is_empty() || m.tool_results.is_empty() {
                    out.push(json!({ "role": "user", "content": m.content }));
                }
            }
        }
    }
    out
}

// ─── Streaming parse ──────────────────────────────────────────────────────────

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    args_buf: String,
}

/// Accumulates tool-call fragments across delta events, keyed by the
/// provider's parallel-tool-call index.
#[derive(Default)]
pub(crate) struct ToolCallBuffer {
    pending: Vec<(u32, PendingCall)>,
    flushed: bool,
}

impl ToolCallBuffer {
    fn ingest(&mut self, v: &Value) -> Vec<Result<StreamChunk, ProviderError>> {
        let mut out = Vec::new();
        let choice = &v["choices"][0];
        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                out.push(Ok(StreamChunk::text(text)));
            }
        }
        if let Some(r) = delta["reasoning_content"].as_str() {
            if !r.is_empty() {
                out.push(Ok(StreamChunk::reasoning(r)));
            }
        }
        if let Some(calls) = delta["tool_calls"].as_array() {
            for c in calls {
                let index = c["index"].as_u64().unwrap_or(0) as u32;
                let entry = match self.pending.iter_mut().find(|(i, _)| *i == index) {
                    Some((_, e)) => e,
                    None => {
                        self.pending.push((index, PendingCall::default()));
                        &mut self.pending.last_mut().expect("just pushed").1
                    }
                };
                if let Some(id) = c["id"].as_str() {
                    if !id.is_empty() {
                        entry.id = id.to_string();
                    }
                }
                if let Some(name) = c["function"]["name"].as_str() {
                    if !name.is_empty() {
                        entry.name = name.to_string();
                    }
                }
                if let Some(args) = c["function"]["arguments"].as_str() {
                    entry.args_buf.push_str(args);
                }
            }
        }
        if let Some(reason) = choice["finish_reason"].as_str() {
            out.extend(self.flush());
            out.push(Ok(StreamChunk::MessageDelta {
                stop_reason: Some(reason.to_string()),
            }));
            out.push(Ok(StreamChunk::MessageStop));
        }
        out
    }

    /// Emit exactly one ToolUse per buffered call, ordered by index.
    fn flush(&mut self) -> Vec<Result<StreamChunk, ProviderError>> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;
        self.pending.sort_by_key(|(i, _)| *i);
        let mut out = Vec::new();
        for (i, pc) in self.pending.drain(..) {
            if pc.name.is_empty() {
                warn!(index = i, "dropping streamed tool call with empty name");
                continue;
            }
            let arguments = if pc.args_buf.is_empty() {
                json!({})
            } else {
                serde_json::from_str(&pc.args_buf).unwrap_or_else(|_| {
                    warn!(tool = %pc.name, "tool call arguments were not valid JSON; substituting {{}}");
                    json!({})
                })
            };
            let id = if pc.id.is_empty() {
                format!("call_synthetic_{i}")
            } else {
                pc.id
            };
            out.push(Ok(StreamChunk::ToolUse {
                id,
                name: pc.name,
                arguments,
            }));
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
