// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Google Gemini adapter — native Generative Language API.
//!
//! Uses `streamGenerateContent?alt=sse` and `batchEmbedContents`.
//! Gemini matches function responses to calls by **name**, not by an opaque
//! id, so the adapter keeps a call-id → function-name map while serializing
//! the history and re-derives stable ids for streamed calls.
//!
//! # Auth
//! API key via the `x-goog-api-key` header.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    error::ProviderError,
    http::{build_client, send_with_retry, sse_json_stream},
    provider::{ChunkStream, ModelProvider},
    ChatRequest, Message, Role, StreamChunk,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-004";

pub struct GoogleProvider {
    model: String,
    api_key: Option<String>,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl GoogleProvider {
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
            max_tokens: max_tokens.unwrap_or(8192),
            temperature: temperature.unwrap_or(0.2),
            client: build_client(),
        }
    }

    fn key(&self) -> Result<&str, ProviderError> {
        self.api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("GEMINI_API_KEY not set".into()))
    }
}

#[async_trait]
impl ModelProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
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

        let contents = build_gemini_contents(&req.messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": {
                "maxOutputTokens": if req.max_tokens > 0 { req.max_tokens } else { self.max_tokens },
                "temperature": if req.temperature > 0.0 { req.temperature } else { self.temperature },
            }
        });
        if !req.system.is_empty() {
            body["systemInstruction"] = json!({ "parts": [{ "text": req.system }] });
        }
        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        debug!(model = %self.model, "sending gemini request");
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            model
        );
        let client = self.client.clone();
        let resp = send_with_retry("google", move || {
            client.post(&url).header("x-goog-api-key", &key).json(&body)
        })
        .await?;

        let raw = sse_json_stream(resp);
        let events = raw
            .scan(0u32, |call_seq, item| {
                let out: Vec<Result<StreamChunk, ProviderError>> = match item {
                    Ok(v) => parse_gemini_chunk(&v, call_seq),
                    Err(e) => vec![Err(e)],
                };
                futures::future::ready(Some(out))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(events))
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let key = self.key()?.to_string();
        let requests: Vec<Value> = texts
            .iter()
            .map(|t| {
                json!({
                    "model": format!("models/{DEFAULT_EMBED_MODEL}"),
                    "content": { "parts": [{ "text": t }] },
                })
            })
            .collect();
        let body = json!({ "requests": requests });
        let url = format!(
            "{}/v1beta/models/{}:batchEmbedContents",
            self.base_url.trim_end_matches('/'),
            DEFAULT_EMBED_MODEL
        );
        let client = self.client.clone();
        let resp = send_with_retry("google", move || {
            client.post(&url).header("x-goog-api-key", &key).json(&body)
        })
        .await?;
        let v: Value = resp.json().await.map_err(ProviderError::from)?;
        let mut vectors = Vec::new();
        for item in v["embeddings"].as_array().cloned().unwrap_or_default() {
            let vec: Vec<f32> = item["values"]
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

/// Translate the canonical log into Gemini `contents`.
pub(crate) fn build_gemini_contents(messages: &[Message]) -> Vec<Value> {
    // call id → function name, so functionResponse parts carry the name the
    // API pairs on.
    let mut name_by_id: HashMap<&str, &str> = HashMap::new();
    for m in messages {
        for c in &m.tool_calls {
            name_by_id.insert(c.id.as_str(), c.name.as_str());
        }
    }

    let mut contents: Vec<Value> = Vec::new();
    for m in messages {
        match m.role {
            Role::System => continue, // systemInstruction is a top-level field
            Role::Assistant => {
                let mut parts: Vec<Value> = Vec::new();
                if !m.content.is_empty() {
                    parts.push(json!({ "text": m.content }));
                }
                for c in &m.tool_calls {
                    parts.push(json!({
                        "functionCall": { "name": c.name, "args": c.arguments }
                    }));
                }
                if parts.is_empty() {
                    parts.push(json!({ "text": "" }));
                }
                contents.push(json!({ "role": "model", "parts": parts }));
            }
            Role::User => {
                let mut parts: Vec<Value> = Vec::new();
                for r in &m.tool_results {
                    let fn_name = name_by_id
                        .get(r.call_id.as_str())
                        .copied()
                        .unwrap_or(r.call_id.as_str());
                    parts.push(json!({
                        "functionResponse": {
                            "name": fn_name,
                            "response": { "output": r.content },
                        }
                    }));
                }
                if !m.content.is_empty() || parts.is_empty() {
                    parts.push(json!({ "text": m.content }));
                }
                contents.push(json!({ "role": "user", "parts": parts }));
            }
        }
    }
    contents
}

// ─── Streaming parse ──────────────────────────────────────────────────────────

/// Gemini sends complete `functionCall` parts (no argument streaming), so
/// each one maps directly to a single ToolUse.  Ids are synthesized from the
/// function name plus a per-stream sequence number to keep them unique when
/// the model calls the same function twice in one turn.
fn parse_gemini_chunk(v: &Value, call_seq: &mut u32) -> Vec<Result<StreamChunk, ProviderError>> {
    let mut out = Vec::new();
    let candidate = &v["candidates"][0];
    if let Some(parts) = candidate["content"]["parts"].as_array() {
        for part in parts {
            // Thinking parts are flagged with `"thought": true`.
            if part.get("thought").and_then(|t| t.as_bool()) == Some(true) {
                if let Some(text) = part["text"].as_str() {
                    if !text.is_empty() {
                        out.push(Ok(StreamChunk::reasoning(text)));
                    }
                }
                continue;
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc["name"].as_str().unwrap_or("").to_string();
                if name.is_empty() {
                    continue;
                }
                *call_seq += 1;
                out.push(Ok(StreamChunk::ToolUse {
                    id: format!("{name}_{call_seq}"),
                    name,
                    arguments: fc["args"].clone(),
                }));
                continue;
            }
            if let Some(text) = part["text"].as_str() {
                if !text.is_empty() {
                    out.push(Ok(StreamChunk::text(text)));
                }
            }
        }
    }
    if let Some(reason) = candidate["finishReason"].as_str() {
        out.push(Ok(StreamChunk::MessageDelta {
            stop_reason: Some(reason.to_string()),
        }));
        out.push(Ok(StreamChunk::MessageStop));
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ToolCall, ToolResult};

    #[test]
    fn provider_name_and_model() {
        let p = GoogleProvider::new("gemini-2.0-flash".into(), None, None, None, None);
        assert_eq!(p.name(), "google");
        assert_eq!(p.model_name(), "gemini-2.0-flash");
    }

    #[tokio::test]
    async fn missing_key_is_auth_error() {
        let p = GoogleProvider::new("gemini-2.0-flash".into(), None, None, None, None);
        let err = match p.chat_stream(ChatRequest::default()).await {
            Err(e) => e,
            Ok(_) => panic!("expected an error"),
        };
        assert!(matches!(err, ProviderError::Auth(_)));
    }

    // ── Message serialization ─────────────────────────────────────────────────

    #[test]
    fn user_and_model_roles() {
        let out = build_gemini_contents(&[Message::user("q"), Message::assistant("a")]);
        assert_eq!(out[0]["role"], "user");
        assert_eq!(out[1]["role"], "model");
    }

    #[test]
    fn tool_call_becomes_function_call_part() {
        let m = Message::assistant_with_calls(
            "",
            vec![ToolCall::new("id1", "list_dir", json!({"path": "."}))],
        );
        let out = build_gemini_contents(&[m]);
        let part = &out[0]["parts"][0];
        assert_eq!(part["functionCall"]["name"], "list_dir");
        assert_eq!(part["functionCall"]["args"]["path"], ".");
    }

    #[test]
    fn tool_result_pairs_by_function_name() {
        let msgs = vec![
            Message::assistant_with_calls(
                "",
                vec![ToolCall::new("opaque-id-7", "read_file", json!({}))],
            ),
            Message::tool_results(vec![ToolResult::ok("opaque-id-7", "contents")]),
        ];
        let out = build_gemini_contents(&msgs);
        let part = &out[1]["parts"][0];
        // functionResponse must carry the *name*, not the opaque id
        assert_eq!(part["functionResponse"]["name"], "read_file");
        assert_eq!(part["functionResponse"]["response"]["output"], "contents");
    }

    #[test]
    fn unknown_call_id_falls_back_to_id_as_name() {
        let m = Message::tool_results(vec![ToolResult::ok("mystery", "x")]);
        let out = build_gemini_contents(&[m]);
        assert_eq!(out[0]["parts"][0]["functionResponse"]["name"], "mystery");
    }

    #[test]
    fn system_messages_excluded_from_contents() {
        let out = build_gemini_contents(&[Message::system("sys"), Message::user("hi")]);
        assert_eq!(out.len(), 1);
    }

    // ── Streaming parse ───────────────────────────────────────────────────────

    #[test]
    fn text_part_streams_as_content() {
        let mut seq = 0;
        let chunks = parse_gemini_chunk(
            &json!({"candidates": [{"content": {"parts": [{"text": "hi"}]}}]}),
            &mut seq,
        );
        assert!(matches!(
            chunks[0].as_ref().unwrap(),
            StreamChunk::ContentDelta { text, .. } if text == "hi"
        ));
    }

    #[test]
    fn thought_part_streams_as_reasoning() {
        let mut seq = 0;
        let chunks = parse_gemini_chunk(
            &json!({"candidates": [{"content": {"parts": [{"text": "mull", "thought": true}]}}]}),
            &mut seq,
        );
        assert!(matches!(
            chunks[0].as_ref().unwrap(),
            StreamChunk::ContentDelta { reasoning: Some(r), .. } if r == "mull"
        ));
    }

    #[test]
    fn function_call_part_becomes_tool_use_with_unique_ids() {
        let mut seq = 0;
        let event = json!({"candidates": [{"content": {"parts": [
            {"functionCall": {"name": "grep_search", "args": {"query": "x"}}},
            {"functionCall": {"name": "grep_search", "args": {"query": "y"}}}
        ]}}]});
        let chunks = parse_gemini_chunk(&event, &mut seq);
        let ids: Vec<String> = chunks
            .iter()
            .filter_map(|c| match c.as_ref().unwrap() {
                StreamChunk::ToolUse { id, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1], "same function twice must get distinct ids");
    }

    #[test]
    fn finish_reason_emits_delta_and_stop() {
        let mut seq = 0;
        let chunks = parse_gemini_chunk(
            &json!({"candidates": [{"content": {}, "finishReason": "STOP"}]}),
            &mut seq,
        );
        assert!(matches!(
            chunks[0].as_ref().unwrap(),
            StreamChunk::MessageDelta { stop_reason: Some(r) } if r == "STOP"
        ));
        assert!(matches!(
            chunks[1].as_ref().unwrap(),
            StreamChunk::MessageStop
        ));
    }
}
