// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared HTTP plumbing for the vendor adapters: the long-timeout client,
//! the retry-with-backoff send loop, and the SSE line scanner.

use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tracing::warn;

use crate::error::ProviderError;

/// One streaming completion can legitimately run for minutes, so the client
/// timeout covers the whole response, not just the handshake.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

const MAX_RETRIES: u32 = 3;

/// Build the shared per-adapter client.
pub(crate) fn build_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// Send `build()` with up to 3 retries on transport errors and 5xx responses,
/// backing off 1 s, 2 s, 4 s between attempts.  Non-retryable failures
/// (4xx) are classified and returned immediately.
///
/// `build` is a closure because `reqwest::RequestBuilder` is consumed by
/// `send()` and must be reconstructed per attempt.
pub(crate) async fn send_with_retry<F>(
    provider: &'static str,
    build: F,
) -> Result<reqwest::Response, ProviderError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0u32;
    loop {
        let result = build().send().await;
        match result {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let status = resp.status().as_u16();
                let body = resp.text().await.unwrap_or_default();
                let err = ProviderError::from_status(provider, status, body);
                if err.is_retryable() && attempt < MAX_RETRIES {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << (attempt - 1));
                    warn!(provider, status, attempt, "retrying after server error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                let err = ProviderError::from(e);
                if attempt < MAX_RETRIES {
                    attempt += 1;
                    let delay = Duration::from_secs(1 << (attempt - 1));
                    warn!(provider, attempt, "retrying after network error");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                return Err(err);
            }
        }
    }
}

/// Turn a byte stream of server-sent events into a stream of parsed JSON
/// payloads (the value after `data: `).
///
/// SSE lines can be split across TCP chunks, so a remainder buffer is
/// carried forward; only complete lines (terminated by `\n`) are parsed.
/// `[DONE]` sentinels and non-data lines are skipped.
pub(crate) fn sse_json_stream(
    resp: reqwest::Response,
) -> impl futures::Stream<Item = Result<Value, ProviderError>> {
    resp.bytes_stream()
        .scan(String::new(), |buf, chunk| {
            let mut events: Vec<Result<Value, ProviderError>> = Vec::new();
            match chunk {
                Ok(bytes) => {
                    buf.push_str(&String::from_utf8_lossy(&bytes));
                    while let Some(pos) = buf.find('\n') {
                        let line = buf[..pos].trim_end_matches('\r').to_string();
                        buf.drain(..=pos);
                        if let Some(data) = line.strip_prefix("data: ") {
                            let data = data.trim();
                            if data == "[DONE]" {
                                continue;
                            }
                            match serde_json::from_str::<Value>(data) {
                                Ok(v) => events.push(Ok(v)),
                                Err(_) => {
                                    // Partial or malformed payloads are skipped;
                                    // the provider terminates bad streams itself.
                                }
                            }
                        }
                    }
                }
                Err(e) => events.push(Err(ProviderError::Network(e.to_string()))),
            }
            futures::future::ready(Some(events))
        })
        .flat_map(futures::stream::iter)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
