// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Provider error taxonomy and the user-facing error translator.

use thiserror::Error;

/// Structured provider failure.  Tool failures never travel this path — they
/// are captured as error tool-results and fed back to the model.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("authentication rejected: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("context window exceeded: {0}")]
    ContextOverflow(String),
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("insufficient credit: {0}")]
    InsufficientCredit(String),
    #[error("{provider} error {status}: {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },
    #[error("operation not supported by this provider: {0}")]
    Unsupported(&'static str),
    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Classify an HTTP error response into the taxonomy.
    pub fn from_status(provider: &'static str, status: u16, body: String) -> Self {
        let lower = body.to_ascii_lowercase();
        match status {
            401 | 403 => ProviderError::Auth(body),
            429 => ProviderError::RateLimit(body),
            404 if lower.contains("model") => ProviderError::ModelNotFound(body),
            402 => ProviderError::InsufficientCredit(body),
            400 if lower.contains("context_length")
                || lower.contains("maximum context")
                || lower.contains("max_tokens")
                || lower.contains("too many tokens") =>
            {
                ProviderError::ContextOverflow(body)
            }
            _ if lower.contains("insufficient_quota") || lower.contains("billing") => {
                ProviderError::InsufficientCredit(body)
            }
            _ => ProviderError::Api {
                provider,
                status,
                message: body,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Network(e.to_string())
    }
}

/// Map a raw provider failure to an actionable one-liner for the user.
/// Unknown errors fall through with the original text appended.
pub fn translate_error(err: &ProviderError) -> String {
    match err {
        ProviderError::Auth(_) => {
            "The provider rejected your API key. Check the configured key or \
             the corresponding environment variable."
                .into()
        }
        ProviderError::RateLimit(_) => {
            "The provider is rate-limiting requests. Wait a moment and try again.".into()
        }
        ProviderError::ContextOverflow(_) => {
            "The conversation no longer fits the model's context window, even \
             after condensation. Start a new session or switch to a larger model."
                .into()
        }
        ProviderError::ModelNotFound(_) => {
            "The configured model id was not recognised by the provider. \
             Check the model name in your config."
                .into()
        }
        ProviderError::Network(e) => {
            format!("Could not reach the provider (network error or timeout): {e}")
        }
        ProviderError::InsufficientCredit(_) => {
            "The provider reports insufficient credit on this account.".into()
        }
        ProviderError::Api { status, message, .. } if *status >= 500 => {
            format!("The provider is having trouble (HTTP {status}). Try again shortly: {message}")
        }
        ProviderError::Cancelled => "The request was cancelled.".into(),
        other => format!("Provider request failed: {other}"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
