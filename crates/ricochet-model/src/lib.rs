// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod catalog;
pub mod sanitize;
mod anthropic;
mod error;
mod google;
mod http;
mod mock;
mod openai;
mod provider;
mod types;

pub use anthropic::AnthropicProvider;
pub use catalog::ModelCatalogEntry;
pub use error::{translate_error, ProviderError};
pub use google::GoogleProvider;
pub use mock::{MockProvider, ScriptedMockProvider};
pub use openai::OpenAiProvider;
pub use provider::{ChunkStream, ModelProvider};
pub use types::*;

use ricochet_config::ModelConfig;

/// Construct a boxed [`ModelProvider`] from configuration.
///
/// Selects the adapter based on `cfg.provider`.  The API key is resolved in
/// order: explicit `api_key`, configured `api_key_env`, then the provider's
/// canonical environment variable.
pub fn from_config(cfg: &ModelConfig) -> anyhow::Result<Box<dyn ModelProvider>> {
    let key = resolve_api_key(cfg);
    match cfg.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "google" => Ok(Box::new(GoogleProvider::new(
            cfg.name.clone(),
            key,
            cfg.base_url.clone(),
            cfg.max_tokens,
            cfg.temperature,
        ))),
        "mock" => Ok(Box::new(MockProvider)),
        other => anyhow::bail!(
            "unknown provider '{other}' (expected openai | anthropic | google | mock)"
        ),
    }
}

/// Canonical API-key environment variable for a provider id.
pub fn canonical_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "anthropic" => Some("ANTHROPIC_API_KEY"),
        "google" => Some("GEMINI_API_KEY"),
        _ => None,
    }
}

fn resolve_api_key(cfg: &ModelConfig) -> Option<String> {
    if let Some(k) = &cfg.api_key {
        return Some(k.clone());
    }
    if let Some(env) = &cfg.api_key_env {
        if let Ok(v) = std::env::var(env) {
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    canonical_key_env(&cfg.provider)
        .and_then(|env| std::env::var(env).ok())
        .filter(|v| !v.is_empty())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
