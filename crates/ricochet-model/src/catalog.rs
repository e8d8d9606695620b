// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Static model catalog: context windows, output ceilings and pricing.
//!
//! Pricing is expressed in USD per million tokens.  The table is consulted
//! for cost accounting and context budgets; models that are not listed fall
//! back to [`fallback_entry`], a conservative default that never
//! under-estimates cost to zero unless the model is explicitly free.

#[derive(Debug, Clone, PartialEq)]
pub struct ModelCatalogEntry {
    pub provider: &'static str,
    pub id: &'static str,
    pub context_window: u32,
    pub max_output_tokens: u32,
    /// USD per 1M input tokens
    pub input_price: f64,
    /// USD per 1M output tokens
    pub output_price: f64,
    pub is_free: bool,
}

pub fn static_catalog() -> Vec<ModelCatalogEntry> {
    vec![
        // ── OpenAI ───────────────────────────────────────────────────────────
        entry("openai", "gpt-4o", 128_000, 16_384, 2.50, 10.00),
        entry("openai", "gpt-4o-mini", 128_000, 16_384, 0.15, 0.60),
        entry("openai", "gpt-4.1", 1_047_576, 32_768, 2.00, 8.00),
        entry("openai", "gpt-4.1-mini", 1_047_576, 32_768, 0.40, 1.60),
        entry("openai", "o3-mini", 200_000, 100_000, 1.10, 4.40),
        // ── Anthropic ────────────────────────────────────────────────────────
        entry("anthropic", "claude-sonnet-4-5", 200_000, 64_000, 3.00, 15.00),
        entry("anthropic", "claude-opus-4-5", 200_000, 32_000, 15.00, 75.00),
        entry("anthropic", "claude-haiku-4-5", 200_000, 64_000, 0.80, 4.00),
        entry(
            "anthropic",
            "claude-3-5-sonnet-20241022",
            200_000,
            8_192,
            3.00,
            15.00,
        ),
        // ── Google ───────────────────────────────────────────────────────────
        entry("google", "gemini-2.0-flash", 1_048_576, 8_192, 0.10, 0.40),
        entry("google", "gemini-2.5-pro", 1_048_576, 65_536, 1.25, 10.00),
        entry("google", "gemini-2.5-flash", 1_048_576, 65_536, 0.30, 2.50),
        // ── Mock (tests) ─────────────────────────────────────────────────────
        ModelCatalogEntry {
            provider: "mock",
            id: "mock-model",
            context_window: 128_000,
            max_output_tokens: 4_096,
            input_price: 0.0,
            output_price: 0.0,
            is_free: true,
        },
    ]
}

fn entry(
    provider: &'static str,
    id: &'static str,
    context_window: u32,
    max_output_tokens: u32,
    input_price: f64,
    output_price: f64,
) -> ModelCatalogEntry {
    ModelCatalogEntry {
        provider,
        id,
        context_window,
        max_output_tokens,
        input_price,
        output_price,
        is_free: false,
    }
}

/// Find the catalog entry for a provider/model pair.
pub fn lookup(provider: &str, model: &str) -> Option<ModelCatalogEntry> {
    static_catalog()
        .into_iter()
        .find(|e| e.provider == provider && e.id == model)
}

/// Conservative default used for unknown models: a common 128k window and
/// mid-tier pricing, so cost accounting over-estimates rather than reports
/// zero for a paid model.
pub fn fallback_entry() -> ModelCatalogEntry {
    ModelCatalogEntry {
        provider: "unknown",
        id: "unknown",
        context_window: 128_000,
        max_output_tokens: 4_096,
        input_price: 3.00,
        output_price: 15.00,
        is_free: false,
    }
}

/// Lookup with the conservative fallback applied.
pub fn lookup_or_fallback(provider: &str, model: &str) -> ModelCatalogEntry {
    lookup(provider, model).unwrap_or_else(fallback_entry)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_model() {
        let e = lookup("openai", "gpt-4o").unwrap();
        assert_eq!(e.context_window, 128_000);
        assert!(e.input_price > 0.0);
    }

    #[test]
    fn lookup_unknown_model_is_none() {
        assert!(lookup("openai", "gpt-99").is_none());
    }

    #[test]
    fn lookup_or_fallback_never_fails() {
        let e = lookup_or_fallback("nonexistent", "nope");
        assert_eq!(e.provider, "unknown");
        assert!(e.input_price > 0.0, "fallback must not be free");
    }

    #[test]
    fn mock_model_is_free() {
        let e = lookup("mock", "mock-model").unwrap();
        assert!(e.is_free);
        assert_eq!(e.input_price, 0.0);
    }

    #[test]
    fn catalog_ids_unique_per_provider() {
        let all = static_catalog();
        for e in &all {
            let count = all
                .iter()
                .filter(|o| o.provider == e.provider && o.id == e.id)
                .count();
            assert_eq!(count, 1, "duplicate catalog entry {}/{}", e.provider, e.id);
        }
    }

    #[test]
    fn every_entry_has_positive_window() {
        for e in static_catalog() {
            assert!(e.context_window > 0, "{} has zero window", e.id);
            assert!(e.max_output_tokens > 0, "{} has zero output", e.id);
        }
    }
}
