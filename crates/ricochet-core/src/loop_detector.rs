// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Repetition guard over tool invocations and error outputs.
//!
//! Two independent sliding windows, each a ring of the last 5 signature
//! digests.  A rule fires when the last 3 entries of its window are
//! identical — the 3rd identical call/error trips it, not the 2nd, and the
//! detector does not wait for a 4th.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

const WINDOW: usize = 5;
const RUN_LENGTH: usize = 3;

/// Message substituted for a tool call refused by rule A.
pub const LOOP_REFUSAL: &str = "loop detected: this exact tool call was just made repeatedly \
     with identical arguments. Do not repeat it; change strategy (different \
     arguments, different tool, or explain the blocker to the user).";

/// Number of consecutive rule-B hits after which the turn is aborted.
pub const STUCK_LIMIT: u32 = 5;

/// User-facing message for an aborted turn.
pub const STUCK_MESSAGE: &str =
    "The agent appears to be stuck repeating the same failing action and the turn \
     was stopped. Rephrase the request or give more specific guidance.";

fn digest(data: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Default)]
pub struct LoopDetector {
    tool_ring: VecDeque<String>,
    error_ring: VecDeque<String>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(ring: &mut VecDeque<String>, sig: String) -> bool {
        ring.push_back(sig);
        if ring.len() > WINDOW {
            ring.pop_front();
        }
        if ring.len() < RUN_LENGTH {
            return false;
        }
        let tail: Vec<&String> = ring.iter().rev().take(RUN_LENGTH).collect();
        tail.windows(2).all(|w| w[0] == w[1])
    }

    /// Rule A: record a tool call; returns true when the call should be
    /// refused because the last 3 recorded calls are identical.
    pub fn record_call(&mut self, name: &str, args: &serde_json::Value) -> bool {
        let sig = format!("{name}:{}", digest(&args.to_string()));
        Self::push(&mut self.tool_ring, sig)
    }

    /// Rule B: record an error result; returns true when the last 3 recorded
    /// errors are identical (the "stuck" condition).
    pub fn record_error(&mut self, result: &str) -> bool {
        Self::push(&mut self.error_ring, digest(result))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
