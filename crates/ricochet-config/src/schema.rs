// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so a named function is required for opt-out fields.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub safeguard: SafeguardConfig,
    /// User-defined modes merged over the built-in set (`code`, `architect`,
    /// `ask`).  A user mode with a built-in slug replaces that built-in.
    #[serde(default)]
    pub modes: Vec<ModeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Provider identifier: "openai" | "anthropic" | "google" | "mock"
    pub provider: String,
    /// Model name forwarded to the provider API
    pub name: String,
    /// Environment variable that holds the API key (read at runtime)
    pub api_key_env: Option<String>,
    /// Explicit API key; prefer api_key_env in config files to avoid secrets
    /// in version-controlled files
    pub api_key: Option<String>,
    /// Base URL override.  Useful for local proxies or gateways.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0)
    pub temperature: Option<f32>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            name: "gpt-4o".into(),
            // api_key_env stays None here: the driver layer already knows the
            // canonical env-var name for each provider (OPENAI_API_KEY,
            // ANTHROPIC_API_KEY, GEMINI_API_KEY).  Hard-coding it would shadow
            // that lookup when the provider is overridden at runtime.
            api_key_env: None,
            api_key: None,
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

fn default_max_turns() -> u32 {
    50
}
fn default_condense_threshold() -> f32 {
    0.70
}
fn default_condense_keep_recent() -> usize {
    5
}
fn default_swarm_max_workers() -> usize {
    5
}
fn default_swarm_tick_secs() -> u64 {
    2
}
fn default_task_max_retries() -> u32 {
    3
}
fn default_subtask_max_turns() -> u32 {
    15
}
fn default_command_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of model ↔ tool turns within one chat call
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,
    /// Fraction of the context budget at which condensation triggers (0.0–1.0)
    #[serde(default = "default_condense_threshold")]
    pub condense_threshold: f32,
    /// Number of recent messages preserved verbatim when condensing.  The
    /// older history is replaced by a single summary system message.
    #[serde(default = "default_condense_keep_recent")]
    pub condense_keep_recent: usize,
    /// Maximum concurrent swarm workers
    #[serde(default = "default_swarm_max_workers")]
    pub swarm_max_workers: usize,
    /// Swarm scheduling tick interval in seconds
    #[serde(default = "default_swarm_tick_secs")]
    pub swarm_tick_secs: u64,
    /// Retry ceiling used when a plan task does not set its own
    #[serde(default = "default_task_max_retries")]
    pub task_max_retries: u32,
    /// Autopilot turn ceiling for one sub-agent run
    #[serde(default = "default_subtask_max_turns")]
    pub subtask_max_turns: u32,
    /// Timeout in seconds for a single shell command tool call
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// State directory override (default: ~/.ricochet)
    #[serde(default)]
    pub state_dir: Option<String>,
    /// System prompt override; leave None to use the built-in prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Take a shadow-git checkpoint after every successful write tool
    #[serde(default = "default_true")]
    pub auto_checkpoint: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: default_max_turns(),
            condense_threshold: default_condense_threshold(),
            condense_keep_recent: default_condense_keep_recent(),
            swarm_max_workers: default_swarm_max_workers(),
            swarm_tick_secs: default_swarm_tick_secs(),
            task_max_retries: default_task_max_retries(),
            subtask_max_turns: default_subtask_max_turns(),
            command_timeout_secs: default_command_timeout_secs(),
            state_dir: None,
            system_prompt: None,
            auto_checkpoint: true,
        }
    }
}

/// The safeguard's coarse permission dial.  Lower is more permissive: a tool
/// declares the highest zone it may run in, and a call is allowed when
/// `current <= required`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum TrustZone {
    /// Anything goes, including destructive commands
    Danger,
    /// Normal operation: writes and vetted commands
    Safe,
    /// Exploration only: no writes, no commands
    ReadOnly,
}

impl TrustZone {
    pub fn level(self) -> u8 {
        match self {
            TrustZone::Danger => 0,
            TrustZone::Safe => 1,
            TrustZone::ReadOnly => 2,
        }
    }
}

impl std::fmt::Display for TrustZone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustZone::Danger => write!(f, "danger"),
            TrustZone::Safe => write!(f, "safe"),
            TrustZone::ReadOnly => write!(f, "read-only"),
        }
    }
}

/// Per-category auto-approval switches.  A category set to `true` runs
/// without asking the host; everything else goes through the approval flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoApproveConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default)]
    pub edit: bool,
    /// Commands that pass the safeguard allow-list
    #[serde(default)]
    pub execute_safe: bool,
    /// All commands, including ones outside the allow-list
    #[serde(default)]
    pub execute_all: bool,
    #[serde(default)]
    pub browser: bool,
    #[serde(default)]
    pub mcp: bool,
}

impl Default for AutoApproveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            read: true,
            edit: false,
            execute_safe: false,
            execute_all: false,
            browser: false,
            mcp: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafeguardConfig {
    /// File globs the agent may touch.  Empty list = allow everything.
    #[serde(default = "SafeguardConfig::default_file_allow")]
    pub file_allow: Vec<String>,
    /// File globs the agent must never touch.  Deny beats allow.
    #[serde(default = "SafeguardConfig::default_file_deny")]
    pub file_deny: Vec<String>,
    /// Command patterns allowed to run (`*`, exact, or `prefix*`)
    #[serde(default = "SafeguardConfig::default_command_allow")]
    pub command_allow: Vec<String>,
    /// Command patterns that are always refused
    #[serde(default = "SafeguardConfig::default_command_deny")]
    pub command_deny: Vec<String>,
    /// Tool names that may run regardless of category rules
    #[serde(default)]
    pub tool_allow: Vec<String>,
    /// Tool names that must never run
    #[serde(default)]
    pub tool_deny: Vec<String>,
    #[serde(default = "SafeguardConfig::default_trust_zone")]
    pub trust_zone: TrustZone,
    #[serde(default)]
    pub auto_approve: AutoApproveConfig,
}

impl SafeguardConfig {
    fn default_file_allow() -> Vec<String> {
        vec!["*".into()]
    }
    fn default_file_deny() -> Vec<String> {
        vec![
            "**/.env".into(),
            "**/.env.*".into(),
            "**/*.pem".into(),
            "**/id_rsa*".into(),
            "**/.git/**".into(),
        ]
    }
    fn default_command_allow() -> Vec<String> {
        vec!["*".into()]
    }
    fn default_command_deny() -> Vec<String> {
        vec![
            "rm -rf /*".into(),
            "dd if=*".into(),
            "mkfs*".into(),
            "shutdown*".into(),
            "reboot*".into(),
        ]
    }
    fn default_trust_zone() -> TrustZone {
        TrustZone::Safe
    }
}

impl Default for SafeguardConfig {
    fn default() -> Self {
        Self {
            file_allow: Self::default_file_allow(),
            file_deny: Self::default_file_deny(),
            command_allow: Self::default_command_allow(),
            command_deny: Self::default_command_deny(),
            tool_allow: Vec::new(),
            tool_deny: Vec::new(),
            trust_zone: Self::default_trust_zone(),
            auto_approve: AutoApproveConfig::default(),
        }
    }
}

/// A tool group a mode may grant.  `Always` marks tools that are available in
/// every mode regardless of the mode's group set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolGroup {
    Read,
    Edit,
    Command,
    Browser,
    Mcp,
    Always,
}

impl std::fmt::Display for ToolGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolGroup::Read => write!(f, "read"),
            ToolGroup::Edit => write!(f, "edit"),
            ToolGroup::Command => write!(f, "command"),
            ToolGroup::Browser => write!(f, "browser"),
            ToolGroup::Mcp => write!(f, "mcp"),
            ToolGroup::Always => write!(f, "always"),
        }
    }
}

/// One operating mode: a named tool-group grant plus the prompt persona the
/// model assumes while the mode is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeConfig {
    pub slug: String,
    pub name: String,
    /// Role prompt prepended to the system prompt while this mode is active
    #[serde(default)]
    pub role_prompt: String,
    #[serde(default)]
    pub custom_instructions: String,
    pub groups: Vec<ToolGroup>,
    /// Regex over workspace-relative paths; edit tools may only touch
    /// matching files while this mode is active.
    #[serde(default)]
    pub file_restriction: Option<String>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
