// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The safeguard: trust zones, per-category auto-approval, file and command
//! policy, and the persistent permission-rule store.
//!
//! Decisions are deliberately coarse.  Deny always beats allow; unknown
//! tools default to the Safe zone; plan mode is enforced upstream in the
//! controller and never reaches this layer.

use std::path::PathBuf;
use std::sync::RwLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use ricochet_config::{SafeguardConfig, TrustZone};
use ricochet_tools::{Tool, ToolCategory};

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// Requires host approval before running.
    Ask,
    Deny(String),
}

/// A persisted per-tool rule, saved to `<state_dir>/permissions.json` when
/// the host answers "always" to an approval prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PermissionRule {
    pub tool: String,
    /// Glob over paths this rule applies to; "*" = any.
    #[serde(default = "default_any")]
    pub path: String,
    /// "allow" | "deny"
    pub action: String,
    /// "session" rules are not persisted; "project" rules are.
    #[serde(default = "default_scope")]
    pub scope: String,
}

fn default_any() -> String {
    "*".into()
}
fn default_scope() -> String {
    "project".into()
}

pub struct Safeguard {
    config: RwLock<SafeguardConfig>,
    file_allow: Vec<Regex>,
    file_deny: Vec<Regex>,
    rules: RwLock<Vec<PermissionRule>>,
    rules_path: PathBuf,
}

impl Safeguard {
    pub fn new(config: SafeguardConfig, state_dir: &std::path::Path) -> Self {
        let rules_path = state_dir.join("permissions.json");
        let rules = std::fs::read_to_string(&rules_path)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default();
        let file_allow = compile_globs(&config.file_allow);
        let file_deny = compile_globs(&config.file_deny);
        Self {
            config: RwLock::new(config),
            file_allow,
            file_deny,
            rules: RwLock::new(rules),
            rules_path,
        }
    }

    pub fn trust_zone(&self) -> TrustZone {
        self.config.read().expect("safeguard lock poisoned").trust_zone
    }

    pub fn set_trust_zone(&self, zone: TrustZone) {
        self.config
            .write()
            .expect("safeguard lock poisoned")
            .trust_zone = zone;
    }

    /// Flip one auto-approval category on (the "Yes, always" answer).
    pub fn enable_auto_approve(&self, category: ToolCategory) {
        let mut cfg = self.config.write().expect("safeguard lock poisoned");
        match category {
            ToolCategory::Read => cfg.auto_approve.read = true,
            ToolCategory::Edit => cfg.auto_approve.edit = true,
            ToolCategory::Execute => cfg.auto_approve.execute_all = true,
            ToolCategory::Browser => cfg.auto_approve.browser = true,
            ToolCategory::Mcp => cfg.auto_approve.mcp = true,
            ToolCategory::Meta => {}
        }
    }

    /// Is this category auto-approved by the current settings?
    fn category_auto_approved(&self, category: ToolCategory, command: Option<&str>) -> bool {
        // Meta tools are engine-internal and never need approval.
        if category == ToolCategory::Meta {
            return true;
        }
        let cfg = self.config.read().expect("safeguard lock poisoned");
        if !cfg.auto_approve.enabled {
            return false;
        }
        match category {
            ToolCategory::Read => cfg.auto_approve.read,
            ToolCategory::Edit => cfg.auto_approve.edit,
            ToolCategory::Execute => {
                if cfg.auto_approve.execute_all {
                    true
                } else if cfg.auto_approve.execute_safe {
                    // "safe" = the command passes the allow-list
                    command
                        .map(|c| check_command_patterns(&cfg, c).is_ok())
                        .unwrap_or(false)
                } else {
                    false
                }
            }
            ToolCategory::Browser => cfg.auto_approve.browser,
            ToolCategory::Mcp => cfg.auto_approve.mcp,
            ToolCategory::Meta => true,
        }
    }

    /// §Permission check: explicit tool deny/allow lists and persisted rules
    /// first, then auto-approval, then the trust-zone comparison.
    pub fn check_permission(&self, tool: &dyn Tool, command: Option<&str>) -> Decision {
        let name = tool.name();
        {
            let cfg = self.config.read().expect("safeguard lock poisoned");
            if cfg.tool_deny.iter().any(|t| t == name) {
                return Decision::Deny(format!("tool '{name}' is denied by policy"));
            }
            if cfg.tool_allow.iter().any(|t| t == name) {
                return Decision::Allow;
            }
        }
        for rule in self.rules.read().expect("safeguard lock poisoned").iter() {
            if rule.tool == name {
                match rule.action.as_str() {
                    "deny" => {
                        return Decision::Deny(format!("tool '{name}' is denied by a saved rule"))
                    }
                    "allow" => return Decision::Allow,
                    _ => {}
                }
            }
        }

        if self.category_auto_approved(tool.category(), command) {
            return Decision::Allow;
        }

        // Zone gate: the current zone must be at most the tool's ceiling.
        let current = self.trust_zone();
        if current.level() <= tool.required_zone().level() {
            Decision::Ask
        } else {
            Decision::Deny(format!(
                "tool '{name}' requires trust zone {} or looser; current zone is {current}",
                tool.required_zone()
            ))
        }
    }

    /// File policy: the path must match an allow glob and no deny glob.
    pub fn check_file_access(&self, path: &str, write: bool) -> Result<(), String> {
        let normalized = path.trim_start_matches("./");
        if self.file_deny.iter().any(|re| re.is_match(normalized)) {
            return Err(format!(
                "{} access to '{path}' denied by file policy",
                if write { "write" } else { "read" }
            ));
        }
        if self.file_allow.is_empty() || self.file_allow.iter().any(|re| re.is_match(normalized)) {
            Ok(())
        } else {
            Err(format!("'{path}' matches no allowed file pattern"))
        }
    }

    /// Command policy: allow pattern required, deny pattern fatal.
    pub fn check_command(&self, command: &str) -> Result<(), String> {
        let cfg = self.config.read().expect("safeguard lock poisoned");
        check_command_patterns(&cfg, command)
    }

    /// Persist a project-scoped rule (the "Yes, always" path for one tool).
    pub fn add_rule(&self, rule: PermissionRule) {
        let mut rules = self.rules.write().expect("safeguard lock poisoned");
        if !rules.contains(&rule) {
            rules.push(rule);
        }
        let persisted: Vec<&PermissionRule> =
            rules.iter().filter(|r| r.scope == "project").collect();
        match serde_json::to_string_pretty(&persisted) {
            Ok(json) => {
                if let Some(parent) = self.rules_path.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if let Err(e) = std::fs::write(&self.rules_path, json) {
                    warn!("cannot persist permission rules: {e}");
                }
            }
            Err(e) => warn!("cannot serialize permission rules: {e}"),
        }
    }

    pub fn rules(&self) -> Vec<PermissionRule> {
        self.rules.read().expect("safeguard lock poisoned").clone()
    }
}

fn check_command_patterns(cfg: &SafeguardConfig, command: &str) -> Result<(), String> {
    if cfg
        .command_deny
        .iter()
        .any(|p| command_pattern_matches(p, command))
    {
        return Err(format!("command denied by policy: {command}"));
    }
    if cfg
        .command_allow
        .iter()
        .any(|p| command_pattern_matches(p, command))
    {
        Ok(())
    } else {
        Err(format!("command matches no allowed pattern: {command}"))
    }
}

/// Command patterns: `*` matches everything, `prefix*` matches by prefix,
/// anything else must match exactly.
fn command_pattern_matches(pattern: &str, command: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return command.starts_with(prefix);
    }
    pattern == command
}

/// File globs support `**` (any path segment run), `*` (within a segment)
/// and `?`.  A leading `**/` also matches the bare remainder so that
/// `**/.env` covers both `.env` and `config/.env`.
fn compile_globs(patterns: &[String]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| file_glob_to_regex(p)).collect()
}

fn file_glob_to_regex(pattern: &str) -> Option<Regex> {
    fn translate(glob: &str) -> String {
        let mut re = String::new();
        let mut chars = glob.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        // swallow a following '/' so "**/x" can match "x"
                        if chars.peek() == Some(&'/') {
                            chars.next();
                            re.push_str("(?:.*/)?");
                        } else {
                            re.push_str(".*");
                        }
                    } else {
                        re.push_str("[^/]*");
                    }
                }
                '?' => re.push_str("[^/]"),
                c => re.push_str(&regex::escape(&c.to_string())),
            }
        }
        re
    }
    Regex::new(&format!("^{}$", translate(pattern))).ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ricochet_config::AutoApproveConfig;
    use ricochet_tools::{ToolCall, ToolOutput};
    use serde_json::{json, Value};

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, call: &ToolCall) -> ToolOutput {
            ToolOutput::ok(&call.id, "ok")
        }
    }

    fn safeguard(config: SafeguardConfig) -> (tempfile::TempDir, Safeguard) {
        let dir = tempfile::tempdir().unwrap();
        let sg = Safeguard::new(config, dir.path());
        (dir, sg)
    }

    // ── check_permission ──────────────────────────────────────────────────────

    #[test]
    fn read_tools_auto_approved_by_default() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert_eq!(
            sg.check_permission(&NamedTool("read_file"), None),
            Decision::Allow
        );
    }

    #[test]
    fn edit_tools_ask_by_default() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert_eq!(
            sg.check_permission(&NamedTool("write_file"), None),
            Decision::Ask
        );
    }

    #[test]
    fn tool_deny_list_wins() {
        let cfg = SafeguardConfig {
            tool_deny: vec!["read_file".into()],
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        assert!(matches!(
            sg.check_permission(&NamedTool("read_file"), None),
            Decision::Deny(_)
        ));
    }

    #[test]
    fn read_only_zone_denies_writes() {
        let cfg = SafeguardConfig {
            trust_zone: TrustZone::ReadOnly,
            auto_approve: AutoApproveConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        // write_file requires Safe (level 1); current ReadOnly (level 2) > 1.
        assert!(matches!(
            sg.check_permission(&NamedTool("write_file"), None),
            Decision::Deny(_)
        ));
        // read_file requires ReadOnly (level 2); 2 <= 2 → ask (auto off).
        assert_eq!(
            sg.check_permission(&NamedTool("read_file"), None),
            Decision::Ask
        );
    }

    #[test]
    fn execute_safe_auto_approves_allowlisted_commands_only() {
        let cfg = SafeguardConfig {
            command_allow: vec!["ls*".into(), "cat *".into()],
            auto_approve: AutoApproveConfig {
                execute_safe: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        assert_eq!(
            sg.check_permission(&NamedTool("execute_command"), Some("ls -la")),
            Decision::Allow
        );
        assert_eq!(
            sg.check_permission(&NamedTool("execute_command"), Some("cargo build")),
            Decision::Ask
        );
    }

    #[test]
    fn meta_tools_never_ask() {
        let cfg = SafeguardConfig {
            auto_approve: AutoApproveConfig {
                enabled: true,
                read: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        assert_eq!(
            sg.check_permission(&NamedTool("update_todos"), None),
            Decision::Allow
        );
    }

    #[test]
    fn enable_auto_approve_flips_category() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert_eq!(
            sg.check_permission(&NamedTool("write_file"), None),
            Decision::Ask
        );
        sg.enable_auto_approve(ToolCategory::Edit);
        assert_eq!(
            sg.check_permission(&NamedTool("write_file"), None),
            Decision::Allow
        );
    }

    #[test]
    fn saved_rules_apply_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sg = Safeguard::new(SafeguardConfig::default(), dir.path());
            sg.add_rule(PermissionRule {
                tool: "write_file".into(),
                path: "*".into(),
                action: "allow".into(),
                scope: "project".into(),
            });
            assert_eq!(
                sg.check_permission(&NamedTool("write_file"), None),
                Decision::Allow
            );
        }
        // reloaded from permissions.json
        let sg2 = Safeguard::new(SafeguardConfig::default(), dir.path());
        assert_eq!(sg2.rules().len(), 1);
        assert_eq!(
            sg2.check_permission(&NamedTool("write_file"), None),
            Decision::Allow
        );
    }

    // ── check_file_access ─────────────────────────────────────────────────────

    #[test]
    fn deny_beats_allow_for_files() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert!(sg.check_file_access("src/main.rs", true).is_ok());
        assert!(sg.check_file_access(".env", false).is_err());
        assert!(sg.check_file_access("config/.env", false).is_err());
        assert!(sg.check_file_access("deploy/key.pem", true).is_err());
    }

    #[test]
    fn restrictive_allow_list() {
        let cfg = SafeguardConfig {
            file_allow: vec!["src/**".into(), "*.md".into()],
            file_deny: vec![],
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        assert!(sg.check_file_access("src/deep/mod.rs", true).is_ok());
        assert!(sg.check_file_access("README.md", true).is_ok());
        assert!(sg.check_file_access("Cargo.toml", true).is_err());
    }

    #[test]
    fn git_directory_is_denied_by_default() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert!(sg.check_file_access(".git/config", true).is_err());
    }

    // ── check_command ─────────────────────────────────────────────────────────

    #[test]
    fn default_command_policy_allows_ordinary_commands() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert!(sg.check_command("cargo test").is_ok());
    }

    #[test]
    fn destructive_commands_denied_by_default() {
        let (_d, sg) = safeguard(SafeguardConfig::default());
        assert!(sg.check_command("rm -rf /etc").is_err());
        assert!(sg.check_command("dd if=/dev/zero of=/dev/sda").is_err());
    }

    #[test]
    fn command_deny_beats_allow() {
        let cfg = SafeguardConfig {
            command_allow: vec!["*".into()],
            command_deny: vec!["curl *".into()],
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        assert!(sg.check_command("curl https://example.com").is_err());
        assert!(sg.check_command("wget https://example.com").is_ok());
    }

    #[test]
    fn exact_command_pattern() {
        let cfg = SafeguardConfig {
            command_allow: vec!["make".into()],
            command_deny: vec![],
            ..Default::default()
        };
        let (_d, sg) = safeguard(cfg);
        assert!(sg.check_command("make").is_ok());
        assert!(sg.check_command("make clean").is_err());
    }

    // ── glob translation ──────────────────────────────────────────────────────

    #[test]
    fn single_star_does_not_cross_directories() {
        let re = file_glob_to_regex("src/*.rs").unwrap();
        assert!(re.is_match("src/main.rs"));
        assert!(!re.is_match("src/sub/mod.rs"));
    }

    #[test]
    fn double_star_crosses_directories() {
        let re = file_glob_to_regex("src/**").unwrap();
        assert!(re.is_match("src/a/b/c.rs"));
    }

    #[test]
    fn leading_double_star_matches_bare_name() {
        let re = file_glob_to_regex("**/.env").unwrap();
        assert!(re.is_match(".env"));
        assert!(re.is_match("a/b/.env"));
        assert!(!re.is_match(".envrc"));
    }
}
