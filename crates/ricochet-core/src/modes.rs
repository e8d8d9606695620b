// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Operating modes: named tool-group grants with a prompt persona.
//!
//! Three built-in modes always exist; user modes from `.ricochet/modes.yaml`
//! are merged over them by slug.  The active slug lives behind a lock so the
//! `switch_mode` tool and the turn loop observe the same state.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use regex::Regex;

use ricochet_config::{ModeConfig, ToolGroup};
use ricochet_tools::{category_for, ALWAYS_ALLOWED};

#[derive(Debug, Clone)]
pub struct Mode {
    pub slug: String,
    pub name: String,
    pub role_prompt: String,
    pub custom_instructions: String,
    pub groups: BTreeSet<ToolGroup>,
    pub file_restriction: Option<Regex>,
}

impl Mode {
    fn from_config(cfg: &ModeConfig) -> Self {
        Self {
            slug: cfg.slug.clone(),
            name: cfg.name.clone(),
            role_prompt: cfg.role_prompt.clone(),
            custom_instructions: cfg.custom_instructions.clone(),
            groups: cfg.groups.iter().copied().collect(),
            // An invalid user regex restricts everything rather than nothing.
            file_restriction: cfg.file_restriction.as_deref().map(|r| {
                Regex::new(r).unwrap_or_else(|_| Regex::new("$^").expect("static regex"))
            }),
        }
    }
}

fn built_in_modes() -> Vec<Mode> {
    vec![
        Mode {
            slug: "code".into(),
            name: "Code".into(),
            role_prompt: "You are a senior software engineer working directly in the user's \
                          workspace. Make the requested changes with the minimum number of \
                          precise tool calls, verify your work, and report what you changed."
                .into(),
            custom_instructions: String::new(),
            groups: [
                ToolGroup::Read,
                ToolGroup::Edit,
                ToolGroup::Command,
                ToolGroup::Browser,
                ToolGroup::Mcp,
            ]
            .into_iter()
            .collect(),
            file_restriction: None,
        },
        Mode {
            slug: "architect".into(),
            name: "Architect".into(),
            role_prompt: "You are a software architect. Explore the codebase, weigh designs, \
                          and produce plans and design documents. You may only edit Markdown \
                          files; implementation happens in code mode."
                .into(),
            custom_instructions: String::new(),
            groups: [ToolGroup::Read, ToolGroup::Edit, ToolGroup::Browser]
                .into_iter()
                .collect(),
            file_restriction: Some(Regex::new(r"\.md$").expect("static regex")),
        },
        Mode {
            slug: "ask".into(),
            name: "Ask".into(),
            role_prompt: "You answer questions about the codebase. Read and search as needed; \
                          never modify anything."
                .into(),
            custom_instructions: String::new(),
            groups: [ToolGroup::Read, ToolGroup::Browser].into_iter().collect(),
            file_restriction: None,
        },
    ]
}

pub struct ModeManager {
    modes: RwLock<HashMap<String, Mode>>,
    active: RwLock<String>,
}

impl ModeManager {
    /// Built-ins plus user modes (user wins on slug collision); `code` is the
    /// initial active mode.
    pub fn new(user_modes: &[ModeConfig]) -> Self {
        let mut map: HashMap<String, Mode> = built_in_modes()
            .into_iter()
            .map(|m| (m.slug.clone(), m))
            .collect();
        for cfg in user_modes {
            map.insert(cfg.slug.clone(), Mode::from_config(cfg));
        }
        Self {
            modes: RwLock::new(map),
            active: RwLock::new("code".into()),
        }
    }

    pub fn active_slug(&self) -> String {
        self.active.read().expect("mode lock poisoned").clone()
    }

    pub fn active(&self) -> Mode {
        let slug = self.active_slug();
        self.get(&slug).expect("active mode always exists")
    }

    pub fn get(&self, slug: &str) -> Option<Mode> {
        self.modes
            .read()
            .expect("mode lock poisoned")
            .get(slug)
            .cloned()
    }

    pub fn slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self
            .modes
            .read()
            .expect("mode lock poisoned")
            .keys()
            .cloned()
            .collect();
        slugs.sort();
        slugs
    }

    /// Switch the active mode.  Unknown slugs are rejected.
    pub fn switch(&self, slug: &str) -> Result<Mode, String> {
        let mode = self
            .get(slug)
            .ok_or_else(|| format!("unknown mode: {slug}"))?;
        *self.active.write().expect("mode lock poisoned") = slug.to_string();
        Ok(mode)
    }

    /// Is `tool` exposed to the model while `mode` is active?
    ///
    /// The always-allowed meta tools pass unconditionally.  `start_subtask`
    /// drives arbitrary downstream tools, so it requires the Command grant.
    /// Everything else maps its category onto a group and checks the grant.
    pub fn is_tool_allowed(&self, mode: &Mode, tool: &str) -> bool {
        if ALWAYS_ALLOWED.contains(&tool) {
            return true;
        }
        let group = if tool == "start_subtask" {
            ToolGroup::Command
        } else {
            category_for(tool).group()
        };
        mode.groups.contains(&group)
    }

    /// May an edit-category tool touch `path` in this mode?
    pub fn is_file_allowed(&self, mode: &Mode, path: &str) -> bool {
        match &mode.file_restriction {
            Some(re) => re.is_match(path),
            None => true,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
