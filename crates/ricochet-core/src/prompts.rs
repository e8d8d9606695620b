// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! System prompt assembly.
//!
//! The effective prompt is a fixed-order concatenation: base, mode, memory,
//! project rules, matched skills, plan context, environment, file tracker.
//! Sections that have nothing to say are omitted entirely.

use std::collections::BTreeSet;
use std::path::Path;

use walkdir::WalkDir;

use crate::modes::Mode;

pub const BASE_PROMPT: &str = "\
You are Ricochet, an agentic coding assistant operating inside the user's \
workspace. You accomplish tasks by calling the provided tools: read before \
you write, make the smallest change that satisfies the request, and verify \
the result. Tool errors come back to you as tool results; fix the problem \
or change approach instead of repeating the same call. When the task is \
done, reply with a concise summary of what changed.";

/// Role prompts for sub-agents (§sub-agent runner).  The general role gets
/// the base prompt only.
pub fn role_prompt(role: &str) -> Option<&'static str> {
    match role {
        "architect" => Some(
            "You are a software architect sub-agent. Your deliverable is analysis and \
             design: survey the relevant code, weigh the options, and produce a clear \
             recommendation with trade-offs. Do not implement.",
        ),
        "qa" => Some(
            "You are a QA sub-agent. Your deliverable is verification: run the tests, \
             probe edge cases, and report defects precisely (file, line, expected vs \
             actual). Do not fix what you find unless the goal says so.",
        ),
        "researcher" => Some(
            "You are a research sub-agent. Your deliverable is information: locate the \
             relevant code, documentation, or references and distill them into a dense, \
             factual brief. Make no changes.",
        ),
        "swarm-worker" => Some(
            "You are an autonomous swarm worker executing one task from a larger plan. \
             Complete exactly the assigned task, stay inside its scope, and finish with \
             a summary of what you did.",
        ),
        _ => None,
    }
}

/// One discovered skill: a named instruction file injected when the user's
/// request mentions it.
#[derive(Debug, Clone)]
pub struct Skill {
    pub name: String,
    pub body: String,
}

/// Discover `.ricochet/skills/**/SKILL.md`.  The skill name is its parent
/// directory name.
pub fn discover_skills(workspace: &Path) -> Vec<Skill> {
    let root = workspace.join(".ricochet").join("skills");
    if !root.is_dir() {
        return Vec::new();
    }
    let mut skills: Vec<Skill> = WalkDir::new(&root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() == "SKILL.md")
        .filter_map(|e| {
            let name = e
                .path()
                .parent()?
                .file_name()?
                .to_string_lossy()
                .into_owned();
            let body = std::fs::read_to_string(e.path()).ok()?;
            Some(Skill { name, body })
        })
        .collect();
    skills.sort_by(|a, b| a.name.cmp(&b.name));
    skills
}

/// Skills whose name appears as a word (case-insensitive) in the input.
pub fn match_skills<'a>(skills: &'a [Skill], input: &str) -> Vec<&'a Skill> {
    let lower = input.to_lowercase();
    let words: BTreeSet<&str> = lower
        .split(|c: char| !c.is_alphanumeric() && c != '-' && c != '_')
        .collect();
    skills
        .iter()
        .filter(|s| words.contains(s.name.to_lowercase().as_str()))
        .collect()
}

/// Project rules from `.ricochet/rules.md`, when present.
pub fn project_rules(workspace: &Path) -> Option<String> {
    let path = workspace.join(".ricochet").join("rules.md");
    std::fs::read_to_string(path).ok().filter(|s| !s.trim().is_empty())
}

/// Inputs for one prompt assembly.  All sections are optional except the
/// base; order is fixed.
pub struct PromptParts<'a> {
    pub base_override: Option<&'a str>,
    pub mode: &'a Mode,
    pub memory: Option<String>,
    pub rules: Option<String>,
    pub skills: Vec<&'a Skill>,
    pub plan: Option<String>,
    pub environment: Option<String>,
    pub tracked_files: &'a BTreeSet<String>,
}

pub fn assemble_system_prompt(parts: &PromptParts<'_>) -> String {
    let mut sections: Vec<String> = Vec::new();
    sections.push(parts.base_override.unwrap_or(BASE_PROMPT).to_string());

    let mut mode_section = format!("## Mode: {}\n{}", parts.mode.name, parts.mode.role_prompt);
    if !parts.mode.custom_instructions.is_empty() {
        mode_section.push_str(&format!("\n{}", parts.mode.custom_instructions));
    }
    sections.push(mode_section);

    if let Some(memory) = &parts.memory {
        sections.push(memory.clone());
    }
    if let Some(rules) = &parts.rules {
        sections.push(format!("## Project rules\n{rules}"));
    }
    for skill in &parts.skills {
        sections.push(format!("## Skill: {}\n{}", skill.name, skill.body));
    }
    if let Some(plan) = &parts.plan {
        sections.push(plan.clone());
    }
    if let Some(env) = &parts.environment {
        sections.push(format!("## Environment\n{env}"));
    }
    if !parts.tracked_files.is_empty() {
        let list: Vec<&str> = parts.tracked_files.iter().map(|s| s.as_str()).collect();
        sections.push(format!(
            "## Files touched this session\n{}",
            list.join("\n")
        ));
    }

    sections.join("\n\n")
}

/// Ephemeral reminder appended as the last message of each turn, describing
/// the active mode's constraints without polluting the stored history.
pub fn mode_reminder(mode: &Mode, plan_mode: bool) -> String {
    if plan_mode {
        format!(
            "[Reminder: you are in PLAN MODE on top of '{}'. Only read-only \
             exploration is allowed; write and command tools will be rejected. \
             Produce a plan, or call switch_mode when ready to implement.]",
            mode.slug
        )
    } else {
        format!(
            "[Reminder: active mode is '{}' ({}). Tools outside this mode's \
             grants are unavailable.]",
            mode.slug, mode.name
        )
    }
}

/// Environment section: workspace path, platform, time.
pub fn environment_section(workspace: &Path) -> String {
    format!(
        "workspace: {}\nplatform: {}",
        workspace.display(),
        std::env::consts::OS
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modes::ModeManager;

    fn code_mode() -> Mode {
        ModeManager::new(&[]).get("code").unwrap()
    }

    #[test]
    fn role_prompts_cover_the_known_roles() {
        for role in ["architect", "qa", "researcher", "swarm-worker"] {
            assert!(role_prompt(role).is_some(), "{role}");
        }
        assert!(role_prompt("general").is_none());
    }

    #[test]
    fn assembly_order_is_fixed() {
        let mode = code_mode();
        let skills = vec![Skill {
            name: "deploy".into(),
            body: "run the deploy script".into(),
        }];
        let tracked: BTreeSet<String> = ["src/main.rs".to_string()].into();
        let prompt = assemble_system_prompt(&PromptParts {
            base_override: None,
            mode: &mode,
            memory: Some("## Persistent memory\n- k: v\n".into()),
            rules: Some("always use rustfmt".into()),
            skills: skills.iter().collect(),
            plan: Some("## Current plan\n[ ] 1: t\n".into()),
            environment: Some("workspace: /w".into()),
            tracked_files: &tracked,
        });

        let idx = |needle: &str| prompt.find(needle).unwrap_or_else(|| panic!("{needle}"));
        let order = [
            idx("You are Ricochet"),
            idx("## Mode: Code"),
            idx("## Persistent memory"),
            idx("## Project rules"),
            idx("## Skill: deploy"),
            idx("## Current plan"),
            idx("## Environment"),
            idx("## Files touched this session"),
        ];
        assert!(order.windows(2).all(|w| w[0] < w[1]), "{order:?}");
    }

    #[test]
    fn empty_sections_are_omitted() {
        let mode = code_mode();
        let tracked = BTreeSet::new();
        let prompt = assemble_system_prompt(&PromptParts {
            base_override: None,
            mode: &mode,
            memory: None,
            rules: None,
            skills: vec![],
            plan: None,
            environment: None,
            tracked_files: &tracked,
        });
        assert!(!prompt.contains("## Persistent memory"));
        assert!(!prompt.contains("## Project rules"));
        assert!(!prompt.contains("## Files touched"));
    }

    #[test]
    fn base_override_replaces_base() {
        let mode = code_mode();
        let tracked = BTreeSet::new();
        let prompt = assemble_system_prompt(&PromptParts {
            base_override: Some("CUSTOM BASE"),
            mode: &mode,
            memory: None,
            rules: None,
            skills: vec![],
            plan: None,
            environment: None,
            tracked_files: &tracked,
        });
        assert!(prompt.starts_with("CUSTOM BASE"));
        assert!(!prompt.contains("You are Ricochet"));
    }

    #[test]
    fn mode_reminder_mentions_plan_mode() {
        let mode = code_mode();
        assert!(mode_reminder(&mode, true).contains("PLAN MODE"));
        assert!(mode_reminder(&mode, false).contains("'code'"));
    }

    // ── skills ────────────────────────────────────────────────────────────────

    #[test]
    fn skills_are_discovered_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zeta", "alpha"] {
            let d = dir.path().join(".ricochet/skills").join(name);
            std::fs::create_dir_all(&d).unwrap();
            std::fs::write(d.join("SKILL.md"), format!("how to {name}")).unwrap();
        }
        let skills = discover_skills(dir.path());
        assert_eq!(skills.len(), 2);
        assert_eq!(skills[0].name, "alpha");
        assert_eq!(skills[1].name, "zeta");
    }

    #[test]
    fn no_skills_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_skills(dir.path()).is_empty());
    }

    #[test]
    fn skill_matching_is_word_based_and_case_insensitive() {
        let skills = vec![
            Skill {
                name: "deploy".into(),
                body: String::new(),
            },
            Skill {
                name: "review".into(),
                body: String::new(),
            },
        ];
        let matched = match_skills(&skills, "please Deploy the service");
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "deploy");
        // substring inside another word must not match
        let matched = match_skills(&skills, "redeployment stats");
        assert!(matched.is_empty());
    }

    #[test]
    fn project_rules_read_when_present() {
        let dir = tempfile::tempdir().unwrap();
        assert!(project_rules(dir.path()).is_none());
        std::fs::create_dir_all(dir.path().join(".ricochet")).unwrap();
        std::fs::write(dir.path().join(".ricochet/rules.md"), "rule one").unwrap();
        assert_eq!(project_rules(dir.path()).as_deref(), Some("rule one"));
    }
}
