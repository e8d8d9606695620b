// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// How many memory entries are rendered into the system prompt.  Older
/// entries stay on disk but are not injected.
const PROMPT_ENTRY_LIMIT: usize = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Persistent key→value memory, one JSON file per state dir.
pub struct MemoryManager {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, MemoryEntry>>,
}

impl MemoryManager {
    pub fn new(state_dir: &std::path::Path) -> Self {
        let path = state_dir.join("memory.json");
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default();
        Self {
            path,
            entries: RwLock::new(entries),
        }
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().expect("memory lock poisoned").insert(
            key.into(),
            MemoryEntry {
                value: value.into(),
                updated_at: Utc::now(),
            },
        );
        self.save();
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .expect("memory lock poisoned")
            .get(key)
            .map(|e| e.value.clone())
    }

    pub fn remove(&self, key: &str) -> bool {
        let removed = self
            .entries
            .write()
            .expect("memory lock poisoned")
            .remove(key)
            .is_some();
        if removed {
            self.save();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("memory lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render the newest entries as a bulleted system-prompt section.
    /// Returns `None` when the store is empty.
    pub fn get_system_prompt_part(&self) -> Option<String> {
        let entries = self.entries.read().expect("memory lock poisoned");
        if entries.is_empty() {
            return None;
        }
        let mut sorted: Vec<(&String, &MemoryEntry)> = entries.iter().collect();
        sorted.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        let mut out = String::from("## Persistent memory\n");
        for (key, entry) in sorted.into_iter().take(PROMPT_ENTRY_LIMIT) {
            out.push_str(&format!("- {key}: {}\n", entry.value));
        }
        Some(out)
    }

    fn save(&self) {
        let entries = self.entries.read().expect("memory lock poisoned");
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&*entries) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!("cannot persist memory: {e}");
                }
            }
            Err(e) => warn!("cannot serialize memory: {e}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr() -> (tempfile::TempDir, MemoryManager) {
        let dir = tempfile::tempdir().unwrap();
        let m = MemoryManager::new(dir.path());
        (dir, m)
    }

    #[test]
    fn set_get_remove() {
        let (_d, m) = mgr();
        m.set("build", "cargo build --release");
        assert_eq!(m.get("build").as_deref(), Some("cargo build --release"));
        assert!(m.remove("build"));
        assert!(m.get("build").is_none());
        assert!(!m.remove("build"));
    }

    #[test]
    fn set_overwrites() {
        let (_d, m) = mgr();
        m.set("k", "v1");
        m.set("k", "v2");
        assert_eq!(m.get("k").as_deref(), Some("v2"));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let m = MemoryManager::new(dir.path());
            m.set("style", "no unwrap in library code");
        }
        let m2 = MemoryManager::new(dir.path());
        assert_eq!(m2.get("style").as_deref(), Some("no unwrap in library code"));
    }

    #[test]
    fn empty_store_renders_no_prompt_part() {
        let (_d, m) = mgr();
        assert!(m.get_system_prompt_part().is_none());
    }

    #[test]
    fn prompt_part_lists_entries() {
        let (_d, m) = mgr();
        m.set("test_cmd", "cargo nextest run");
        let part = m.get_system_prompt_part().unwrap();
        assert!(part.starts_with("## Persistent memory"));
        assert!(part.contains("- test_cmd: cargo nextest run"));
    }

    #[test]
    fn prompt_part_is_capped_at_thirty_entries() {
        let (_d, m) = mgr();
        for i in 0..40 {
            m.set(format!("key{i:02}"), "v");
        }
        let part = m.get_system_prompt_part().unwrap();
        let bullet_count = part.lines().filter(|l| l.starts_with("- ")).count();
        assert_eq!(bullet_count, 30);
    }
}
