// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A content snapshot of selected workspace files, restorable verbatim.
/// Unlike the shadow-git snapshotter this captures an explicit file list,
/// which makes it cheap enough to use per tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    /// workspace-relative path → captured content
    pub files: BTreeMap<String, String>,
}

pub struct CheckpointManager {
    workspace: PathBuf,
    dir: PathBuf,
}

impl CheckpointManager {
    pub fn new(workspace: PathBuf) -> Self {
        let dir = workspace.join(".ricochet").join("checkpoints");
        Self { workspace, dir }
    }

    /// Capture `paths` (workspace-relative) under a fresh checkpoint id.
    /// Unreadable files are recorded as absent rather than failing the save.
    pub fn save(&self, label: &str, paths: &[String]) -> anyhow::Result<Checkpoint> {
        let mut files = BTreeMap::new();
        for p in paths {
            let full = self.workspace.join(p);
            if let Ok(content) = std::fs::read_to_string(&full) {
                files.insert(p.clone(), content);
            }
        }
        let cp = Checkpoint {
            id: Uuid::new_v4().to_string(),
            label: label.to_string(),
            created_at: Utc::now(),
            files,
        };
        std::fs::create_dir_all(&self.dir)?;
        let short = &cp.id[..8.min(cp.id.len())];
        let file = self
            .dir
            .join(format!("{}_{short}.json", cp.created_at.timestamp_millis()));
        std::fs::write(&file, serde_json::to_string_pretty(&cp)?)?;
        Ok(cp)
    }

    /// All checkpoints, newest first.
    pub fn list(&self) -> Vec<Checkpoint> {
        let Ok(rd) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut cps: Vec<Checkpoint> = rd
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
            .filter_map(|e| {
                let text = std::fs::read_to_string(e.path()).ok()?;
                serde_json::from_str(&text).ok()
            })
            .collect();
        cps.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        cps
    }

    /// Restore by full id or unique prefix.  Files are written back verbatim,
    /// creating parent directories; the first write failure aborts.
    pub fn restore(&self, id_or_prefix: &str) -> anyhow::Result<Checkpoint> {
        let matches: Vec<Checkpoint> = self
            .list()
            .into_iter()
            .filter(|c| c.id.starts_with(id_or_prefix))
            .collect();
        let cp = match matches.len() {
            0 => anyhow::bail!("no checkpoint matches '{id_or_prefix}'"),
            1 => matches.into_iter().next().expect("len checked"),
            n => anyhow::bail!("'{id_or_prefix}' is ambiguous ({n} checkpoints)"),
        };
        for (rel, content) in &cp.files {
            let full = self.workspace.join(rel);
            if let Some(parent) = full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full, content)
                .map_err(|e| anyhow::anyhow!("restoring {rel}: {e}"))?;
        }
        Ok(cp)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> (tempfile::TempDir, CheckpointManager) {
        let ws = tempfile::tempdir().unwrap();
        let mgr = CheckpointManager::new(ws.path().to_path_buf());
        (ws, mgr)
    }

    #[test]
    fn save_restore_round_trip_is_byte_exact() {
        let (ws, mgr) = fixture();
        std::fs::create_dir_all(ws.path().join("src")).unwrap();
        std::fs::write(ws.path().join("src/a.rs"), "fn a() {}\n").unwrap();
        std::fs::write(ws.path().join("b.txt"), "original b").unwrap();

        let cp = mgr
            .save("pre-edit", &["src/a.rs".into(), "b.txt".into()])
            .unwrap();
        assert_eq!(cp.files.len(), 2);

        std::fs::write(ws.path().join("src/a.rs"), "fn a() { ruined() }\n").unwrap();
        std::fs::remove_file(ws.path().join("b.txt")).unwrap();

        mgr.restore(&cp.id).unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.path().join("src/a.rs")).unwrap(),
            "fn a() {}\n"
        );
        assert_eq!(
            std::fs::read_to_string(ws.path().join("b.txt")).unwrap(),
            "original b"
        );
    }

    #[test]
    fn restore_by_prefix() {
        let (ws, mgr) = fixture();
        std::fs::write(ws.path().join("f.txt"), "v1").unwrap();
        let cp = mgr.save("one", &["f.txt".into()]).unwrap();
        std::fs::write(ws.path().join("f.txt"), "v2").unwrap();
        mgr.restore(&cp.id[..8]).unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.path().join("f.txt")).unwrap(),
            "v1"
        );
    }

    #[test]
    fn restore_unknown_id_fails() {
        let (_ws, mgr) = fixture();
        assert!(mgr.restore("deadbeef").is_err());
    }

    #[test]
    fn list_is_sorted_newest_first() {
        let (ws, mgr) = fixture();
        std::fs::write(ws.path().join("f.txt"), "x").unwrap();
        mgr.save("first", &["f.txt".into()]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        mgr.save("second", &["f.txt".into()]).unwrap();
        let list = mgr.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].label, "second");
        assert_eq!(list[1].label, "first");
    }

    #[test]
    fn unreadable_files_are_skipped_not_fatal() {
        let (_ws, mgr) = fixture();
        let cp = mgr.save("missing", &["nope.txt".into()]).unwrap();
        assert!(cp.files.is_empty());
    }

    #[test]
    fn checkpoints_are_stored_under_dot_ricochet() {
        let (ws, mgr) = fixture();
        std::fs::write(ws.path().join("f.txt"), "x").unwrap();
        mgr.save("loc", &["f.txt".into()]).unwrap();
        assert!(ws.path().join(".ricochet/checkpoints").is_dir());
        assert_eq!(mgr.dir(), ws.path().join(".ricochet/checkpoints"));
    }

    #[test]
    fn restore_recreates_missing_parent_dirs() {
        let (ws, mgr) = fixture();
        std::fs::create_dir_all(ws.path().join("deep/nest")).unwrap();
        std::fs::write(ws.path().join("deep/nest/f.txt"), "data").unwrap();
        let cp = mgr.save("nested", &["deep/nest/f.txt".into()]).unwrap();
        std::fs::remove_dir_all(ws.path().join("deep")).unwrap();
        mgr.restore(&cp.id).unwrap();
        assert_eq!(
            std::fs::read_to_string(ws.path().join("deep/nest/f.txt")).unwrap(),
            "data"
        );
    }
}
