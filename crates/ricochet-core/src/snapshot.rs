// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Workspace snapshotting behind a trait seam.
//!
//! The default implementation is a "shadow git": a git directory kept under
//! the state dir whose work-tree is the user's workspace.  Commits and
//! restores never touch the user's own `.git`.

use std::path::{Path, PathBuf};
use std::process::Output;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

/// A restorable whole-workspace snapshot facility.
#[async_trait]
pub trait WorkspaceSnapshotter: Send + Sync {
    /// Snapshot the current workspace state; returns an opaque snapshot id.
    async fn commit(&self, label: &str) -> anyhow::Result<String>;
    /// Restore the workspace to a previous snapshot, discarding newer files.
    async fn restore(&self, id: &str) -> anyhow::Result<()>;
    /// (id, label) pairs, newest first.
    async fn list(&self) -> anyhow::Result<Vec<(String, String)>>;
}

pub struct GitSnapshotter {
    workspace: PathBuf,
    git_dir: PathBuf,
    /// git mutates its index; calls are serialized.
    lock: Mutex<()>,
}

impl GitSnapshotter {
    /// Shadow repo location: `<state_dir>/shadow-git/shadow-<hash>/`, where
    /// the hash is derived from the workspace path so every workspace gets
    /// its own shadow history.
    pub fn new(workspace: PathBuf, state_dir: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(workspace.to_string_lossy().as_bytes());
        let hash = hex::encode(&hasher.finalize()[..8]);
        let git_dir = state_dir
            .join("shadow-git")
            .join(format!("shadow-{hash}"))
            .join(".git");
        Self {
            workspace,
            git_dir,
            lock: Mutex::new(()),
        }
    }

    async fn git(&self, args: &[&str]) -> anyhow::Result<Output> {
        let output = tokio::process::Command::new("git")
            .arg("--git-dir")
            .arg(&self.git_dir)
            .arg("--work-tree")
            .arg(&self.workspace)
            .args(args)
            .output()
            .await?;
        Ok(output)
    }

    async fn git_ok(&self, args: &[&str]) -> anyhow::Result<String> {
        let out = self.git(args).await?;
        if !out.status.success() {
            anyhow::bail!(
                "git {:?} failed: {}",
                args,
                String::from_utf8_lossy(&out.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }

    async fn ensure_repo(&self) -> anyhow::Result<()> {
        if self.git_dir.join("HEAD").exists() {
            return Ok(());
        }
        tokio::fs::create_dir_all(&self.git_dir).await?;
        self.git_ok(&["init"]).await?;
        // Identity is local to the shadow repo; commits are machine-made.
        self.git_ok(&["config", "user.email", "ricochet@localhost"])
            .await?;
        self.git_ok(&["config", "user.name", "ricochet"]).await?;
        debug!(git_dir = %self.git_dir.display(), "initialized shadow git repo");
        Ok(())
    }
}

#[async_trait]
impl WorkspaceSnapshotter for GitSnapshotter {
    async fn commit(&self, label: &str) -> anyhow::Result<String> {
        let _guard = self.lock.lock().await;
        self.ensure_repo().await?;
        self.git_ok(&["add", "-A"]).await?;
        self.git_ok(&["commit", "--allow-empty", "-m", label]).await?;
        let hash = self.git_ok(&["rev-parse", "HEAD"]).await?;
        debug!(hash = %hash, label, "shadow checkpoint committed");
        Ok(hash)
    }

    async fn restore(&self, id: &str) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        self.ensure_repo().await?;
        self.git_ok(&["reset", "--hard", id]).await?;
        // Drop files created after the snapshot.
        self.git_ok(&["clean", "-fd"]).await?;
        Ok(())
    }

    async fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let _guard = self.lock.lock().await;
        self.ensure_repo().await?;
        let out = self.git(&["log", "--pretty=format:%H %s"]).await?;
        if !out.status.success() {
            return Ok(Vec::new()); // no commits yet
        }
        Ok(String::from_utf8_lossy(&out.stdout)
            .lines()
            .filter_map(|l| {
                let (hash, label) = l.split_once(' ')?;
                Some((hash.to_string(), label.to_string()))
            })
            .collect())
    }
}

/// No-op snapshotter for hosts that disable checkpointing.
pub struct NullSnapshotter;

#[async_trait]
impl WorkspaceSnapshotter for NullSnapshotter {
    async fn commit(&self, _label: &str) -> anyhow::Result<String> {
        Ok(String::new())
    }
    async fn restore(&self, _id: &str) -> anyhow::Result<()> {
        anyhow::bail!("snapshotting is disabled")
    }
    async fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        Ok(Vec::new())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
