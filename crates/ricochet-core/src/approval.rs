// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Host-facing seams of the turn loop: batch tool approval, pre-tool hooks,
//! and the optional quality-control runner.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use ricochet_tools::{ToolCall, ToolCategory};

/// The host's answer to a batch approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalDecision {
    Yes,
    /// Approve and flip the matching auto-approval categories for the rest
    /// of the session.
    YesAlways,
    No,
}

/// One tool call awaiting approval, pre-digested for display.
#[derive(Debug, Clone)]
pub struct ApprovalItem {
    pub tool: String,
    pub category: ToolCategory,
    /// Short human-readable rendering of the arguments.
    pub summary: String,
}

/// Asks the host whether a batch of non-auto-approved tool calls may run.
#[async_trait]
pub trait Approver: Send + Sync {
    async fn approve(&self, session_id: &str, items: &[ApprovalItem]) -> ApprovalDecision;
}

/// Headless default: approve everything.  Interactive hosts install their
/// own approver.
pub struct AutoApprover;

#[async_trait]
impl Approver for AutoApprover {
    async fn approve(&self, _session_id: &str, _items: &[ApprovalItem]) -> ApprovalDecision {
        ApprovalDecision::Yes
    }
}

/// Reject everything; used by tests and lockdown hosts.
pub struct DenyAllApprover;

#[async_trait]
impl Approver for DenyAllApprover {
    async fn approve(&self, _session_id: &str, _items: &[ApprovalItem]) -> ApprovalDecision {
        ApprovalDecision::No
    }
}

/// What a pre-tool hook wants done with a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookAction {
    Proceed,
    /// Run the tool, but prepend this warning line to its result.
    Warn(String),
    /// Do not run the tool; substitute this error result.
    Block(String),
}

/// Dynamic pre-tool hook.  Hooks run in registration order; the first Block
/// wins, warnings accumulate.
pub trait ToolHook: Send + Sync {
    fn before(&self, call: &ToolCall) -> HookAction;
}

/// Post-edit quality control.  When configured, the turn loop runs this
/// after any write-category tool and feeds a failure back to the model.
#[async_trait]
pub trait QcRunner: Send + Sync {
    /// Ok(()) = clean; Err(report) = the report the model must address.
    async fn run(&self) -> Result<(), String>;
}

/// QC backed by a shell command (`cargo check`, `npm test`, ...): clean when
/// it exits zero, otherwise the combined output is the report.
pub struct CommandQc {
    pub command: String,
    pub workspace: PathBuf,
    pub timeout_secs: u64,
}

#[async_trait]
impl QcRunner for CommandQc {
    async fn run(&self) -> Result<(), String> {
        let fut = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.workspace)
            .kill_on_drop(true)
            .output();
        let output = if self.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(self.timeout_secs), fut)
                .await
                .map_err(|_| format!("QC command timed out: {}", self.command))?
        } else {
            fut.await
        }
        .map_err(|e| format!("QC command failed to start: {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!(
                "QC command '{}' failed (exit {}):\n{}{}",
                self.command,
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn auto_approver_says_yes() {
        let a = AutoApprover;
        assert_eq!(a.approve("s", &[]).await, ApprovalDecision::Yes);
    }

    #[tokio::test]
    async fn deny_all_says_no() {
        let a = DenyAllApprover;
        let items = vec![ApprovalItem {
            tool: "write_file".into(),
            category: ToolCategory::Edit,
            summary: "write_file(path=x)".into(),
        }];
        assert_eq!(a.approve("s", &items).await, ApprovalDecision::No);
    }

    #[test]
    fn hook_actions_compare() {
        assert_eq!(HookAction::Proceed, HookAction::Proceed);
        assert_ne!(
            HookAction::Warn("a".into()),
            HookAction::Block("a".into())
        );
    }

    struct BlockWrites;
    impl ToolHook for BlockWrites {
        fn before(&self, call: &ToolCall) -> HookAction {
            if call.name == "write_file" {
                HookAction::Block("writes are frozen".into())
            } else {
                HookAction::Proceed
            }
        }
    }

    #[test]
    fn hooks_can_block_by_name() {
        let h = BlockWrites;
        let call = ToolCall {
            id: "1".into(),
            name: "write_file".into(),
            args: json!({}),
        };
        assert_eq!(h.before(&call), HookAction::Block("writes are frozen".into()));
        let call = ToolCall {
            id: "2".into(),
            name: "read_file".into(),
            args: json!({}),
        };
        assert_eq!(h.before(&call), HookAction::Proceed);
    }

    #[tokio::test]
    async fn command_qc_passes_on_zero_exit() {
        let dir = tempfile::tempdir().unwrap();
        let qc = CommandQc {
            command: "true".into(),
            workspace: dir.path().to_path_buf(),
            timeout_secs: 10,
        };
        assert!(qc.run().await.is_ok());
    }

    #[tokio::test]
    async fn command_qc_reports_failure_output() {
        let dir = tempfile::tempdir().unwrap();
        let qc = CommandQc {
            command: "echo broken && exit 2".into(),
            workspace: dir.path().to_path_buf(),
            timeout_secs: 10,
        };
        let err = qc.run().await.unwrap_err();
        assert!(err.contains("broken"));
        assert!(err.contains("exit 2"));
    }
}
