// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod registry;
pub mod tool;

pub use registry::{ToolRegistry, ToolSchema};
pub use tool::{category_for, Tool, ToolCall, ToolCategory, ToolOutput, ALWAYS_ALLOWED};

pub use builtin::apply_diff::ApplyDiffTool;
pub use builtin::browser::{
    BrowserClickTool, BrowserOpenTool, BrowserScreenshotTool, BrowserState, BrowserTypeTool,
};
pub use builtin::edit::{
    CreateDirectoryTool, DeleteFileTool, InsertCodeBlockTool, ReplaceFileContentTool,
    WriteFileTool, WriteToFileTool,
};
pub use builtin::exec::{ExecuteCommandTool, RunCommandTool};
pub use builtin::list_dir::ListDirTool;
pub use builtin::notify::{Notification, NotifyUserTool};
pub use builtin::read_file::{ReadFileTool, ViewFileTool};
pub use builtin::search::{CodebaseSearchTool, FindByNameTool, GrepSearchTool};

use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Register the full built-in tool surface for a workspace.
///
/// `notify_tx` receives [`Notification`]s from `notify_user`; meta tools with
/// engine-side state (plan, swarm, modes, subtasks) are registered separately
/// by the controller that owns that state.
pub fn builtin_registry(
    workspace: &Path,
    command_timeout_secs: u64,
    notify_tx: mpsc::Sender<Notification>,
) -> ToolRegistry {
    let ws = workspace.to_path_buf();
    let browser = BrowserState::new();

    let mut reg = ToolRegistry::new();
    reg.register(ReadFileTool { workspace: ws.clone() });
    reg.register(ViewFileTool { workspace: ws.clone() });
    reg.register(ListDirTool { workspace: ws.clone() });
    reg.register(GrepSearchTool { workspace: ws.clone() });
    reg.register(CodebaseSearchTool { workspace: ws.clone() });
    reg.register(FindByNameTool { workspace: ws.clone() });
    reg.register(WriteFileTool { workspace: ws.clone() });
    reg.register(WriteToFileTool { workspace: ws.clone() });
    reg.register(ReplaceFileContentTool { workspace: ws.clone() });
    reg.register(ApplyDiffTool { workspace: ws.clone() });
    reg.register(DeleteFileTool { workspace: ws.clone() });
    reg.register(CreateDirectoryTool { workspace: ws.clone() });
    reg.register(InsertCodeBlockTool { workspace: ws.clone() });
    reg.register(ExecuteCommandTool {
        workspace: ws.clone(),
        timeout_secs: command_timeout_secs,
    });
    reg.register(RunCommandTool {
        workspace: ws.clone(),
        timeout_secs: command_timeout_secs,
    });
    reg.register(BrowserOpenTool {
        state: Arc::clone(&browser),
    });
    reg.register(BrowserClickTool {
        state: Arc::clone(&browser),
    });
    reg.register(BrowserTypeTool {
        state: Arc::clone(&browser),
    });
    reg.register(BrowserScreenshotTool { state: browser });
    reg.register(NotifyUserTool::new(notify_tx));
    reg
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_covers_the_tool_surface() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let reg = builtin_registry(dir.path(), 30, tx);
        for name in [
            "read_file",
            "view_file",
            "list_dir",
            "grep_search",
            "codebase_search",
            "find_by_name",
            "write_file",
            "write_to_file",
            "replace_file_content",
            "apply_diff",
            "delete_file",
            "create_directory",
            "insert_code_block",
            "execute_command",
            "run_command",
            "browser_open",
            "browser_click",
            "browser_type",
            "browser_screenshot",
            "notify_user",
        ] {
            assert!(reg.get(name).is_some(), "missing builtin tool {name}");
        }
    }

    #[test]
    fn builtin_schemas_are_well_formed() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let reg = builtin_registry(dir.path(), 30, tx);
        for schema in reg.schemas() {
            assert!(!schema.description.is_empty(), "{}", schema.name);
            assert_eq!(schema.parameters["type"], "object", "{}", schema.name);
        }
    }
}
