// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod approval;
pub mod checkpoint;
pub mod condense;
pub mod controller;
pub mod events;
pub mod injection;
pub mod loop_detector;
pub mod memory;
pub mod meta_tools;
pub mod modes;
pub mod plan;
pub mod prompts;
pub mod safeguard;
pub mod session;
pub mod snapshot;
pub mod subagent;
pub mod swarm;

pub use approval::{
    ApprovalDecision, ApprovalItem, Approver, AutoApprover, CommandQc, DenyAllApprover,
    HookAction, QcRunner, ToolHook,
};
pub use checkpoint::{Checkpoint, CheckpointManager};
pub use condense::{estimate_tokens, manage_context, CondenseResult};
pub use controller::{ChatInput, Controller, PLAN_MODE_NOTE};
pub use events::{
    role_color, ChatUpdate, ContextStatus, EngineEvent, TaskProgress, TaskState,
};
pub use loop_detector::{LoopDetector, LOOP_REFUSAL, STUCK_LIMIT, STUCK_MESSAGE};
pub use memory::MemoryManager;
pub use modes::{Mode, ModeManager};
pub use plan::{PlanManager, Task, TaskPriority, TaskStatus};
pub use session::{Session, SessionManager, TodoItem};
pub use snapshot::{GitSnapshotter, NullSnapshotter, WorkspaceSnapshotter};
pub use swarm::SWARM_ROOT;

#[cfg(test)]
mod tests;
