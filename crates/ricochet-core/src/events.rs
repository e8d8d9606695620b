// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use ricochet_model::Message;

/// Context-window status computed before each provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextStatus {
    pub tokens_used: usize,
    pub tokens_max: usize,
    pub percent: f32,
    pub was_condensed: bool,
    pub was_truncated: bool,
}

/// One streamed update for a chat session: either a message snapshot (the
/// growing assistant reply, or a finished message), a context status, or an
/// informational line (injection notices, translated errors).
#[derive(Debug, Clone)]
pub struct ChatUpdate {
    pub session_id: String,
    pub message: Option<Message>,
    pub context: Option<ContextStatus>,
    pub info: Option<String>,
}

impl ChatUpdate {
    pub fn message(session_id: impl Into<String>, message: Message) -> Self {
        Self {
            session_id: session_id.into(),
            message: Some(message),
            context: None,
            info: None,
        }
    }

    pub fn context(session_id: impl Into<String>, context: ContextStatus) -> Self {
        Self {
            session_id: session_id.into(),
            message: None,
            context: Some(context),
            info: None,
        }
    }

    pub fn info(session_id: impl Into<String>, info: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            message: None,
            context: None,
            info: Some(info.into()),
        }
    }
}

/// Where a background task currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Started,
    Progress,
    Done,
    Failed,
}

/// Progress event for plan/swarm/sub-agent activity.  `color` is stable per
/// role so a UI can tell nested agents apart.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub session_id: String,
    pub task_id: String,
    pub role: String,
    pub state: TaskState,
    pub message: String,
    pub color: &'static str,
}

/// Stable display color per sub-agent role.
pub fn role_color(role: &str) -> &'static str {
    match role {
        "architect" => "magenta",
        "qa" => "yellow",
        "researcher" => "cyan",
        "swarm-worker" => "green",
        _ => "blue",
    }
}

/// The engine's callback payload: chat updates and task progress share one
/// channel, tagged at the boundary.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    Chat(ChatUpdate),
    Task(TaskProgress),
}

impl EngineEvent {
    pub fn session_id(&self) -> &str {
        match self {
            EngineEvent::Chat(c) => &c.session_id,
            EngineEvent::Task(t) => &t.session_id,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
