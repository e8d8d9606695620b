// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Sub-agent runner: drive a bounded goal in a fresh child session and
//! surface the outcome to the parent as a single JSON result.
//!
//! The child session runs through the same controller (`chat` re-entry);
//! every update it emits is relayed to the parent callback with the session
//! id overridden so the UI attributes activity to the parent conversation.
//! `drive_subtask` is the recursive edge of the controller's call graph
//! (chat → start_subtask → chat), so its future is boxed.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_recursion::async_recursion;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use ricochet_model::Message;

use crate::controller::{ChatInput, Controller};
use crate::events::{role_color, ChatUpdate, EngineEvent, TaskProgress, TaskState};
use crate::prompts::{role_prompt, BASE_PROMPT};

/// Autopilot completion markers the sub-agent is instructed to emit.
pub const TASK_COMPLETE: &str = "TASK_COMPLETE";
pub const TASK_FAILED: &str = "TASK_FAILED";

/// Sub-agents may spawn sub-agents, but not without bound.
const MAX_SUBTASK_DEPTH: usize = 3;

impl Controller {
    /// Run `goal` in a fresh child session with a role-specialized prompt.
    ///
    /// Returns a JSON string:
    /// `{"status":"success","summary":…}` on a `TASK_COMPLETE` marker,
    /// `{"status":"failed","error":…,"recovery_hint":…}` on `TASK_FAILED`
    /// or turn exhaustion.
    pub async fn run_subtask(
        self: &Arc<Self>,
        parent_session_id: &str,
        goal: &str,
        context: &str,
        role: &str,
        tx: mpsc::Sender<EngineEvent>,
    ) -> anyhow::Result<String> {
        let depth = self.subtask_depth.load(Ordering::Relaxed);
        if depth >= MAX_SUBTASK_DEPTH {
            anyhow::bail!("maximum sub-agent depth ({MAX_SUBTASK_DEPTH}) reached");
        }
        self.subtask_depth.fetch_add(1, Ordering::Relaxed);
        let result = drive_subtask(
            Arc::clone(self),
            parent_session_id.to_string(),
            goal.to_string(),
            context.to_string(),
            role.to_string(),
            tx,
        )
        .await;
        self.subtask_depth.fetch_sub(1, Ordering::Relaxed);
        result
    }
}

#[async_recursion]
async fn drive_subtask(
    controller: Arc<Controller>,
    parent_session_id: String,
    goal: String,
    context: String,
    role: String,
    tx: mpsc::Sender<EngineEvent>,
) -> anyhow::Result<String> {
    let child_id = controller.sessions().create();
    debug!(parent = %parent_session_id, child = %child_id, role = %role, "spawning sub-agent");

    // Inherit the parent's active-file context.
    if let Some(parent) = controller.sessions().get(&parent_session_id) {
        if !parent.file_tracker.is_empty() {
            let files: Vec<String> = parent.file_tracker.iter().cloned().collect();
            controller.sessions().with_session(&child_id, |s| {
                s.file_tracker.extend(files.iter().cloned());
            });
        }
    }

    // Role-keyed system message with goal and context verbatim.
    let persona = role_prompt(&role).unwrap_or(BASE_PROMPT);
    controller.sessions().append(
        &child_id,
        Message::system(format!(
            "{persona}\n\nGOAL: {goal}\nCONTEXT: {context}\n\n\
             When the goal is fully achieved, output '{TASK_COMPLETE}:' followed by a \
             summary of the result. If the goal cannot be achieved, output \
             '{TASK_FAILED}:' followed by the reason and a recovery hint."
        )),
    );

    let badge = role_color(&role);
    let _ = tx
        .send(EngineEvent::Task(TaskProgress {
            session_id: parent_session_id.clone(),
            task_id: child_id.clone(),
            role: role.clone(),
            state: TaskState::Started,
            message: goal.clone(),
            color: badge,
        }))
        .await;

    // Relay: child events are forwarded with the parent's session id.
    let (relay_tx, mut relay_rx) = mpsc::channel::<EngineEvent>(256);
    let forward_tx = tx.clone();
    let relay_parent = parent_session_id.clone();
    let relay = tokio::spawn(async move {
        while let Some(event) = relay_rx.recv().await {
            let rewritten = match event {
                EngineEvent::Chat(mut u) => {
                    u.session_id = relay_parent.clone();
                    EngineEvent::Chat(u)
                }
                EngineEvent::Task(mut t) => {
                    t.session_id = relay_parent.clone();
                    EngineEvent::Task(t)
                }
            };
            if forward_tx.send(rewritten).await.is_err() {
                break;
            }
        }
    });

    let max_turns = controller.config.engine.subtask_max_turns;
    let mut outcome: Option<String> = None;
    for turn in 0..max_turns {
        let prompt = if turn == 0 {
            format!("STARTING SUBTASK: {goal}. Context: {context}. Please proceed.")
        } else {
            format!(
                "Please continue working on the subtask. If finished, output \
                 '{TASK_COMPLETE}:' followed by a summary."
            )
        };
        controller
            .chat(
                ChatInput {
                    session_id: Some(child_id.clone()),
                    content: prompt,
                    via: Some(ricochet_model::MessageSource::Subtask),
                    plan_mode: false,
                },
                relay_tx.clone(),
            )
            .await?;

        let last_text = controller
            .sessions()
            .get(&child_id)
            .and_then(|s| {
                s.messages
                    .iter()
                    .rev()
                    .find(|m| m.role == ricochet_model::Role::Assistant)
                    .map(|m| m.content.clone())
            })
            .unwrap_or_default();

        if let Some(pos) = last_text.find(TASK_COMPLETE) {
            let summary = last_text[pos + TASK_COMPLETE.len()..]
                .trim_start_matches(':')
                .trim()
                .to_string();
            outcome = Some(json!({ "status": "success", "summary": summary }).to_string());
            break;
        }
        if let Some(pos) = last_text.find(TASK_FAILED) {
            let detail = last_text[pos + TASK_FAILED.len()..]
                .trim_start_matches(':')
                .trim()
                .to_string();
            outcome = Some(
                json!({
                    "status": "failed",
                    "error": detail,
                    "recovery_hint": "adjust the goal or provide more context and retry",
                })
                .to_string(),
            );
            break;
        }
    }
    drop(relay_tx);
    let _ = relay.await;

    let result = outcome.unwrap_or_else(|| {
        json!({
            "status": "failed",
            "error": format!("subtask timed out after {max_turns} turns"),
        })
        .to_string()
    });

    let failed = result.contains("\"failed\"");
    let _ = tx
        .send(EngineEvent::Task(TaskProgress {
            session_id: parent_session_id.clone(),
            task_id: child_id.clone(),
            role: role.clone(),
            state: if failed {
                TaskState::Failed
            } else {
                TaskState::Done
            },
            message: goal.clone(),
            color: badge,
        }))
        .await;
    let _ = tx
        .send(EngineEvent::Chat(ChatUpdate::info(
            parent_session_id.clone(),
            format!("subtask [{role}] finished: {goal}"),
        )))
        .await;

    Ok(result)
}
