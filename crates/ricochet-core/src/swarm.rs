// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Swarm orchestrator: a background loop that drains the plan's runnable
//! tasks through bounded-parallel sub-agent workers.
//!
//! The loop runs on its own task, detached from any single chat request:
//! aborting a user turn never stops background work, only [`stop_swarm`]
//! does.  Task status transitions remain serialized by the plan manager's
//! lock, so workers can run concurrently without racing each other.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::controller::Controller;
use crate::events::{role_color, EngineEvent, TaskProgress, TaskState};
use crate::plan::{PlanManager, Task, TaskPriority, TaskStatus};

/// Synthetic parent session id for swarm-driven sub-agents.
pub const SWARM_ROOT: &str = "SWARM_ROOT";

const WORKER_ROLE: &str = "swarm-worker";

impl Controller {
    /// Start the swarm over the plan of `session_id`.  An empty plan is
    /// seeded with three reconnaissance tasks first.  Returns a status line
    /// for the tool result.
    pub async fn start_swarm(
        self: &Arc<Self>,
        session_id: &str,
        tx: mpsc::Sender<EngineEvent>,
    ) -> String {
        {
            let running = self.swarm_stop.lock().expect("swarm lock poisoned");
            if running.is_some() {
                return "swarm is already running".into();
            }
        }

        let plan = self.plan_for(session_id);
        if plan.is_empty() {
            seed_reconnaissance_plan(&plan);
            let _ = tx
                .send(EngineEvent::Task(TaskProgress {
                    session_id: session_id.to_string(),
                    task_id: String::new(),
                    role: WORKER_ROLE.into(),
                    state: TaskState::Started,
                    message: "plan was empty; seeded reconnaissance tasks".into(),
                    color: role_color(WORKER_ROLE),
                }))
                .await;
        }
        if let Err(e) = plan.validate() {
            return format!("swarm not started: plan is invalid ({e})");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.swarm_stop.lock().expect("swarm lock poisoned") = Some(stop_tx);
        self.swarm_paused.store(false, Ordering::Relaxed);

        let controller: Weak<Controller> = Arc::downgrade(self);
        let session = session_id.to_string();
        let tick = Duration::from_secs(self.config.engine.swarm_tick_secs.max(1));
        tokio::spawn(swarm_loop(controller, session, plan, tx, tick, stop_rx));

        "swarm started".into()
    }

    /// Halt the swarm loop.  Workers already in flight run to completion.
    pub fn stop_swarm(&self) {
        if let Some(stop) = self.swarm_stop.lock().expect("swarm lock poisoned").take() {
            let _ = stop.send(true);
        }
    }

    pub fn pause_swarm(&self) {
        self.swarm_paused.store(true, Ordering::Relaxed);
    }

    pub fn resume_swarm(&self) {
        self.swarm_paused.store(false, Ordering::Relaxed);
    }

    pub fn swarm_running(&self) -> bool {
        self.swarm_stop
            .lock()
            .expect("swarm lock poisoned")
            .is_some()
    }
}

/// Default reconnaissance tasks for an empty plan.
fn seed_reconnaissance_plan(plan: &PlanManager) {
    plan.add_task(
        "Scan the workspace directory layout",
        "List the top-level directories and identify where source, tests, and \
         configuration live.",
        TaskPriority::High,
    );
    plan.add_task(
        "Survey the architecture",
        "Read the main entry points and summarise how the major components fit \
         together.",
        TaskPriority::Normal,
    );
    plan.add_task(
        "Check the project manifests",
        "Read the build manifests (Cargo.toml, package.json, etc.) and report \
         dependencies and declared binaries.",
        TaskPriority::Normal,
    );
}

async fn swarm_loop(
    controller: Weak<Controller>,
    session_id: String,
    plan: Arc<PlanManager>,
    tx: mpsc::Sender<EngineEvent>,
    tick: Duration,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    debug!(session = %session_id, "swarm loop started");

    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = interval.tick() => {}
        }

        let Some(ctrl) = controller.upgrade() else {
            break; // controller dropped; nothing left to drive
        };
        if ctrl.swarm_paused.load(Ordering::Relaxed) {
            continue;
        }

        for task in plan.get_runnable_tasks() {
            let Ok(permit) = Arc::clone(&ctrl.swarm_semaphore).try_acquire_owned() else {
                break; // all workers busy; try again next tick
            };
            plan.mark_active(&task.id);
            let worker_ctrl = Arc::clone(&ctrl);
            let worker_plan = Arc::clone(&plan);
            let worker_tx = tx.clone();
            let worker_session = session_id.clone();
            tokio::spawn(async move {
                run_worker(worker_ctrl, worker_plan, worker_session, task, worker_tx).await;
                drop(permit);
            });
        }
    }
    debug!(session = %session_id, "swarm loop stopped");
}

async fn run_worker(
    controller: Arc<Controller>,
    plan: Arc<PlanManager>,
    session_id: String,
    task: Task,
    tx: mpsc::Sender<EngineEvent>,
) {
    let max_retries = if task.max_retries > 0 {
        task.max_retries
    } else {
        controller.config.engine.task_max_retries
    };

    let _ = tx
        .send(EngineEvent::Task(TaskProgress {
            session_id: session_id.clone(),
            task_id: task.id.clone(),
            role: WORKER_ROLE.into(),
            state: TaskState::Started,
            message: task.title.clone(),
            color: role_color(WORKER_ROLE),
        }))
        .await;

    let subtask = controller.run_subtask(
        SWARM_ROOT,
        &task.title,
        &task.context,
        WORKER_ROLE,
        tx.clone(),
    );
    let result = if task.timeout_secs > 0 {
        match tokio::time::timeout(Duration::from_secs(task.timeout_secs), subtask).await {
            Ok(r) => r,
            Err(_) => Err(anyhow::anyhow!(
                "task timed out after {}s",
                task.timeout_secs
            )),
        }
    } else {
        subtask.await
    };

    let success = match &result {
        Ok(json) => serde_json::from_str::<serde_json::Value>(json)
            .map(|v| v["status"] == "success")
            .unwrap_or(false),
        Err(_) => false,
    };

    if success {
        let summary = result
            .as_ref()
            .ok()
            .and_then(|json| {
                serde_json::from_str::<serde_json::Value>(json)
                    .ok()
                    .and_then(|v| v["summary"].as_str().map(|s| s.to_string()))
            })
            .unwrap_or_default();
        plan.mark_complete(&task.id);
        plan.set_task_output(&task.id, summary);
        let _ = tx
            .send(EngineEvent::Task(TaskProgress {
                session_id,
                task_id: task.id.clone(),
                role: WORKER_ROLE.into(),
                state: TaskState::Done,
                message: task.title,
                color: role_color(WORKER_ROLE),
            }))
            .await;
        return;
    }

    let error = match result {
        Ok(json) => json,
        Err(e) => e.to_string(),
    };
    let retries = plan.increment_retry_count(&task.id);
    if retries < max_retries {
        warn!(task = %task.id, retries, "swarm task failed; will retry");
        plan.update_status(&task.id, TaskStatus::Pending);
        let _ = tx
            .send(EngineEvent::Task(TaskProgress {
                session_id,
                task_id: task.id.clone(),
                role: WORKER_ROLE.into(),
                state: TaskState::Progress,
                message: format!("retry {retries}/{max_retries}: {error}"),
                color: role_color(WORKER_ROLE),
            }))
            .await;
    } else {
        warn!(task = %task.id, "swarm task failed permanently");
        plan.mark_failed(&task.id);
        let _ = tx
            .send(EngineEvent::Task(TaskProgress {
                session_id,
                task_id: task.id.clone(),
                role: WORKER_ROLE.into(),
                state: TaskState::Failed,
                message: error,
                color: role_color(WORKER_ROLE),
            }))
            .await;
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_plan_has_three_recon_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let plan = PlanManager::new(dir.path().to_path_buf());
        seed_reconnaissance_plan(&plan);
        let tasks = plan.tasks();
        assert_eq!(tasks.len(), 3);
        assert!(tasks[0].title.to_lowercase().contains("directory"));
        assert!(tasks[1].title.to_lowercase().contains("architecture"));
        assert!(tasks[2].title.to_lowercase().contains("manifest"));
        assert!(plan.validate().is_ok());
    }

    #[test]
    fn seeded_tasks_are_all_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let plan = PlanManager::new(dir.path().to_path_buf());
        seed_reconnaissance_plan(&plan);
        assert_eq!(plan.get_runnable_tasks().len(), 3);
    }
}
