// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The persisted task plan: an ordered list of tasks with dependencies,
//! retries and priorities, consumed by the swarm orchestrator.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Active,
    Done,
    Failed,
}

/// Priority ordering: Critical > High > Normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    #[default]
    Normal,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Monotonic string id ("1", "2", ...); renumbered on removal.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub context: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// 0 = use the system default at execution time.
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub priority: TaskPriority,
    /// 0 = no per-task timeout.
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// Session-scoped plan, persisted to `<session dir>/plan.json` after every
/// mutation.  All operations are serialized by the internal lock.
pub struct PlanManager {
    path: PathBuf,
    tasks: Mutex<Vec<Task>>,
}

impl PlanManager {
    pub fn new(session_dir: PathBuf) -> Self {
        let path = session_dir.join("plan.json");
        let tasks = std::fs::read_to_string(&path)
            .ok()
            .and_then(|t| serde_json::from_str(&t).ok())
            .unwrap_or_default();
        Self {
            path,
            tasks: Mutex::new(tasks),
        }
    }

    fn with_tasks<R>(&self, f: impl FnOnce(&mut Vec<Task>) -> R) -> R {
        let r = {
            let mut tasks = self.tasks.lock().expect("plan lock poisoned");
            let r = f(&mut tasks);
            self.save(&tasks);
            r
        };
        r
    }

    fn save(&self, tasks: &[Task]) {
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(tasks) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!("cannot persist plan: {e}");
                }
            }
            Err(e) => warn!("cannot serialize plan: {e}"),
        }
    }

    pub fn add_task(
        &self,
        title: impl Into<String>,
        context: impl Into<String>,
        priority: TaskPriority,
    ) -> String {
        self.with_tasks(|tasks| {
            let id = (tasks.len() + 1).to_string();
            tasks.push(Task {
                id: id.clone(),
                title: title.into(),
                context: context.into(),
                status: TaskStatus::Pending,
                depends_on: Vec::new(),
                retry_count: 0,
                max_retries: 0,
                priority,
                timeout_secs: 0,
                output: None,
            });
            id
        })
    }

    /// Remove a task and renumber the remainder so ids stay monotonic
    /// ("1".."n").  Dependency lists are rewritten to the new ids; references
    /// to the removed task are dropped.
    pub fn remove_task(&self, id: &str) -> bool {
        self.with_tasks(|tasks| {
            let Some(pos) = tasks.iter().position(|t| t.id == id) else {
                return false;
            };
            tasks.remove(pos);
            // old id → new id for every surviving task
            let mapping: HashMap<String, String> = tasks
                .iter()
                .enumerate()
                .map(|(i, t)| (t.id.clone(), (i + 1).to_string()))
                .collect();
            for (i, task) in tasks.iter_mut().enumerate() {
                task.id = (i + 1).to_string();
                task.depends_on = task
                    .depends_on
                    .iter()
                    .filter_map(|d| mapping.get(d).cloned())
                    .collect();
            }
            true
        })
    }

    pub fn update_status(&self, id: &str, status: TaskStatus) -> bool {
        self.with_tasks(|tasks| {
            match tasks.iter_mut().find(|t| t.id == id) {
                Some(t) => {
                    t.status = status;
                    true
                }
                None => false,
            }
        })
    }

    pub fn mark_active(&self, id: &str) -> bool {
        self.update_status(id, TaskStatus::Active)
    }

    pub fn mark_complete(&self, id: &str) -> bool {
        self.update_status(id, TaskStatus::Done)
    }

    pub fn mark_failed(&self, id: &str) -> bool {
        self.update_status(id, TaskStatus::Failed)
    }

    pub fn set_dependencies(&self, id: &str, deps: Vec<String>) -> bool {
        self.with_tasks(|tasks| match tasks.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.depends_on = deps;
                true
            }
            None => false,
        })
    }

    pub fn set_task_output(&self, id: &str, output: impl Into<String>) -> bool {
        self.with_tasks(|tasks| match tasks.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.output = Some(output.into());
                true
            }
            None => false,
        })
    }

    pub fn set_task_options(&self, id: &str, max_retries: u32, timeout_secs: u64) -> bool {
        self.with_tasks(|tasks| match tasks.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.max_retries = max_retries;
                t.timeout_secs = timeout_secs;
                true
            }
            None => false,
        })
    }

    pub fn increment_retry_count(&self, id: &str) -> u32 {
        self.with_tasks(|tasks| match tasks.iter_mut().find(|t| t.id == id) {
            Some(t) => {
                t.retry_count += 1;
                t.retry_count
            }
            None => 0,
        })
    }

    pub fn get_task(&self, id: &str) -> Option<Task> {
        self.tasks
            .lock()
            .expect("plan lock poisoned")
            .iter()
            .find(|t| t.id == id)
            .cloned()
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().expect("plan lock poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().expect("plan lock poisoned").is_empty()
    }

    /// Pending tasks whose every dependency is Done, sorted by priority
    /// descending; insertion order breaks ties (the sort is stable).
    pub fn get_runnable_tasks(&self) -> Vec<Task> {
        let tasks = self.tasks.lock().expect("plan lock poisoned");
        let done: HashSet<&str> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Done)
            .map(|t| t.id.as_str())
            .collect();
        let mut runnable: Vec<Task> = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .filter(|t| t.depends_on.iter().all(|d| done.contains(d.as_str())))
            .cloned()
            .collect();
        runnable.sort_by(|a, b| b.priority.cmp(&a.priority));
        runnable
    }

    /// Reject dangling dependency references and cycles.
    ///
    /// Cycle detection is a tri-color DFS: white = unvisited, gray = on the
    /// current stack, black = finished.  The first back-edge (gray hit) wins.
    pub fn validate(&self) -> Result<(), String> {
        let tasks = self.tasks.lock().expect("plan lock poisoned");
        let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for t in tasks.iter() {
            for d in &t.depends_on {
                if !ids.contains(d.as_str()) {
                    return Err(format!(
                        "task {} depends on non-existent task {d}",
                        t.id
                    ));
                }
                adjacency.entry(t.id.as_str()).or_default().push(d.as_str());
            }
        }

        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut color: HashMap<&str, Color> =
            ids.iter().map(|&id| (id, Color::White)).collect();

        fn visit<'a>(
            node: &'a str,
            adjacency: &HashMap<&'a str, Vec<&'a str>>,
            color: &mut HashMap<&'a str, Color>,
        ) -> Result<(), String> {
            color.insert(node, Color::Gray);
            for &next in adjacency.get(node).map(|v| v.as_slice()).unwrap_or(&[]) {
                match color[next] {
                    Color::Gray => {
                        return Err(format!("dependency cycle involving tasks {node} and {next}"))
                    }
                    Color::White => visit(next, adjacency, color)?,
                    Color::Black => {}
                }
            }
            color.insert(node, Color::Black);
            Ok(())
        }

        for t in tasks.iter() {
            if color[t.id.as_str()] == Color::White {
                visit(t.id.as_str(), &adjacency, &mut color)?;
            }
        }
        Ok(())
    }

    /// Checklist rendering for the system prompt.
    pub fn generate_context(&self) -> Option<String> {
        let tasks = self.tasks.lock().expect("plan lock poisoned");
        if tasks.is_empty() {
            return None;
        }
        let mut out = String::from("## Current plan\n");
        for t in tasks.iter() {
            let icon = match t.status {
                TaskStatus::Pending => "[ ]",
                TaskStatus::Active => "[>]",
                TaskStatus::Done => "[x]",
                TaskStatus::Failed => "[!]",
            };
            out.push_str(&format!("{icon} {}: {}\n", t.id, t.title));
        }
        Some(out)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
