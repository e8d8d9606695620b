// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use ricochet_model::Message;

/// A structured todo item managed by the update_todos tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    /// One of: "pending", "in_progress", "completed", "cancelled"
    pub status: String,
}

/// One conversation session: the message log plus per-session bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub messages: Vec<Message>,
    /// Accumulated cost in USD across all turns of this session.
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Workspace-relative paths touched this session.
    pub file_tracker: BTreeSet<String>,
    pub todos: Vec<TodoItem>,
}

impl Session {
    fn new(id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            messages: Vec::new(),
            cost: 0.0,
            created_at: now,
            updated_at: now,
            file_tracker: BTreeSet::new(),
            todos: Vec::new(),
        }
    }

    /// Approximate token count of the whole message log.
    pub fn approx_tokens(&self) -> usize {
        self.messages.iter().map(|m| m.approx_tokens()).sum()
    }
}

/// Thread-safe store of all sessions, persisted one JSON file per session
/// under `<state_dir>/sessions/<sid>/session.json`.  All mutation goes
/// through [`SessionManager::with_session`], which holds the write lock and
/// saves afterwards.
pub struct SessionManager {
    state_dir: PathBuf,
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn session_file(&self, id: &str) -> PathBuf {
        self.state_dir.join("sessions").join(id).join("session.json")
    }

    pub fn session_dir(&self, id: &str) -> PathBuf {
        self.state_dir.join("sessions").join(id)
    }

    /// Create a fresh session and return its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let session = Session::new(id.clone());
        self.sessions
            .write()
            .expect("session lock poisoned")
            .insert(id.clone(), session);
        self.save(&id);
        id
    }

    /// Fetch a session if it exists in memory, hydrating from disk otherwise.
    /// Returns a copy; mutation goes through [`with_session`].
    pub fn get(&self, id: &str) -> Option<Session> {
        if let Some(s) = self.sessions.read().expect("session lock poisoned").get(id) {
            return Some(s.clone());
        }
        let path = self.session_file(id);
        let text = std::fs::read_to_string(path).ok()?;
        let session: Session = serde_json::from_str(&text).ok()?;
        self.sessions
            .write()
            .expect("session lock poisoned")
            .insert(id.to_string(), session.clone());
        Some(session)
    }

    /// Ensure a session with this id exists (creating an empty one when it
    /// does not), then return its id.  Used when a caller supplies its own
    /// session identifier.
    pub fn ensure(&self, id: &str) -> String {
        if self.get(id).is_none() {
            let session = Session::new(id.to_string());
            self.sessions
                .write()
                .expect("session lock poisoned")
                .insert(id.to_string(), session);
            self.save(id);
        }
        id.to_string()
    }

    /// Hydrate a session from a supplied message list (resume).
    pub fn resume(&self, id: &str, messages: Vec<Message>) {
        self.ensure(id);
        self.with_session(id, |s| {
            s.messages = messages;
        });
    }

    /// Run `f` with exclusive access to the session, then persist it.
    /// Creates the session if missing so callers never lose writes.
    pub fn with_session<R>(&self, id: &str, f: impl FnOnce(&mut Session) -> R) -> R {
        let result = {
            let mut map = self.sessions.write().expect("session lock poisoned");
            let session = map
                .entry(id.to_string())
                .or_insert_with(|| Session::new(id.to_string()));
            let r = f(session);
            session.updated_at = Utc::now();
            r
        };
        self.save(id);
        result
    }

    pub fn append(&self, id: &str, message: Message) {
        self.with_session(id, |s| s.messages.push(message));
    }

    pub fn set_all(&self, id: &str, messages: Vec<Message>) {
        self.with_session(id, |s| s.messages = messages);
    }

    /// Replace the message at `index`; out-of-range indices are ignored.
    pub fn update(&self, id: &str, index: usize, message: Message) {
        self.with_session(id, |s| {
            if index < s.messages.len() {
                s.messages[index] = message;
            }
        });
    }

    pub fn count(&self, id: &str) -> usize {
        self.get(id).map(|s| s.messages.len()).unwrap_or(0)
    }

    pub fn updated_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.get(id).map(|s| s.updated_at)
    }

    pub fn add_cost(&self, id: &str, cost: f64) {
        if cost > 0.0 {
            self.with_session(id, |s| s.cost += cost);
        }
    }

    pub fn track_file(&self, id: &str, path: impl Into<String>) {
        self.with_session(id, |s| {
            s.file_tracker.insert(path.into());
        });
    }

    pub fn set_todos(&self, id: &str, todos: Vec<TodoItem>) {
        self.with_session(id, |s| s.todos = todos);
    }

    fn save(&self, id: &str) {
        let Some(session) = self
            .sessions
            .read()
            .expect("session lock poisoned")
            .get(id)
            .cloned()
        else {
            return;
        };
        let path = self.session_file(id);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                warn!(session = id, "cannot create session dir: {e}");
                return;
            }
        }
        match serde_json::to_string_pretty(&session) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&path, json) {
                    warn!(session = id, "cannot persist session: {e}");
                }
            }
            Err(e) => warn!(session = id, "cannot serialize session: {e}"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
