// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! The controller: one user-facing `chat` operation that orchestrates the
//! provider, tools, safeguard, modes, plan, swarm and sub-agents.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, warn};

use ricochet_config::Config;
use ricochet_model::{
    sanitize::sanitize, translate_error, ChatRequest, Message, MessageSource, ModelProvider,
    StreamChunk, ToolCall as ModelToolCall, ToolResult,
};
use ricochet_tools::{
    builtin_registry, category_for, Notification, ToolCall, ToolCategory, ToolOutput,
    ToolRegistry, ToolSchema,
};

use crate::{
    approval::{ApprovalDecision, ApprovalItem, Approver, AutoApprover, HookAction, QcRunner,
        ToolHook},
    checkpoint::CheckpointManager,
    condense::manage_context,
    events::{ChatUpdate, EngineEvent, TaskProgress, TaskState},
    loop_detector::{LoopDetector, LOOP_REFUSAL, STUCK_LIMIT, STUCK_MESSAGE},
    memory::MemoryManager,
    modes::ModeManager,
    plan::PlanManager,
    prompts::{
        assemble_system_prompt, discover_skills, environment_section, match_skills,
        mode_reminder, project_rules, PromptParts, Skill,
    },
    safeguard::{Decision, Safeguard},
    session::{SessionManager, TodoItem},
    snapshot::{GitSnapshotter, WorkspaceSnapshotter},
};

/// Minimum interval between streamed UI updates for the growing assistant
/// message.  The first chunk always goes through.
const EMIT_INTERVAL: Duration = Duration::from_millis(50);

/// Hard cap on reasoning chunks per turn; beyond this the turn is aborted
/// (a runaway reasoning stream would otherwise never yield a reply).
const MAX_REASONING_CHUNKS: usize = 500;

/// Consecutive empty content deltas tolerated before the stream is treated
/// as idle chatter and further empties are not counted at all.
const MAX_EMPTY_DELTAS: usize = 10;

pub const PLAN_MODE_NOTE: &str =
    "Plan mode is active: explore the workspace with read-only tools and produce a \
     plan. Do not modify files or run commands; such tool calls will be rejected.";

/// Input for one `chat` call.
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    /// Existing session to continue; None creates a fresh session.
    pub session_id: Option<String>,
    pub content: String,
    pub via: Option<MessageSource>,
    pub plan_mode: bool,
}

pub struct Controller {
    pub(crate) workspace: PathBuf,
    pub(crate) state_dir: PathBuf,
    pub(crate) config: Config,
    pub(crate) provider: Arc<dyn ModelProvider>,
    pub(crate) sessions: SessionManager,
    pub(crate) tools: ToolRegistry,
    pub(crate) safeguard: Safeguard,
    pub(crate) modes: ModeManager,
    pub(crate) memory: MemoryManager,
    pub(crate) checkpoints: CheckpointManager,
    pub(crate) snapshotter: Arc<dyn WorkspaceSnapshotter>,
    pub(crate) skills: Vec<Skill>,
    pub(crate) approver: Arc<dyn Approver>,
    pub(crate) hooks: Vec<Arc<dyn ToolHook>>,
    pub(crate) qc: Option<Arc<dyn QcRunner>>,
    notifications: Mutex<mpsc::Receiver<Notification>>,
    plans: StdMutex<HashMap<String, Arc<PlanManager>>>,
    aborts: StdMutex<HashMap<String, watch::Sender<bool>>>,
    // swarm state (driven from swarm.rs)
    pub(crate) swarm_paused: std::sync::atomic::AtomicBool,
    pub(crate) swarm_stop: StdMutex<Option<watch::Sender<bool>>>,
    pub(crate) swarm_semaphore: Arc<Semaphore>,
    pub(crate) subtask_depth: AtomicUsize,
}

impl Controller {
    pub fn new(
        config: Config,
        workspace: PathBuf,
        provider: Arc<dyn ModelProvider>,
    ) -> Arc<Self> {
        let state_dir = config
            .engine
            .state_dir
            .as_ref()
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|h| h.join(".ricochet")))
            .unwrap_or_else(|| workspace.join(".ricochet-state"));

        let (notify_tx, notify_rx) = mpsc::channel(64);
        let mut tools = builtin_registry(&workspace, config.engine.command_timeout_secs, notify_tx);
        crate::meta_tools::register_meta_tools(&mut tools);

        // Workspace overlay wins over the config-file safeguard section.
        let safeguard_cfg = ricochet_config::load_permissions_file(&workspace)
            .ok()
            .flatten()
            .unwrap_or_else(|| config.safeguard.clone());
        let mut user_modes = config.modes.clone();
        if let Ok(mut from_file) = ricochet_config::load_modes_file(&workspace) {
            user_modes.append(&mut from_file);
        }

        let max_workers = config.engine.swarm_max_workers.max(1);
        Arc::new(Self {
            sessions: SessionManager::new(state_dir.clone()),
            safeguard: Safeguard::new(safeguard_cfg, &state_dir),
            modes: ModeManager::new(&user_modes),
            memory: MemoryManager::new(&state_dir),
            checkpoints: CheckpointManager::new(workspace.clone()),
            snapshotter: Arc::new(GitSnapshotter::new(workspace.clone(), &state_dir)),
            skills: discover_skills(&workspace),
            approver: Arc::new(AutoApprover),
            hooks: Vec::new(),
            qc: None,
            notifications: Mutex::new(notify_rx),
            plans: StdMutex::new(HashMap::new()),
            aborts: StdMutex::new(HashMap::new()),
            swarm_paused: std::sync::atomic::AtomicBool::new(false),
            swarm_stop: StdMutex::new(None),
            swarm_semaphore: Arc::new(Semaphore::new(max_workers)),
            subtask_depth: AtomicUsize::new(0),
            workspace,
            state_dir,
            config,
            provider,
            tools,
        })
    }

    /// Replace the approver (builder-style, before first use).
    pub fn with_approver(mut self: Arc<Self>, approver: Arc<dyn Approver>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_approver must be called before the controller is shared")
            .approver = approver;
        self
    }

    /// Install a snapshotter other than the shadow-git default.
    pub fn with_snapshotter(
        mut self: Arc<Self>,
        snapshotter: Arc<dyn WorkspaceSnapshotter>,
    ) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_snapshotter must be called before the controller is shared")
            .snapshotter = snapshotter;
        self
    }

    /// Register a pre-tool hook.
    pub fn with_hook(mut self: Arc<Self>, hook: Arc<dyn ToolHook>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_hook must be called before the controller is shared")
            .hooks
            .push(hook);
        self
    }

    /// Configure the post-edit QC runner.
    pub fn with_qc(mut self: Arc<Self>, qc: Arc<dyn QcRunner>) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("with_qc must be called before the controller is shared")
            .qc = Some(qc);
        self
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn modes(&self) -> &ModeManager {
        &self.modes
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn safeguard(&self) -> &Safeguard {
        &self.safeguard
    }

    pub fn workspace(&self) -> &PathBuf {
        &self.workspace
    }

    /// The plan manager for a session, created (and hydrated from disk) on
    /// first use.
    pub fn plan_for(&self, session_id: &str) -> Arc<PlanManager> {
        let mut plans = self.plans.lock().expect("plan map lock poisoned");
        plans
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(PlanManager::new(self.sessions.session_dir(session_id))))
            .clone()
    }

    /// Interrupt the in-flight turn of a session, if any.
    pub fn abort(&self, session_id: &str) {
        if let Some(tx) = self
            .aborts
            .lock()
            .expect("abort map lock poisoned")
            .get(session_id)
        {
            let _ = tx.send(true);
        }
    }

    /// One user-facing chat call: input processing, the turn loop, teardown.
    /// Returns the session id (useful when the session was created here).
    pub async fn chat(
        self: &Arc<Self>,
        input: ChatInput,
        tx: mpsc::Sender<EngineEvent>,
    ) -> anyhow::Result<String> {
        let session_id = match &input.session_id {
            Some(id) => self.sessions.ensure(id),
            None => self.sessions.create(),
        };

        // ── Setup: cancellation scope ────────────────────────────────────────
        let (abort_tx, abort_rx) = watch::channel(false);
        self.aborts
            .lock()
            .expect("abort map lock poisoned")
            .insert(session_id.clone(), abort_tx);

        let result = self
            .chat_inner(&session_id, input, &tx, abort_rx)
            .await;

        // ── Teardown ─────────────────────────────────────────────────────────
        self.aborts
            .lock()
            .expect("abort map lock poisoned")
            .remove(&session_id);
        result.map(|_| session_id)
    }

    async fn chat_inner(
        self: &Arc<Self>,
        session_id: &str,
        input: ChatInput,
        tx: &mpsc::Sender<EngineEvent>,
        mut abort_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        // ── Input processing ─────────────────────────────────────────────────
        let content = input.content.trim().to_string();
        if let Some(stripped) = content.strip_prefix('/') {
            if let Some(handled) = self.handle_slash_command(session_id, stripped, tx).await {
                return handled;
            }
        }
        let content = match self.resolve_workflow(&content) {
            Some(body) => body,
            None => content,
        };

        let expanded = crate::injection::process(&content, &self.workspace);
        for note in &expanded.info {
            let _ = tx
                .send(EngineEvent::Chat(ChatUpdate::info(session_id, note.clone())))
                .await;
        }
        let mut user_msg = Message::user(expanded.content);
        user_msg.source = input.via;
        self.sessions.append(session_id, user_msg);
        if input.plan_mode {
            self.sessions
                .append(session_id, Message::system(PLAN_MODE_NOTE));
        }

        // ── Turn iteration ───────────────────────────────────────────────────
        let mut loop_detector = LoopDetector::new();
        let mut stuck_count: u32 = 0;

        for _turn in 0..self.config.engine.max_turns {
            let mode = self.modes.active();
            let schemas: Vec<ToolSchema> = self
                .tools
                .schemas()
                .into_iter()
                .filter(|s| self.modes.is_tool_allowed(&mode, &s.name))
                .collect();

            // Context management on the sanitized log.
            let plan_ctx = self.plan_for(session_id).generate_context();
            let session = self
                .sessions
                .get(session_id)
                .ok_or_else(|| anyhow::anyhow!("session disappeared"))?;
            let system = assemble_system_prompt(&PromptParts {
                base_override: self.config.engine.system_prompt.as_deref(),
                mode: &mode,
                memory: self.memory.get_system_prompt_part(),
                rules: project_rules(&self.workspace),
                skills: match_skills(&self.skills, &content),
                plan: plan_ctx,
                environment: Some(environment_section(&self.workspace)),
                tracked_files: &session.file_tracker,
            });

            let entry = self
                .provider
                .catalog_entry()
                .unwrap_or_else(ricochet_model::catalog::fallback_entry);
            let budget =
                (entry.context_window.saturating_sub(entry.max_output_tokens)) as usize;

            // The sanitizer is idempotent, so writing its output back every
            // turn is safe and keeps the persisted log provider-acceptable.
            let sanitized = sanitize(session.messages.clone());
            if sanitized.len() != session.messages.len() {
                debug!(session = session_id, "sanitizer repaired the message log");
            }
            self.sessions.set_all(session_id, sanitized.clone());
            let condensed = manage_context(
                self.provider.as_ref(),
                &system,
                sanitized,
                budget,
                self.config.engine.condense_threshold,
                self.config.engine.condense_keep_recent,
            )
            .await;
            if condensed.was_condensed || condensed.was_truncated {
                self.sessions.set_all(session_id, condensed.messages.clone());
            }
            let _ = tx
                .send(EngineEvent::Chat(ChatUpdate::context(
                    session_id,
                    condensed.status(),
                )))
                .await;

            // Fold stored system messages (plan note, summaries) into the
            // request's system field: two of the three wire formats only
            // accept system text at the top level.
            let mut effective_system = system.clone();
            let mut outgoing: Vec<Message> = Vec::new();
            for m in condensed.messages {
                if m.role == ricochet_model::Role::System {
                    effective_system.push_str("\n\n");
                    effective_system.push_str(&m.content);
                } else {
                    outgoing.push(m);
                }
            }
            // Ephemeral mode reminder rides on the system text as well; it is
            // never persisted to the session.
            effective_system.push_str("\n\n");
            effective_system.push_str(&mode_reminder(&mode, input.plan_mode));

            let req = ChatRequest {
                model: String::new(),
                system: effective_system.clone(),
                messages: outgoing,
                max_tokens: entry.max_output_tokens.min(8_192),
                temperature: 0.0,
                tools: schemas
                    .iter()
                    .map(|s| ricochet_model::ToolSchema {
                        name: s.name.clone(),
                        description: s.description.clone(),
                        parameters: s.parameters.clone(),
                    })
                    .collect(),
            };

            // Input-side cost estimate for this turn.
            let input_tokens_est = effective_system.len() / 4
                + req
                    .messages
                    .iter()
                    .map(|m| m.approx_tokens())
                    .sum::<usize>();

            let streamed = self
                .stream_one_turn(session_id, req, tx, &mut abort_rx)
                .await;
            let streamed = match streamed {
                Ok(s) => s,
                Err(e) => {
                    // Provider failure aborts the turn; the translated text
                    // is appended to the visible assistant reply.
                    let text = match e.downcast_ref::<ricochet_model::ProviderError>() {
                        Some(pe) => translate_error(pe),
                        None => e.to_string(),
                    };
                    let msg = Message::assistant(text);
                    self.sessions.append(session_id, msg.clone());
                    let _ = tx
                        .send(EngineEvent::Chat(ChatUpdate::message(session_id, msg)))
                        .await;
                    return Ok(());
                }
            };

            let StreamedTurn {
                assistant,
                aborted,
                output_tokens_est,
            } = streamed;

            // Cost accounting.
            if !entry.is_free {
                let cost = input_tokens_est as f64 * entry.input_price / 1_000_000.0
                    + output_tokens_est as f64 * entry.output_price / 1_000_000.0;
                self.sessions.add_cost(session_id, cost);
            }

            self.sessions.append(session_id, assistant.clone());
            let _ = tx
                .send(EngineEvent::Chat(ChatUpdate::message(
                    session_id,
                    assistant.clone(),
                )))
                .await;
            if aborted {
                return Ok(());
            }
            if assistant.tool_calls.is_empty() {
                return Ok(()); // final assistant turn
            }

            // ── Tool phase ───────────────────────────────────────────────────
            let calls: Vec<ToolCall> = assistant
                .tool_calls
                .iter()
                .map(|c| ToolCall {
                    id: c.id.clone(),
                    name: c.name.clone(),
                    args: c.arguments.clone(),
                })
                .collect();

            // Plan-mode guardrail: side-effect categories are refused before
            // any policy or file check runs.
            let mut results: Vec<Option<ToolResult>> = vec![None; calls.len()];
            if input.plan_mode {
                for (i, call) in calls.iter().enumerate() {
                    if category_for(&call.name).has_side_effects() {
                        results[i] = Some(ToolResult::err(
                            &call.id,
                            format!("Tool '{}' is forbidden in PLAN MODE. Produce a plan or call switch_mode to implement.", call.name),
                        ));
                    }
                }
            }

            // Batch approval for whatever still needs to run.
            let mut denied: Vec<(usize, String)> = Vec::new();
            let mut pending_approval: Vec<(usize, ApprovalItem)> = Vec::new();
            for (i, call) in calls.iter().enumerate() {
                if results[i].is_some() {
                    continue;
                }
                let Some(tool) = self.tools.get(&call.name) else {
                    continue; // unknown names produce their error in dispatch
                };
                let command = call.args.get("command").and_then(|v| v.as_str());
                match self.safeguard.check_permission(tool.as_ref(), command) {
                    Decision::Allow => {}
                    Decision::Deny(reason) => denied.push((i, reason)),
                    Decision::Ask => pending_approval.push((
                        i,
                        ApprovalItem {
                            tool: call.name.clone(),
                            category: tool.category(),
                            summary: format!("{}({})", call.name, call.args),
                        },
                    )),
                }
            }
            for (i, reason) in denied {
                results[i] = Some(ToolResult::err(&calls[i].id, reason));
            }
            if !pending_approval.is_empty() {
                let items: Vec<ApprovalItem> =
                    pending_approval.iter().map(|(_, it)| it.clone()).collect();
                match self.approver.approve(session_id, &items).await {
                    ApprovalDecision::Yes => {}
                    ApprovalDecision::YesAlways => {
                        for item in &items {
                            self.safeguard.enable_auto_approve(item.category);
                        }
                    }
                    ApprovalDecision::No => {
                        for (i, _) in &pending_approval {
                            results[*i] = Some(ToolResult::err(
                                &calls[*i].id,
                                "The user declined to run this tool.",
                            ));
                        }
                    }
                }
            }

            // Serial execution in emission order.
            let mut run_qc = false;
            let mut turn_stuck = false;
            for (i, call) in calls.iter().enumerate() {
                if results[i].is_some() {
                    continue;
                }

                // Rule A: identical repeated calls are refused, not run.
                if loop_detector.record_call(&call.name, &call.args) {
                    results[i] = Some(ToolResult::err(&call.id, LOOP_REFUSAL));
                    continue;
                }

                // Pre-tool hooks.
                let mut warnings: Vec<String> = Vec::new();
                let mut blocked: Option<String> = None;
                for hook in &self.hooks {
                    match hook.before(call) {
                        HookAction::Proceed => {}
                        HookAction::Warn(w) => warnings.push(w),
                        HookAction::Block(reason) => {
                            blocked = Some(reason);
                            break;
                        }
                    }
                }
                if let Some(reason) = blocked {
                    results[i] = Some(ToolResult::err(&call.id, reason));
                    continue;
                }

                let mut output = self.run_one_tool(session_id, call, tx).await;
                if !warnings.is_empty() {
                    output.content =
                        format!("[warning] {}\n{}", warnings.join("\n[warning] "), output.content);
                }

                let category = category_for(&call.name);
                if !output.is_error {
                    stuck_count = 0;
                    if category == ToolCategory::Edit {
                        if let Some(path) = call.args.get("path").and_then(|v| v.as_str()) {
                            self.sessions.track_file(session_id, path);
                        }
                        if self.config.engine.auto_checkpoint {
                            if let Err(e) = self
                                .snapshotter
                                .commit(&format!("auto: {}", call.name))
                                .await
                            {
                                warn!("auto-checkpoint failed: {e}");
                            }
                        }
                    }
                    if category == ToolCategory::Edit || call.name == "apply_diff" {
                        run_qc = true;
                    }
                } else {
                    // Rule B + stuck accounting.
                    if loop_detector.record_error(&output.content) {
                        stuck_count += 1;
                        if stuck_count >= STUCK_LIMIT {
                            turn_stuck = true;
                        }
                    }
                }

                let _ = tx
                    .send(EngineEvent::Chat(ChatUpdate::info(
                        session_id,
                        format!(
                            "{} {} ({})",
                            if output.is_error { "✗" } else { "✓" },
                            call.name,
                            display_truncate(&output.content, 1024)
                        ),
                    )))
                    .await;

                results[i] = Some(ToolResult {
                    call_id: call.id.clone(),
                    content: output.content,
                    is_error: output.is_error,
                });

                if turn_stuck {
                    break;
                }
            }

            // Append all tool results as one user message (sanitize will
            // complete any missing ones if the loop stopped early).
            let tool_results: Vec<ToolResult> = results.into_iter().flatten().collect();
            self.sessions
                .append(session_id, Message::tool_results(tool_results));

            if turn_stuck {
                let msg = Message::assistant(STUCK_MESSAGE);
                self.sessions.append(session_id, msg.clone());
                let _ = tx
                    .send(EngineEvent::Chat(ChatUpdate::message(session_id, msg)))
                    .await;
                return Ok(());
            }

            // Post-edit QC: a failure is appended as a user message so the
            // model must address it before proceeding.
            if run_qc {
                if let Some(qc) = &self.qc {
                    if let Err(report) = qc.run().await {
                        self.sessions.append(
                            session_id,
                            Message::user(format!(
                                "Automatic quality check failed after your edits. Fix this \
                                 before continuing:\n{report}"
                            )),
                        );
                    }
                }
            }
        }

        // Turn cap reached: tell the user rather than looping forever.
        let msg = Message::assistant(format!(
            "Stopped after {} turns without reaching a final answer. The work so far \
             is preserved in the session; continue with a follow-up message.",
            self.config.engine.max_turns
        ));
        self.sessions.append(session_id, msg.clone());
        let _ = tx
            .send(EngineEvent::Chat(ChatUpdate::message(session_id, msg)))
            .await;
        Ok(())
    }

    /// Run one tool call: engine-intercepted names first, then generic
    /// dispatch with file/command policy applied by category.
    async fn run_one_tool(
        self: &Arc<Self>,
        session_id: &str,
        call: &ToolCall,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> ToolOutput {
        if let Some(output) = self.handle_intercepted(session_id, call, tx).await {
            return output;
        }

        match category_for(&call.name) {
            ToolCategory::Edit => {
                if let Some(path) = call.args.get("path").and_then(|v| v.as_str()) {
                    if let Err(reason) = self.safeguard.check_file_access(path, true) {
                        return ToolOutput::err(&call.id, reason);
                    }
                    let mode = self.modes.active();
                    if !self.modes.is_file_allowed(&mode, path) {
                        return ToolOutput::err(
                            &call.id,
                            format!(
                                "mode '{}' restricts edits; '{path}' does not match its file pattern",
                                mode.slug
                            ),
                        );
                    }
                }
            }
            ToolCategory::Execute => {
                if let Some(cmd) = call.args.get("command").and_then(|v| v.as_str()) {
                    if let Err(reason) = self.safeguard.check_command(cmd) {
                        return ToolOutput::err(&call.id, reason);
                    }
                }
            }
            _ => {}
        }

        let output = self.tools.execute(call).await;
        self.drain_notifications(session_id, tx).await;
        output
    }

    async fn drain_notifications(&self, session_id: &str, tx: &mpsc::Sender<EngineEvent>) {
        let mut rx = self.notifications.lock().await;
        while let Ok(n) = rx.try_recv() {
            let _ = tx
                .send(EngineEvent::Chat(ChatUpdate::info(
                    session_id,
                    format!("[{}] {}", n.level, n.message),
                )))
                .await;
        }
    }

    /// Bespoke handlers for the engine-intercepted meta tools.  Returns None
    /// for every other name.
    async fn handle_intercepted(
        self: &Arc<Self>,
        session_id: &str,
        call: &ToolCall,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Option<ToolOutput> {
        let out = match call.name.as_str() {
            "update_todos" => {
                let todos: Vec<TodoItem> = call
                    .args
                    .get("todos")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                let count = todos.len();
                self.sessions.set_todos(session_id, todos.clone());
                self.write_progress_mirror(&todos);
                ToolOutput::ok(&call.id, format!("todo list updated ({count} items)"))
            }
            "task_boundary" => {
                let title = call
                    .args
                    .get("title")
                    .and_then(|v| v.as_str())
                    .unwrap_or("(untitled)")
                    .to_string();
                let _ = tx
                    .send(EngineEvent::Task(TaskProgress {
                        session_id: session_id.to_string(),
                        task_id: String::new(),
                        role: "general".into(),
                        state: TaskState::Started,
                        message: title.clone(),
                        color: crate::events::role_color("general"),
                    }))
                    .await;
                ToolOutput::ok(&call.id, format!("task boundary: {title}"))
            }
            "switch_mode" => {
                let Some(slug) = call.args.get("mode").and_then(|v| v.as_str()) else {
                    return Some(ToolOutput::err(&call.id, "missing 'mode'"));
                };
                let handoff = call
                    .args
                    .get("handoff")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if handoff {
                    if let Err(e) = self.write_handoff_spec(session_id).await {
                        warn!("handoff spec not written: {e}");
                    }
                }
                match self.modes.switch(slug) {
                    Ok(mode) => ToolOutput::ok(
                        &call.id,
                        format!(
                            "switched to {} mode{}",
                            mode.slug,
                            if handoff { " (handoff written to .ricochet/SPEC.md)" } else { "" }
                        ),
                    ),
                    Err(e) => ToolOutput::err(&call.id, e),
                }
            }
            "restore_checkpoint" => {
                let Some(id) = call.args.get("id").and_then(|v| v.as_str()) else {
                    return Some(ToolOutput::err(&call.id, "missing 'id'"));
                };
                match self.checkpoints.restore(id) {
                    Ok(cp) => ToolOutput::ok(
                        &call.id,
                        format!("restored checkpoint '{}' ({} files)", cp.label, cp.files.len()),
                    ),
                    Err(e) => ToolOutput::err(&call.id, e.to_string()),
                }
            }
            "update_plan" => self.handle_update_plan(session_id, call),
            "start_swarm" => {
                let summary = self.start_swarm(session_id, tx.clone()).await;
                ToolOutput::ok(&call.id, summary)
            }
            "start_task" => {
                let Some(id) = call.args.get("id").and_then(|v| v.as_str()) else {
                    return Some(ToolOutput::err(&call.id, "missing 'id'"));
                };
                let plan = self.plan_for(session_id);
                match plan.get_task(id) {
                    Some(task) => {
                        plan.mark_active(id);
                        let _ = tx
                            .send(EngineEvent::Task(TaskProgress {
                                session_id: session_id.to_string(),
                                task_id: id.to_string(),
                                role: "general".into(),
                                state: TaskState::Started,
                                message: task.title.clone(),
                                color: crate::events::role_color("general"),
                            }))
                            .await;
                        ToolOutput::ok(&call.id, format!("task {id} started: {}", task.title))
                    }
                    None => ToolOutput::err(&call.id, format!("no task with id {id}")),
                }
            }
            "start_subtask" => {
                let Some(goal) = call.args.get("goal").and_then(|v| v.as_str()) else {
                    return Some(ToolOutput::err(&call.id, "missing 'goal'"));
                };
                let context = call
                    .args
                    .get("context")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let role = call
                    .args
                    .get("role")
                    .and_then(|v| v.as_str())
                    .unwrap_or("general");
                match self
                    .run_subtask(session_id, goal, context, role, tx.clone())
                    .await
                {
                    Ok(result_json) => ToolOutput::ok(&call.id, result_json),
                    Err(e) => ToolOutput::err(&call.id, format!("subtask error: {e}")),
                }
            }
            _ => return None,
        };
        Some(out)
    }

    fn handle_update_plan(&self, session_id: &str, call: &ToolCall) -> ToolOutput {
        let plan = self.plan_for(session_id);
        let action = call
            .args
            .get("action")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let id_arg = call.args.get("id").and_then(|v| v.as_str());
        match action {
            "add" => {
                let Some(title) = call.args.get("title").and_then(|v| v.as_str()) else {
                    return ToolOutput::err(&call.id, "add requires 'title'");
                };
                let context = call
                    .args
                    .get("context")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let priority = match call.args.get("priority").and_then(|v| v.as_str()) {
                    Some("critical") => crate::plan::TaskPriority::Critical,
                    Some("high") => crate::plan::TaskPriority::High,
                    _ => crate::plan::TaskPriority::Normal,
                };
                let id = plan.add_task(title, context, priority);
                ToolOutput::ok(&call.id, format!("added task {id}: {title}"))
            }
            "remove" => match id_arg {
                Some(id) if plan.remove_task(id) => {
                    ToolOutput::ok(&call.id, format!("removed task {id}"))
                }
                Some(id) => ToolOutput::err(&call.id, format!("no task with id {id}")),
                None => ToolOutput::err(&call.id, "remove requires 'id'"),
            },
            "complete" => match id_arg {
                Some(id) if plan.mark_complete(id) => {
                    ToolOutput::ok(&call.id, format!("task {id} completed"))
                }
                Some(id) => ToolOutput::err(&call.id, format!("no task with id {id}")),
                None => ToolOutput::err(&call.id, "complete requires 'id'"),
            },
            "fail" => match id_arg {
                Some(id) if plan.mark_failed(id) => {
                    ToolOutput::ok(&call.id, format!("task {id} marked failed"))
                }
                Some(id) => ToolOutput::err(&call.id, format!("no task with id {id}")),
                None => ToolOutput::err(&call.id, "fail requires 'id'"),
            },
            "deps" => {
                let Some(id) = id_arg else {
                    return ToolOutput::err(&call.id, "deps requires 'id'");
                };
                let deps: Vec<String> = call
                    .args
                    .get("depends_on")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                if !plan.set_dependencies(id, deps) {
                    return ToolOutput::err(&call.id, format!("no task with id {id}"));
                }
                match plan.validate() {
                    Ok(()) => ToolOutput::ok(&call.id, format!("dependencies set for task {id}")),
                    Err(e) => {
                        // Roll back rather than leaving an invalid graph.
                        plan.set_dependencies(id, Vec::new());
                        ToolOutput::err(&call.id, format!("rejected: {e}"))
                    }
                }
            }
            "validate" => match plan.validate() {
                Ok(()) => ToolOutput::ok(&call.id, "plan is valid"),
                Err(e) => ToolOutput::err(&call.id, e),
            },
            other => ToolOutput::err(&call.id, format!("unknown plan action '{other}'")),
        }
    }

    /// Best-effort human-readable mirror of the todo list.
    fn write_progress_mirror(&self, todos: &[TodoItem]) {
        let mut out = String::from("# Task progress\n\n");
        for t in todos {
            let icon = match t.status.as_str() {
                "completed" => "[x]",
                "in_progress" => "[>]",
                "cancelled" => "[-]",
                _ => "[ ]",
            };
            out.push_str(&format!("- {icon} {}\n", t.content));
        }
        let _ = std::fs::write(self.workspace.join("task_progress_current.md"), out);
    }

    /// Handoff: condense session history into `.ricochet/SPEC.md` so the
    /// next mode starts from distilled context.
    async fn write_handoff_spec(&self, session_id: &str) -> anyhow::Result<()> {
        let session = self
            .sessions
            .get(session_id)
            .ok_or_else(|| anyhow::anyhow!("unknown session"))?;
        let history: String = session
            .messages
            .iter()
            .filter(|m| m.role != ricochet_model::Role::System)
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let spec = match self
            .provider
            .summarize(
                &format!(
                    "Condense this working session into a handoff specification: goals, \
                     decisions made, current state, and what remains. Write it as a \
                     standalone Markdown document.\n\n---\n\n{history}"
                ),
                1_024,
            )
            .await
        {
            Ok(s) if !s.is_empty() => s,
            _ => format!("# Handoff\n\n(raw history tail)\n\n{history}"),
        };
        let dir = self.workspace.join(".ricochet");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("SPEC.md"), spec)?;
        Ok(())
    }

    /// Inline slash commands.  Returns Some(result) when the input was fully
    /// handled and the turn loop must not run.
    async fn handle_slash_command(
        &self,
        session_id: &str,
        command: &str,
        tx: &mpsc::Sender<EngineEvent>,
    ) -> Option<anyhow::Result<()>> {
        let name = command.split_whitespace().next().unwrap_or("");
        if name == "model" {
            let _ = tx
                .send(EngineEvent::Chat(ChatUpdate::info(
                    session_id,
                    format!(
                        "provider: {} / model: {}",
                        self.provider.name(),
                        self.provider.model_name()
                    ),
                )))
                .await;
            return Some(Ok(()));
        }
        // Workflow names are resolved later in chat_inner; anything that is
        // neither /model nor a workflow file is reported and swallowed.
        if self.resolve_workflow(&format!("/{name}")).is_none() {
            let _ = tx
                .send(EngineEvent::Chat(ChatUpdate::info(
                    session_id,
                    format!("unknown command: /{name}"),
                )))
                .await;
            return Some(Ok(()));
        }
        None
    }

    /// `/name` → the body of `.ricochet/workflows/name.md`, when present.
    fn resolve_workflow(&self, content: &str) -> Option<String> {
        let name = content.strip_prefix('/')?;
        let name = name.split_whitespace().next()?;
        if name.is_empty() || name.contains('/') || name.contains("..") {
            return None;
        }
        let path = self
            .workspace
            .join(".ricochet")
            .join("workflows")
            .join(format!("{name}.md"));
        std::fs::read_to_string(path).ok()
    }

    /// Stream one provider turn, assembling the assistant message.
    async fn stream_one_turn(
        &self,
        session_id: &str,
        req: ChatRequest,
        tx: &mpsc::Sender<EngineEvent>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> anyhow::Result<StreamedTurn> {
        let mut stream = self
            .provider
            .chat_stream(req)
            .await
            .map_err(anyhow::Error::from)?;

        let mut assistant = Message::assistant("");
        let mut reasoning = String::new();
        let mut output_tokens_est = 0usize;
        let mut reasoning_chunks = 0usize;
        let mut empty_deltas = 0usize;
        let mut aborted = false;

        let mut last_emit = Instant::now();
        let mut last_emitted_len = 0usize;

        loop {
            let chunk = tokio::select! {
                biased;
                changed = abort_rx.changed() => {
                    if changed.is_ok() && *abort_rx.borrow() {
                        aborted = true;
                        break;
                    }
                    continue;
                }
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            match chunk.map_err(anyhow::Error::from)? {
                StreamChunk::ContentDelta { text, reasoning: r } => {
                    if text.is_empty() && r.is_none() {
                        empty_deltas += 1;
                        // Silence, not an error; just don't count forever.
                        if empty_deltas >= MAX_EMPTY_DELTAS {
                            empty_deltas = MAX_EMPTY_DELTAS;
                        }
                        continue;
                    }
                    empty_deltas = 0;
                    let mut thinking_boundary = false;
                    if let Some(r) = r {
                        reasoning_chunks += 1;
                        if reasoning_chunks > MAX_REASONING_CHUNKS {
                            warn!(session = session_id, "reasoning chunk cap hit; aborting turn");
                            aborted = true;
                            break;
                        }
                        if reasoning.is_empty() {
                            thinking_boundary = true;
                        }
                        output_tokens_est += r.len() / 4;
                        reasoning.push_str(&r);
                    }
                    if !text.is_empty() {
                        if assistant.content.is_empty() && !reasoning.is_empty() {
                            thinking_boundary = true; // reasoning → answer transition
                        }
                        output_tokens_est += text.len() / 4;
                        assistant.content.push_str(&text);
                    }

                    // Throttled, deduplicated streaming updates.
                    let grown = assistant.content.len() + reasoning.len() > last_emitted_len;
                    let due = last_emitted_len == 0
                        || thinking_boundary
                        || last_emit.elapsed() >= EMIT_INTERVAL;
                    if grown && due {
                        last_emit = Instant::now();
                        last_emitted_len = assistant.content.len() + reasoning.len();
                        let mut snapshot = assistant.clone();
                        if !reasoning.is_empty() {
                            snapshot.reasoning = Some(reasoning.clone());
                        }
                        let _ = tx
                            .send(EngineEvent::Chat(ChatUpdate::message(session_id, snapshot)))
                            .await;
                    }
                }
                StreamChunk::ToolUse {
                    id,
                    name,
                    arguments,
                } => {
                    assistant
                        .tool_calls
                        .push(ModelToolCall::new(id, name, arguments));
                }
                StreamChunk::MessageDelta { .. } => {}
                StreamChunk::MessageStop => break,
            }
        }

        // Some serving layers emit thinking as literal <think> text.  A reply
        // that is nothing but one think block carries no answer; reclassify.
        if reasoning.is_empty() {
            if let Some(inner) = extract_inline_think_block(&assistant.content) {
                reasoning = inner;
                assistant.content.clear();
            }
        }
        if !reasoning.is_empty() {
            assistant.reasoning = Some(reasoning);
        }
        Ok(StreamedTurn {
            assistant,
            aborted,
            output_tokens_est,
        })
    }
}

struct StreamedTurn {
    assistant: Message,
    aborted: bool,
    output_tokens_est: usize,
}

/// Truncate tool output for display; the model and the session keep the
/// full text.  The cut is clamped to a char boundary — tool output is often
/// non-ASCII and an unchecked byte slice would panic mid-turn.
fn display_truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let cut = crate::condense::floor_char_boundary(s, max);
        format!("{}…[{} more bytes]", &s[..cut], s.len() - cut)
    }
}

/// Detect a `<think>...</think>` block occupying the entire text.  Returns
/// the inner text when the whole reply is thinking (possibly unclosed).
fn extract_inline_think_block(text: &str) -> Option<String> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("<think>")?;
    let inner = inner.strip_suffix("</think>").unwrap_or(inner);
    if inner.contains("</think>") {
        return None;
    }
    Some(inner.trim().to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_truncate_passes_short_strings() {
        assert_eq!(display_truncate("short", 10), "short");
    }

    #[test]
    fn display_truncate_reports_omitted_bytes() {
        let s = "x".repeat(100);
        let out = display_truncate(&s, 10);
        assert!(out.starts_with("xxxxxxxxxx"));
        assert!(out.contains("90 more bytes"));
    }

    #[test]
    fn display_truncate_respects_char_boundaries() {
        // Cut point lands inside the 2-byte 'é'; the slice backs off one byte.
        let s = "é".repeat(50); // 100 bytes
        let out = display_truncate(&s, 11);
        assert!(out.starts_with(&"é".repeat(5)));
        assert!(out.contains("90 more bytes"));
    }

    #[test]
    fn inline_think_block_is_extracted() {
        assert_eq!(
            extract_inline_think_block("<think>pondering</think>").as_deref(),
            Some("pondering")
        );
        // unclosed (truncated stream) still counts
        assert_eq!(
            extract_inline_think_block("<think>cut off").as_deref(),
            Some("cut off")
        );
    }

    #[test]
    fn text_after_think_block_is_not_reclassified() {
        assert!(extract_inline_think_block("<think>a</think>real answer").is_none());
        assert!(extract_inline_think_block("no think at all").is_none());
    }
}
