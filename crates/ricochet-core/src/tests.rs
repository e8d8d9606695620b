// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Controller-level tests against the scripted mock provider.

use std::sync::Arc;

use serde_json::json;
use tokio::sync::mpsc;

use ricochet_config::Config;
use ricochet_model::{Role, ScriptedMockProvider, StreamChunk};

use crate::controller::{ChatInput, Controller};
use crate::events::EngineEvent;
use crate::plan::TaskPriority;
use crate::snapshot::NullSnapshotter;

struct Fixture {
    _workspace: tempfile::TempDir,
    _state: tempfile::TempDir,
    controller: Arc<Controller>,
    provider: Arc<ScriptedMockProvider>,
}

fn fixture(scripts: Vec<Vec<StreamChunk>>) -> Fixture {
    let workspace = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.engine.state_dir = Some(state.path().to_string_lossy().into_owned());
    config.engine.swarm_tick_secs = 1;
    let provider = Arc::new(ScriptedMockProvider::new(scripts));
    let controller = Controller::new(
        config,
        workspace.path().to_path_buf(),
        provider.clone() as Arc<dyn ricochet_model::ModelProvider>,
    )
    // Shadow-git commits are irrelevant noise for these tests.
    .with_snapshotter(Arc::new(NullSnapshotter));
    Fixture {
        _workspace: workspace,
        _state: state,
        controller,
        provider,
    }
}

async fn drive(f: &Fixture, input: ChatInput) -> (String, Vec<EngineEvent>) {
    let (tx, mut rx) = mpsc::channel(1024);
    let sid = f.controller.chat(input, tx).await.unwrap();
    let mut events = Vec::new();
    while let Ok(e) = rx.try_recv() {
        events.push(e);
    }
    (sid, events)
}

// ── Simple echo ──────────────────────────────────────────────────────────

#[tokio::test]
async fn simple_echo_turn() {
    let f = fixture(vec![vec![StreamChunk::text("Hello! How can I help?")]]);
    let (sid, events) = drive(
        &f,
        ChatInput {
            content: "Hi".into(),
            ..Default::default()
        },
    )
    .await;

    let session = f.controller.sessions().get(&sid).unwrap();
    assert_eq!(session.messages.len(), 2, "user + assistant");
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[1].role, Role::Assistant);
    assert_eq!(session.messages[1].content, "Hello! How can I help?");
    assert!(session.messages[1].tool_calls.is_empty());

    let chat_updates = events
        .iter()
        .filter(|e| matches!(e, EngineEvent::Chat(u) if u.message.is_some()))
        .count();
    assert!(chat_updates >= 1);

    // Context status carried a token estimate.
    let ctx = events.iter().find_map(|e| match e {
        EngineEvent::Chat(u) => u.context.clone(),
        _ => None,
    });
    assert!(ctx.unwrap().tokens_used > 0);
}

// ── Read a file ──────────────────────────────────────────────────────────

#[tokio::test]
async fn tool_call_round_trip() {
    let f = fixture(vec![
        vec![
            StreamChunk::text("Let me open it."),
            StreamChunk::ToolUse {
                id: "c1".into(),
                name: "read_file".into(),
                arguments: json!({"path": "main.go"}),
            },
        ],
        vec![StreamChunk::text("That file prints hello.")],
    ]);
    std::fs::write(
        f.controller.workspace().join("main.go"),
        "package main\nfunc main() { println(\"hello\") }\n",
    )
    .unwrap();

    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "Show me main.go".into(),
            ..Default::default()
        },
    )
    .await;

    let session = f.controller.sessions().get(&sid).unwrap();
    assert_eq!(
        session.messages.len(),
        4,
        "user, assistant+tool, user+result, assistant"
    );
    assert_eq!(session.messages[1].tool_calls[0].name, "read_file");
    let results = &session.messages[2].tool_results;
    assert_eq!(results.len(), 1);
    assert!(!results[0].is_error);
    assert!(results[0].content.contains("package main"));
    assert_eq!(session.messages[3].content, "That file prints hello.");
}

// ── Plan-mode guardrail ──────────────────────────────────────────────────

#[tokio::test]
async fn plan_mode_blocks_write_tools() {
    let f = fixture(vec![
        vec![StreamChunk::ToolUse {
            id: "w1".into(),
            name: "write_file".into(),
            arguments: json!({"path": "evil.txt", "content": "nope"}),
        }],
        vec![StreamChunk::text("Understood, planning only.")],
    ]);

    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "create evil.txt".into(),
            plan_mode: true,
            ..Default::default()
        },
    )
    .await;

    // No side effect happened.
    assert!(!f.controller.workspace().join("evil.txt").exists());

    let session = f.controller.sessions().get(&sid).unwrap();
    let result = session
        .messages
        .iter()
        .flat_map(|m| m.tool_results.iter())
        .find(|r| r.call_id == "w1")
        .expect("synthetic result present");
    assert!(result.is_error);
    assert!(result.content.contains("PLAN MODE"), "{}", result.content);
}

#[tokio::test]
async fn plan_mode_still_allows_reads() {
    let f = fixture(vec![
        vec![StreamChunk::ToolUse {
            id: "r1".into(),
            name: "list_dir".into(),
            arguments: json!({}),
        }],
        vec![StreamChunk::text("done exploring")],
    ]);
    std::fs::write(f.controller.workspace().join("visible.txt"), "x").unwrap();

    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "look around".into(),
            plan_mode: true,
            ..Default::default()
        },
    )
    .await;

    let session = f.controller.sessions().get(&sid).unwrap();
    let result = session
        .messages
        .iter()
        .flat_map(|m| m.tool_results.iter())
        .find(|r| r.call_id == "r1")
        .unwrap();
    assert!(!result.is_error);
    assert!(result.content.contains("visible.txt"));
}

// ── Loop detection ───────────────────────────────────────────────────────

#[tokio::test]
async fn third_identical_call_is_refused() {
    let grep = |id: &str| {
        vec![StreamChunk::ToolUse {
            id: id.into(),
            name: "grep_search".into(),
            arguments: json!({"query": "foo"}),
        }]
    };
    let f = fixture(vec![
        grep("g1"),
        grep("g2"),
        grep("g3"),
        vec![StreamChunk::ToolUse {
            id: "d1".into(),
            name: "list_dir".into(),
            arguments: json!({}),
        }],
        vec![StreamChunk::text("moving on")],
    ]);

    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "search for foo".into(),
            ..Default::default()
        },
    )
    .await;

    let session = f.controller.sessions().get(&sid).unwrap();
    let results: Vec<_> = session
        .messages
        .iter()
        .flat_map(|m| m.tool_results.iter())
        .collect();
    let by_id = |id: &str| results.iter().find(|r| r.call_id == id).unwrap();
    assert!(!by_id("g1").is_error, "first call runs");
    assert!(!by_id("g2").is_error, "second call runs");
    assert!(by_id("g3").is_error, "third identical call refused");
    assert!(by_id("g3").content.contains("loop detected"));
    assert!(!by_id("d1").is_error, "different call afterwards proceeds");
}

// ── Slash commands & workflows ───────────────────────────────────────────────

#[tokio::test]
async fn slash_model_is_handled_inline() {
    let f = fixture(vec![vec![StreamChunk::text("should not run")]]);
    let (sid, events) = drive(
        &f,
        ChatInput {
            content: "/model".into(),
            ..Default::default()
        },
    )
    .await;

    assert_eq!(f.controller.sessions().count(&sid), 0, "no turn ran");
    let info = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::Chat(u) => u.info.clone(),
            _ => None,
        })
        .unwrap();
    assert!(info.contains("mock"));
    assert_eq!(f.provider.remaining(), 1, "provider untouched");
}

#[tokio::test]
async fn unknown_slash_command_is_swallowed() {
    let f = fixture(vec![vec![StreamChunk::text("should not run")]]);
    let (sid, events) = drive(
        &f,
        ChatInput {
            content: "/definitely-not-a-workflow".into(),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(f.controller.sessions().count(&sid), 0);
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Chat(u) if u.info.as_deref().map(|i| i.contains("unknown command")).unwrap_or(false)
    )));
}

#[tokio::test]
async fn workflow_file_body_is_submitted() {
    let f = fixture(vec![vec![StreamChunk::text("ran the workflow")]]);
    let dir = f.controller.workspace().join(".ricochet/workflows");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("standup.md"), "Summarise yesterday's commits").unwrap();

    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "/standup".into(),
            ..Default::default()
        },
    )
    .await;

    let session = f.controller.sessions().get(&sid).unwrap();
    assert!(session.messages[0]
        .content
        .contains("Summarise yesterday's commits"));
}

// ── Injection ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn file_injection_expands_into_user_message() {
    let f = fixture(vec![vec![StreamChunk::text("saw it")]]);
    std::fs::write(f.controller.workspace().join("ctx.txt"), "IMPORTANT FACT").unwrap();

    let (sid, events) = drive(
        &f,
        ChatInput {
            content: "use @ctx.txt".into(),
            ..Default::default()
        },
    )
    .await;

    let session = f.controller.sessions().get(&sid).unwrap();
    assert!(session.messages[0].content.contains("IMPORTANT FACT"));
    assert!(events.iter().any(|e| matches!(
        e,
        EngineEvent::Chat(u) if u.info.as_deref().map(|i| i.contains("inlined @ctx.txt")).unwrap_or(false)
    )));
}

// ── File tracking & edit policy ──────────────────────────────────────────────

#[tokio::test]
async fn successful_edit_is_tracked() {
    let f = fixture(vec![
        vec![StreamChunk::ToolUse {
            id: "w1".into(),
            name: "write_file".into(),
            arguments: json!({"path": "out.txt", "content": "data"}),
        }],
        vec![StreamChunk::text("written")],
    ]);
    // edits are not auto-approved by default; the AutoApprover answers Yes.
    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "write out.txt".into(),
            ..Default::default()
        },
    )
    .await;

    assert!(f.controller.workspace().join("out.txt").exists());
    let session = f.controller.sessions().get(&sid).unwrap();
    assert!(session.file_tracker.contains("out.txt"));
}

#[tokio::test]
async fn denied_file_pattern_blocks_edit() {
    let f = fixture(vec![
        vec![StreamChunk::ToolUse {
            id: "w1".into(),
            name: "write_file".into(),
            arguments: json!({"path": ".env", "content": "SECRET=1"}),
        }],
        vec![StreamChunk::text("ok")],
    ]);
    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "write the env file".into(),
            ..Default::default()
        },
    )
    .await;

    assert!(!f.controller.workspace().join(".env").exists());
    let session = f.controller.sessions().get(&sid).unwrap();
    let result = session
        .messages
        .iter()
        .flat_map(|m| m.tool_results.iter())
        .find(|r| r.call_id == "w1")
        .unwrap();
    assert!(result.is_error);
    assert!(result.content.contains("denied"));
}

// ── Sub-agent runner ─────────────────────────────────────────────────────────

#[tokio::test]
async fn subtask_completes_with_summary() {
    let f = fixture(vec![vec![StreamChunk::text(
        "TASK_COMPLETE: counted 3 modules",
    )]]);
    let (tx, mut rx) = mpsc::channel(256);
    let parent = f.controller.sessions().create();
    let result = f
        .controller
        .run_subtask(&parent, "count the modules", "small repo", "researcher", tx)
        .await
        .unwrap();

    let v: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert_eq!(v["status"], "success");
    assert_eq!(v["summary"], "counted 3 modules");

    // Progress events are attributed to the parent session.
    let mut saw_task_event = false;
    while let Ok(e) = rx.try_recv() {
        assert_eq!(e.session_id(), parent);
        if matches!(e, EngineEvent::Task(_)) {
            saw_task_event = true;
        }
    }
    assert!(saw_task_event);
}

#[tokio::test]
async fn subtask_failure_carries_recovery_hint() {
    let f = fixture(vec![vec![StreamChunk::text(
        "TASK_FAILED: the build is broken",
    )]]);
    let (tx, _rx) = mpsc::channel(256);
    let parent = f.controller.sessions().create();
    let result = f
        .controller
        .run_subtask(&parent, "run the tests", "", "qa", tx)
        .await
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert_eq!(v["status"], "failed");
    assert!(v["error"].as_str().unwrap().contains("build is broken"));
    assert!(v["recovery_hint"].as_str().is_some());
}

#[tokio::test]
async fn subtask_without_marker_times_out() {
    // 15 autopilot turns, none of which ever says TASK_COMPLETE.
    let scripts = vec![vec![StreamChunk::text("still thinking about it")]; 20];
    let f = fixture(scripts);
    let (tx, _rx) = mpsc::channel(1024);
    let parent = f.controller.sessions().create();
    let result = f
        .controller
        .run_subtask(&parent, "impossible goal", "", "general", tx)
        .await
        .unwrap();
    let v: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert_eq!(v["status"], "failed");
    assert!(v["error"].as_str().unwrap().contains("timed out"));
}

// ── Swarm happy path ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn swarm_executes_dependent_tasks_in_order() {
    // Every sub-agent turn completes immediately.
    let scripts = vec![vec![StreamChunk::text("TASK_COMPLETE: task handled")]; 20];
    let f = fixture(scripts);
    let session = f.controller.sessions().create();

    let plan = f.controller.plan_for(&session);
    plan.add_task("T1", "", TaskPriority::Normal);
    plan.add_task("T2", "", TaskPriority::Normal);
    plan.set_dependencies("2", vec!["1".into()]);

    let (tx, _rx) = mpsc::channel(4096);
    let status = f.controller.start_swarm(&session, tx).await;
    assert_eq!(status, "swarm started");
    assert!(f.controller.swarm_running());

    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(30);
    loop {
        let tasks = plan.tasks();
        if tasks
            .iter()
            .all(|t| t.status == crate::plan::TaskStatus::Done)
        {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "swarm did not finish: {tasks:?}"
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    let tasks = plan.tasks();
    assert_eq!(tasks[0].output.as_deref(), Some("task handled"));
    assert_eq!(tasks[1].output.as_deref(), Some("task handled"));
    f.controller.stop_swarm();
    assert!(!f.controller.swarm_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn swarm_seeds_empty_plan() {
    let scripts = vec![vec![StreamChunk::text("TASK_COMPLETE: ok")]; 60];
    let f = fixture(scripts);
    let session = f.controller.sessions().create();
    let (tx, _rx) = mpsc::channel(4096);
    f.controller.start_swarm(&session, tx).await;
    let plan = f.controller.plan_for(&session);
    assert_eq!(plan.tasks().len(), 3, "reconnaissance seed");
    f.controller.stop_swarm();
}

// ── Context condensation ─────────────────────────────────────────────────

#[tokio::test]
async fn long_history_is_condensed_before_the_turn() {
    // Script 1 answers the summarization call, script 2 the real turn.
    let f = fixture(vec![
        vec![StreamChunk::text("summary of the long past")],
        vec![StreamChunk::text("final answer")],
    ]);
    let session = f.controller.sessions().create();

    // Push enough history to clear 70% of the ~124k budget.
    let filler = "x".repeat(2_000);
    for i in 0..200 {
        f.controller
            .sessions()
            .append(&session, ricochet_model::Message::user(format!("q{i} {filler}")));
        f.controller
            .sessions()
            .append(&session, ricochet_model::Message::assistant(format!("a{i} {filler}")));
    }

    let (_, events) = drive(
        &f,
        ChatInput {
            session_id: Some(session.clone()),
            content: "and now?".into(),
            ..Default::default()
        },
    )
    .await;

    let ctx = events
        .iter()
        .find_map(|e| match e {
            EngineEvent::Chat(u) => u.context.clone(),
            _ => None,
        })
        .unwrap();
    assert!(ctx.was_condensed, "condensation must have run");

    let messages = f.controller.sessions().get(&session).unwrap().messages;
    let summaries = messages
        .iter()
        .filter(|m| m.role == Role::System && m.content.contains("[Previous context summary]"))
        .count();
    assert_eq!(summaries, 1, "exactly one summary system message");
}

// ── Abort ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn abort_before_chat_is_a_no_op() {
    let f = fixture(vec![vec![StreamChunk::text("fine")]]);
    f.controller.abort("nonexistent-session");
    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "hello".into(),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(f.controller.sessions().count(&sid), 2);
}

// ── Cost accounting ──────────────────────────────────────────────────────────

#[tokio::test]
async fn free_models_accumulate_no_cost() {
    let f = fixture(vec![vec![StreamChunk::text("gratis")]]);
    let (sid, _) = drive(
        &f,
        ChatInput {
            content: "hi".into(),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(f.controller.sessions().get(&sid).unwrap().cost, 0.0);
}
