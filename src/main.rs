// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use ricochet_core::{ChatInput, Controller, EngineEvent, PlanManager};
use ricochet_model::MessageSource;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // The reqwest/rustls stack needs a process-wide crypto provider.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let workspace = match &cli.workspace {
        Some(w) => w.clone(),
        None => std::env::current_dir().context("cannot determine current directory")?,
    };
    let mut config = ricochet_config::load(cli.config.as_deref())?;
    if let Some(zone) = cli.trust_zone {
        config.safeguard.trust_zone = zone;
    }

    if let Some(cmd) = &cli.command {
        return run_subcommand(cmd, config, workspace);
    }

    let provider: Arc<dyn ricochet_model::ModelProvider> =
        Arc::from(ricochet_model::from_config(&config.model)?);
    let controller = Controller::new(config, workspace, provider);

    match &cli.prompt {
        Some(prompt) => {
            run_one(&controller, cli.session.clone(), prompt, cli.plan).await?;
        }
        None => {
            run_repl(&controller, cli.session.clone(), cli.plan).await?;
        }
    }
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_env("RICOCHET_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "warn" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_subcommand(
    cmd: &Commands,
    config: ricochet_config::Config,
    workspace: std::path::PathBuf,
) -> anyhow::Result<()> {
    match cmd {
        Commands::ShowConfig => {
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        }
        Commands::Sessions => {
            let state_dir = config
                .engine
                .state_dir
                .as_ref()
                .map(std::path::PathBuf::from)
                .or_else(|| dirs::home_dir().map(|h| h.join(".ricochet")))
                .context("no state directory")?;
            let sessions = state_dir.join("sessions");
            match std::fs::read_dir(&sessions) {
                Ok(rd) => {
                    for entry in rd.filter_map(|e| e.ok()) {
                        println!("{}", entry.file_name().to_string_lossy());
                    }
                }
                Err(_) => println!("(no sessions)"),
            }
        }
        Commands::Plan { session } => {
            let state_dir = config
                .engine
                .state_dir
                .as_ref()
                .map(std::path::PathBuf::from)
                .or_else(|| dirs::home_dir().map(|h| h.join(".ricochet")))
                .context("no state directory")?;
            let plan = PlanManager::new(state_dir.join("sessions").join(session));
            match plan.generate_context() {
                Some(ctx) => println!("{ctx}"),
                None => println!("(empty plan)"),
            }
        }
        Commands::Checkpoints => {
            let mgr = ricochet_core::CheckpointManager::new(workspace);
            for cp in mgr.list() {
                println!(
                    "{}  {}  {} ({} files)",
                    &cp.id[..8],
                    cp.created_at.format("%Y-%m-%d %H:%M:%S"),
                    cp.label,
                    cp.files.len()
                );
            }
        }
    }
    Ok(())
}

async fn run_one(
    controller: &Arc<Controller>,
    session: Option<String>,
    prompt: &str,
    plan_mode: bool,
) -> anyhow::Result<()> {
    let (tx, rx) = mpsc::channel(256);
    let printer = tokio::spawn(print_events(rx));
    controller
        .chat(
            ChatInput {
                session_id: session,
                content: prompt.to_string(),
                via: None,
                plan_mode,
            },
            tx,
        )
        .await?;
    let _ = printer.await;
    Ok(())
}

async fn run_repl(
    controller: &Arc<Controller>,
    session: Option<String>,
    plan_mode: bool,
) -> anyhow::Result<()> {
    let session_id = match session {
        Some(id) => controller.sessions().ensure(&id),
        None => controller.sessions().create(),
    };
    eprintln!("session {session_id} — one prompt per line, Ctrl-D to exit");

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let (tx, rx) = mpsc::channel(256);
        let printer = tokio::spawn(print_events(rx));
        controller
            .chat(
                ChatInput {
                    session_id: Some(session_id.clone()),
                    content: line,
                    via: Some(MessageSource::Ide),
                    plan_mode,
                },
                tx,
            )
            .await?;
        let _ = printer.await;
    }
    controller.stop_swarm();
    Ok(())
}

/// Print streamed events: message snapshots are overwritten in place by the
/// final message; info and task lines go to stderr.
async fn print_events(mut rx: mpsc::Receiver<EngineEvent>) {
    let mut last_final = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Chat(update) => {
                if let Some(info) = update.info {
                    eprintln!("· {info}");
                }
                if let Some(ctx) = update.context {
                    eprintln!(
                        "· context {} / {} tokens ({:.0}%)",
                        ctx.tokens_used,
                        ctx.tokens_max,
                        ctx.percent * 100.0
                    );
                }
                if let Some(message) = update.message {
                    if !message.content.is_empty() {
                        last_final = message.content;
                    }
                }
            }
            EngineEvent::Task(progress) => {
                eprintln!(
                    "[{}] {:?} {} {}",
                    progress.role, progress.state, progress.task_id, progress.message
                );
            }
        }
    }
    if !last_final.is_empty() {
        println!("{last_final}");
        let _ = std::io::stdout().flush();
    }
}
