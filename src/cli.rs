// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use ricochet_config::TrustZone;

/// Ricochet — agent orchestration engine for a developer workspace.
///
/// With no subcommand, reads prompts from stdin (one per line) and streams
/// the agent's replies to stdout.
#[derive(Parser, Debug)]
#[command(name = "ricochet", version, about)]
pub struct Cli {
    /// Explicit config file (merged over the discovered layers)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Workspace root (default: current directory)
    #[arg(long, short = 'w')]
    pub workspace: Option<PathBuf>,

    /// One-shot prompt; run a single chat call and exit
    #[arg(long, short = 'p')]
    pub prompt: Option<String>,

    /// Resume an existing session id instead of creating a new one
    #[arg(long)]
    pub session: Option<String>,

    /// Start in plan mode (read-only exploration, no writes or commands)
    #[arg(long)]
    pub plan: bool,

    /// Override the safeguard trust zone for this run
    #[arg(long, value_enum)]
    pub trust_zone: Option<TrustZone>,

    /// Verbose logging to stderr (or set RICOCHET_LOG)
    #[arg(long, short = 'v')]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the merged configuration and exit
    ShowConfig,
    /// List sessions stored in the state directory
    Sessions,
    /// Show a session's plan
    Plan {
        /// Session id
        session: String,
    },
    /// List workspace checkpoints
    Checkpoints,
}
