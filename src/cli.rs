// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use clap::Parser;
use std::path::PathBuf;

/// coda, a session-orchestrating AI coding assistant.
///
/// Runs the model against an isolated git worktree of your repository;
/// nothing reaches your branch until you approve the merge.
#[derive(Parser, Debug)]
#[command(name = "coda", version, about)]
pub struct Cli {
    /// Initial task description (prompted for interactively when omitted).
    pub task: Vec<String>,

    /// Model identifier, overriding each context's default.
    #[arg(short, long)]
    pub model: Option<String>,

    /// Repository root (default: current directory).
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Write tracing diagnostics to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Positional arguments joined into the initial task, if any.
    pub fn initial_task(&self) -> Option<String> {
        if self.task.is_empty() {
            None
        } else {
            Some(self.task.join(" "))
        }
    }
}
