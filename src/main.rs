// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::Cli;
use coda_core::{Orchestrator, PromptStore, SessionOptions, SessionStats, Ui, Verdict};
use coda_model::{OpenRouterTransport, ProgressSink};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let ui = Arc::new(CliUi {
        history: cli.directory.join(".coda/history"),
    });
    let mut orchestrator = Orchestrator::new(
        SessionOptions {
            directory: cli.directory.clone(),
            model: cli.model.clone(),
            prompts: PromptStore::builtin(),
        },
        Arc::new(OpenRouterTransport::new()),
        ui,
        Arc::new(CliProgress),
    )
    .await?;

    orchestrator.run(cli.initial_task()).await
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

// ── Interactive UI ────────────────────────────────────────────────────────────

/// Minimal line-based UI with a shared history file for recall.
struct CliUi {
    history: PathBuf,
}

impl CliUi {
    async fn read_line(&self, prompt: &str) -> anyhow::Result<String> {
        print!("{prompt}");
        std::io::stdout().flush().ok();
        let line = tokio::task::spawn_blocking(|| {
            let mut buf = String::new();
            std::io::stdin().read_line(&mut buf).map(|_| buf)
        })
        .await
        .context("stdin reader task failed")??;
        let line = line.trim_end_matches(['\n', '\r']).to_string();
        self.remember(&line);
        Ok(line)
    }

    /// Append non-empty input to the recall history (best-effort).
    fn remember(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if let Some(parent) = self.history.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Ok(mut f) = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.history)
        {
            let _ = writeln!(f, "{line}");
        }
    }
}

#[async_trait]
impl Ui for CliUi {
    async fn task(&self) -> anyhow::Result<Option<String>> {
        println!("Enter your task (empty line to exit):");
        let line = self.read_line("> ").await?;
        Ok(Some(line).filter(|l| !l.trim().is_empty()))
    }

    async fn ask(&self, prompt: &str, presets: &[String]) -> anyhow::Result<String> {
        println!("{prompt}");
        if !presets.is_empty() {
            println!("  (suggested: {})", presets.join(", "));
        }
        self.read_line("> ").await
    }

    async fn approve(&self, proposal: &str, stats: &SessionStats) -> anyhow::Result<Verdict> {
        println!("\nTask complete. Proposed commit message:\n\n{proposal}\n");
        println!(
            "Session stats: {} tokens, {}μ$ cost",
            stats.total_tokens, stats.cost_micro
        );
        loop {
            let answer = self
                .read_line("Merge into the main branch? [yes/no/defer] ")
                .await?;
            match answer.trim() {
                "y" | "yes" => return Ok(Verdict::Approve),
                "n" | "no" => {
                    let feedback = self.read_line("What changes do you want?\n> ").await?;
                    return Ok(Verdict::Reject(feedback));
                }
                "d" | "defer" => return Ok(Verdict::Defer),
                other => println!("Unrecognised answer: {other}"),
            }
        }
    }

    async fn commit_message(&self, default: &str) -> anyhow::Result<String> {
        println!("Commit message (empty line keeps the proposal):");
        let line = self.read_line("> ").await?;
        if line.trim().is_empty() {
            Ok(default.to_string())
        } else {
            Ok(line)
        }
    }

    fn info(&self, text: &str) {
        println!("{text}");
    }
}

// ── Streaming progress ────────────────────────────────────────────────────────

/// Rewrites one status line while the model response streams in.
struct CliProgress;

impl ProgressSink for CliProgress {
    fn update(&self, status: &str, bytes: usize) {
        print!("\r\x1b[KLLM: {status}... ({bytes} bytes)");
        std::io::stdout().flush().ok();
    }

    fn done(&self, bytes: usize) {
        print!("\r\x1b[K");
        println!("LLM: done! ({bytes} bytes)");
    }
}
