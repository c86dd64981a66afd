// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Verb registry and dispatch.
//!
//! Every verb maps to a handler with a declared argument schema; dispatch
//! is table lookup.  Schema mismatch (unknown verb, missing required
//! argument) becomes an error result fed back to the model, never a
//! crash.  Control verbs (subcontext spawn/continue, terminals) do not
//! execute here: they surface as [`Dispatch`] variants for the
//! orchestrator, which owns the context hierarchy.

mod control;
mod fs;
mod meta;
mod run;

pub use fs::check_path;

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use coda_protocol::{Command, CommandResult};
use coda_sandbox::Sandbox;

use crate::ui::Ui;

/// Declared argument of a verb.
#[derive(Debug, Clone, Copy)]
pub struct ArgSpec {
    pub name: &'static str,
    pub required: bool,
}

pub const fn req(name: &'static str) -> ArgSpec {
    ArgSpec { name, required: true }
}

pub const fn opt(name: &'static str) -> ArgSpec {
    ArgSpec { name, required: false }
}

/// Shared execution environment handed to handlers.
pub struct ToolCtx<'a> {
    pub workspace: &'a Path,
    pub repo_root: &'a Path,
    pub sandbox: &'a Sandbox,
    pub ui: &'a dyn Ui,
}

/// What dispatching one command produced.
#[derive(Debug)]
pub enum Dispatch {
    /// The handler ran; here is its result.
    Done(CommandResult),
    /// Spawn a subcontext and run it (orchestrator-resolved).
    Spawn {
        id: u64,
        unique_name: String,
        kind: String,
        task: String,
        model: Option<String>,
        budget: Option<i64>,
    },
    /// Resume a named subcontext (orchestrator-resolved).
    Continue {
        id: u64,
        unique_name: String,
        guidance: Option<String>,
    },
    /// Subcontext terminal: the delegated task is done.
    Complete { id: u64, result: String },
    /// Main-context terminal: propose the session's changes for merge.
    ProposeMerge { id: u64, message: String },
}

#[async_trait]
pub trait Handler: Send + Sync {
    fn verb(&self) -> &'static str;
    fn args(&self) -> &'static [ArgSpec];
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch;
}

/// Verb → handler table.
pub struct Registry {
    handlers: HashMap<&'static str, Arc<dyn Handler>>,
}

impl Registry {
    /// Registry with every built-in verb.
    pub fn builtin() -> Self {
        let mut reg = Self {
            handlers: HashMap::new(),
        };
        reg.register(fs::ReadTool);
        reg.register(fs::OverwriteTool);
        reg.register(fs::UpdateTool);
        reg.register(fs::ListFilesTool);
        reg.register(fs::SearchTool);
        reg.register(run::RunTool);
        reg.register(meta::OutputTool);
        reg.register(meta::NotesTool);
        reg.register(meta::AskUserTool);
        reg.register(control::SpawnContextTool);
        reg.register(control::ContinueContextTool);
        reg.register(control::CompleteTool);
        reg.register(control::ProposeMergeTool);
        reg
    }

    pub fn register(&mut self, handler: impl Handler + 'static) {
        self.handlers.insert(handler.verb(), Arc::new(handler));
    }

    pub fn verbs(&self) -> Vec<&'static str> {
        let mut v: Vec<&'static str> = self.handlers.keys().copied().collect();
        v.sort_unstable();
        v
    }

    /// Validate a command against its handler's argument schema.
    fn validate(&self, cmd: &Command) -> Result<Arc<dyn Handler>, String> {
        let handler = self
            .handlers
            .get(cmd.verb.as_str())
            .ok_or_else(|| format!("unknown verb: {}", cmd.verb))?;
        let missing: Vec<&str> = handler
            .args()
            .iter()
            .filter(|a| a.required && !cmd.args.contains_key(a.name))
            .map(|a| a.name)
            .collect();
        if !missing.is_empty() {
            return Err(format!(
                "missing required argument(s): {}",
                missing.join(", ")
            ));
        }
        Ok(Arc::clone(handler))
    }

    /// Look up and run the handler for one command.  Validation failures
    /// come back as error results; the model is expected to self-correct.
    pub async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        match self.validate(cmd) {
            Ok(handler) => handler.dispatch(ctx, cmd).await,
            Err(reason) => Dispatch::Done(CommandResult::error(cmd.id, &cmd.verb, reason)),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
