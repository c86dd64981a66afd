// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Control verbs resolved by the orchestrator.
//!
//! These handlers only validate and repackage their arguments; the
//! orchestrator owns the context hierarchy and the approval ceremony, so
//! spawning, resuming, and the two terminals surface as [`Dispatch`]
//! variants instead of executing here.

use async_trait::async_trait;

use coda_protocol::{Command, CommandResult};

use super::{opt, req, ArgSpec, Dispatch, Handler, ToolCtx};

/// `SPAWN_CONTEXT` — create a subcontext and run it under a budget.
pub struct SpawnContextTool;

#[async_trait]
impl Handler for SpawnContextTool {
    fn verb(&self) -> &'static str {
        "SPAWN_CONTEXT"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 5] = [
            req("unique_name"),
            req("kind"),
            req("task"),
            opt("model"),
            opt("budget"),
        ];
        &ARGS
    }
    async fn dispatch(&self, _ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let budget = match cmd.args.get("budget") {
            Some(raw) => match raw.trim().parse::<i64>() {
                Ok(b) => Some(b),
                Err(_) => {
                    return Dispatch::Done(CommandResult::error(
                        cmd.id,
                        "SPAWN_CONTEXT",
                        format!("budget must be an integer micro-dollar amount, got: {raw}"),
                    ))
                }
            },
            None => None,
        };
        Dispatch::Spawn {
            id: cmd.id,
            unique_name: cmd.args["unique_name"].clone(),
            kind: cmd.args["kind"].clone(),
            task: cmd.args["task"].clone(),
            model: cmd.args.get("model").cloned(),
            budget,
        }
    }
}

/// `CONTINUE_CONTEXT` — resume a named subcontext with optional guidance.
pub struct ContinueContextTool;

#[async_trait]
impl Handler for ContinueContextTool {
    fn verb(&self) -> &'static str {
        "CONTINUE_CONTEXT"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 2] = [req("unique_name"), opt("guidance")];
        &ARGS
    }
    async fn dispatch(&self, _ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        Dispatch::Continue {
            id: cmd.id,
            unique_name: cmd.args["unique_name"].clone(),
            guidance: cmd.args.get("guidance").cloned(),
        }
    }
}

/// `COMPLETE` — subcontext terminal.
pub struct CompleteTool;

#[async_trait]
impl Handler for CompleteTool {
    fn verb(&self) -> &'static str {
        "COMPLETE"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 1] = [req("result")];
        &ARGS
    }
    async fn dispatch(&self, _ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        Dispatch::Complete {
            id: cmd.id,
            result: cmd.args["result"].clone(),
        }
    }
}

/// `PROPOSE_MERGE` — main-context terminal: propose the session's changes
/// for integration, with a suggested commit message.
pub struct ProposeMergeTool;

#[async_trait]
impl Handler for ProposeMergeTool {
    fn verb(&self) -> &'static str {
        "PROPOSE_MERGE"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 1] = [req("message")];
        &ARGS
    }
    async fn dispatch(&self, _ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        Dispatch::ProposeMerge {
            id: cmd.id,
            message: cmd.args["message"].clone(),
        }
    }
}
