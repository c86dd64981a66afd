// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Verbs that talk to the user or to the model's own future turns.

use async_trait::async_trait;

use coda_protocol::{Command, CommandResult};

use super::{opt, req, ArgSpec, Dispatch, Handler, ToolCtx};

/// `OUTPUT` — surface text to the user.
pub struct OutputTool;

#[async_trait]
impl Handler for OutputTool {
    fn verb(&self) -> &'static str {
        "OUTPUT"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 1] = [req("text")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        ctx.ui.info(&cmd.args["text"]);
        Dispatch::Done(CommandResult::success(cmd.id, "OUTPUT"))
    }
}

/// `NOTES` — a note to self.  The text already lives in the history via
/// the command itself; the result only acknowledges it.
pub struct NotesTool;

#[async_trait]
impl Handler for NotesTool {
    fn verb(&self) -> &'static str {
        "NOTES"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 1] = [req("text")];
        &ARGS
    }
    async fn dispatch(&self, _ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        Dispatch::Done(CommandResult::success(cmd.id, "NOTES"))
    }
}

/// `ASK_USER` — block the loop on a UI prompt and return the typed answer.
pub struct AskUserTool;

#[async_trait]
impl Handler for AskUserTool {
    fn verb(&self) -> &'static str {
        "ASK_USER"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 2] = [req("prompt"), opt("preset_answers")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let presets: Vec<String> = cmd
            .args
            .get("preset_answers")
            .map(|p| p.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_default();
        match ctx.ui.ask(&cmd.args["prompt"], &presets).await {
            Ok(answer) => {
                Dispatch::Done(CommandResult::success(cmd.id, "ASK_USER").field("answer", answer))
            }
            Err(e) => Dispatch::Done(CommandResult::error(cmd.id, "ASK_USER", format!("{e:#}"))),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
