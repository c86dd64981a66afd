// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sandboxed shell execution verb.

use async_trait::async_trait;

use coda_protocol::{Command, CommandResult};
use coda_sandbox::SandboxRequest;

use super::{opt, req, ArgSpec, Dispatch, Handler, ToolCtx};

/// `RUN` — execute a shell fragment inside the sandbox container.
///
/// Optional arguments: `image` (base image), `setup` (newline-separated
/// Dockerfile `RUN` lines baked into a cached prepared image), `head` and
/// `tail` (output window sizes).  A non-zero exit code is reported in the
/// result, not an error; sandbox failures (no runtime, image build
/// failure) are errors.
pub struct RunTool;

#[async_trait]
impl Handler for RunTool {
    fn verb(&self) -> &'static str {
        "RUN"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 5] =
            [req("command"), opt("image"), opt("setup"), opt("head"), opt("tail")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let mut req = SandboxRequest::new(&cmd.args["command"], ctx.workspace, ctx.repo_root);
        if let Some(image) = cmd.args.get("image") {
            req.base_image = image.clone();
        }
        if let Some(setup) = cmd.args.get("setup") {
            req.build_steps = setup.lines().map(str::to_string).collect();
        }
        if let Some(head) = cmd.args.get("head").and_then(|h| h.parse().ok()) {
            req.head = head;
        }
        if let Some(tail) = cmd.args.get("tail").and_then(|t| t.parse().ok()) {
            req.tail = tail;
        }

        match ctx.sandbox.run(&req).await {
            Ok(result) => Dispatch::Done(
                CommandResult::success(cmd.id, "RUN")
                    .field("exit_code", result.exit_code.to_string())
                    .field("output", result.output),
            ),
            Err(e) => Dispatch::Done(CommandResult::error(cmd.id, "RUN", format!("{e:#}"))),
        }
    }
}
