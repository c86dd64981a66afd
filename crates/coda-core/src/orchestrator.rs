// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The top-level session loop.
//!
//! Drives each context through think → invoke-tool → commit → observe:
//! call the model, parse the single `respond` invocation into commands,
//! dispatch them through the verb registry, feed the formatted results
//! back, and capture a commit whenever the workspace changed.  Subcontexts
//! run to completion (or budget exhaustion) while their parent is
//! suspended; the whole orchestrator is one cooperative task, which keeps
//! commit linearisation trivial.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{debug, warn};

use coda_log::Logger;
use coda_model::{ProgressSink, Transport};
use coda_protocol::{effective_commands, format_results, parse, CommandResult, FormatMode};
use coda_sandbox::Sandbox;
use coda_vcs::{IntegrateOutcome, Workspace};

use crate::context::{single_invocation, Context, GUIDANCE_FILE};
use crate::prompts::PromptStore;
use crate::tools::{Dispatch, Registry, ToolCtx};
use crate::ui::{SessionStats, Ui, Verdict};

/// Kind tag of the main context's prompt descriptor.
const MAIN_KIND: &str = "main";
/// Cap applied to the final-result excerpt inside subcontext summaries.
const SUMMARY_RESULT_CAP: usize = 500;

/// How a run of turns on one context ended.
#[derive(Debug)]
enum TurnsEnd {
    /// Main-context terminal: the model proposed a merge.
    Merge { message: String },
    /// Subcontext terminal: the delegated task is done.
    Complete { result: String },
    /// The subcontext's budget ran out (soft signal, not an error).
    BudgetExhausted,
    /// Transport gave up after its retries.
    TransportFailed(String),
}

#[derive(Debug)]
struct TurnsOutcome {
    end: TurnsEnd,
    /// Per-iteration summary lines, for subcontext reporting.
    summary: String,
    cost_micro: i64,
}

/// Report of one subcontext run, summarised upward to the parent.
#[derive(Debug)]
struct SubReport {
    completed: bool,
    summary: String,
    cost_micro: i64,
    duration_secs: f64,
}

/// Options for opening a session.
pub struct SessionOptions {
    pub directory: PathBuf,
    /// Overrides every context's default model when set.
    pub model: Option<String>,
    pub prompts: PromptStore,
}

/// The session orchestrator.
pub struct Orchestrator {
    repo_root: PathBuf,
    workspace: Workspace,
    logger: Arc<Logger>,
    transport: Arc<dyn Transport>,
    sandbox: Sandbox,
    prompts: PromptStore,
    registry: Registry,
    ui: Arc<dyn Ui>,
    progress: Arc<dyn ProgressSink>,
    model_override: Option<String>,
    subcontexts: HashMap<String, Context>,
}

impl Orchestrator {
    /// Open a session: verify (or offer to initialise) the repository,
    /// allocate the workspace, and set up the session logger.
    pub async fn new(
        opts: SessionOptions,
        transport: Arc<dyn Transport>,
        ui: Arc<dyn Ui>,
        progress: Arc<dyn ProgressSink>,
    ) -> anyhow::Result<Self> {
        let directory = opts
            .directory
            .canonicalize()
            .with_context(|| format!("resolving directory {}", opts.directory.display()))?;

        if !coda_vcs::is_git_repo(&directory).await {
            let answer = ui
                .ask(
                    "Not in a git repository. Initialize one now?",
                    &["yes".to_string(), "no".to_string()],
                )
                .await?;
            if answer.trim() != "yes" {
                anyhow::bail!("not a git repository: {}", directory.display());
            }
            coda_vcs::init_repo(&directory).await?;
            ui.info("Git repository initialized.");
        }

        let repo_root = coda_vcs::repo_root(&directory).await?;
        let workspace = coda_vcs::prepare(&repo_root).await?;
        let logger = Arc::new(Logger::new(&workspace.path)?);
        ui.info(&format!(
            "Session {} created (branch: {}, worktree: {})",
            workspace.session_id,
            workspace.branch,
            workspace.path.display()
        ));

        Ok(Self {
            repo_root,
            workspace,
            logger,
            transport,
            sandbox: Sandbox::new(),
            prompts: opts.prompts,
            registry: Registry::builtin(),
            ui,
            progress,
            model_override: opts.model,
            subcontexts: HashMap::new(),
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// The main loop: prompt for tasks, run the main context, and mediate
    /// the approval/integration ceremony.  Returns when the user is out of
    /// tasks or defers; unrecoverable integration failures propagate.
    pub async fn run(&mut self, mut initial_task: Option<String>) -> anyhow::Result<()> {
        let mut main = self.new_main_context().await?;

        loop {
            let task = match initial_task.take() {
                Some(t) => Some(t),
                None => self.ui.task().await?,
            };
            let Some(task) = task.filter(|t| !t.trim().is_empty()) else {
                return Ok(());
            };
            main.push_user(&self.logger, task);

            'session: loop {
                let outcome = self.run_turns(&mut main).await?;
                match outcome.end {
                    TurnsEnd::Merge { message } => {
                        match self.approval(&mut main, &message).await? {
                            Approval::Merged => {
                                // Fresh session for the next task.
                                main = self.reset_session().await?;
                                break 'session;
                            }
                            Approval::Continue => continue 'session,
                            Approval::Defer => {
                                self.ui.info("Keeping workspace for manual review.");
                                return Ok(());
                            }
                        }
                    }
                    TurnsEnd::TransportFailed(e) => {
                        // The workspace is retained; the log has the details.
                        self.ui.info(&format!("Model call failed: {e}"));
                        return Ok(());
                    }
                    end => {
                        warn!(?end, "unexpected terminal on main context");
                        break 'session;
                    }
                }
            }
        }
    }

    /// Present the merge proposal, then integrate on approval.
    async fn approval(&mut self, main: &mut Context, message: &str) -> anyhow::Result<Approval> {
        let stats = self.session_stats(main);
        match self.ui.approve(message, &stats).await? {
            Verdict::Approve => {
                let commit_message = self.ui.commit_message(message).await?;
                let outcome = coda_vcs::integrate(
                    &self.repo_root,
                    &self.workspace.path,
                    &self.workspace.branch,
                    &commit_message,
                )
                .await?;
                match outcome {
                    IntegrateOutcome::Integrated => {
                        let _ = self.logger.log(
                            "main",
                            &[("tag", json!("integrated")), ("message", json!(commit_message))],
                        );
                        coda_vcs::discard(&self.repo_root, &self.workspace.path, &self.workspace.branch)
                            .await;
                        self.ui.info("✓ Merged and cleaned up");
                        Ok(Approval::Merged)
                    }
                    IntegrateOutcome::RebaseConflict { diagnostic } => {
                        self.ui
                            .info(&format!("Merge failed, rebase conflict:\n{diagnostic}"));
                        main.push_user(
                            &self.logger,
                            format!(
                                "The proposed merge hit a rebase conflict against the main \
                                 branch. Rebase output:\n\n{diagnostic}\n\nResolve the \
                                 conflict in the workspace, then propose the merge again."
                            ),
                        );
                        Ok(Approval::Continue)
                    }
                }
            }
            Verdict::Reject(feedback) => {
                main.push_user(&self.logger, feedback);
                Ok(Approval::Continue)
            }
            Verdict::Defer => Ok(Approval::Defer),
        }
    }

    /// Allocate a fresh workspace, logger, and main context after a
    /// successful integration.
    async fn reset_session(&mut self) -> anyhow::Result<Context> {
        self.workspace = coda_vcs::prepare(&self.repo_root).await?;
        self.logger = Arc::new(Logger::new(&self.workspace.path)?);
        self.subcontexts.clear();
        self.ui.info(&format!(
            "Session {} created (branch: {}, worktree: {})",
            self.workspace.session_id,
            self.workspace.branch,
            self.workspace.path.display()
        ));
        self.new_main_context().await
    }

    async fn new_main_context(&self) -> anyhow::Result<Context> {
        let mut main = Context::new(
            "main",
            MAIN_KIND,
            true,
            self.model_override.as_deref(),
            None,
            &self.prompts,
            &self.workspace.path,
        )
        .await?;

        // Seed awareness of the project layout (best-effort).
        if let Ok(entries) = std::fs::read_dir(&self.workspace.path) {
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .filter(|n| n != ".git" && n != ".scratch" && n != ".coda" && !n.ends_with(".log"))
                .collect();
            names.sort();
            if !names.is_empty() {
                let listing = names
                    .iter()
                    .map(|n| format!("- {n}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                main.push_system(
                    &self.logger,
                    format!(
                        "Top-level directory contains {} entries:\n{listing}",
                        names.len()
                    ),
                );
            }
        }
        Ok(main)
    }

    fn session_stats(&self, main: &Context) -> SessionStats {
        let mut stats = SessionStats {
            cost_micro: main.cumulative_cost,
            total_tokens: main.total_tokens,
        };
        for sub in self.subcontexts.values() {
            stats.cost_micro += sub.cumulative_cost;
            stats.total_tokens += sub.total_tokens;
        }
        stats
    }

    fn guidance_content(&self) -> Option<String> {
        std::fs::read_to_string(self.workspace.path.join(GUIDANCE_FILE)).ok()
    }

    /// Run turns on one context until a terminal, budget exhaustion, or a
    /// transport failure.
    async fn run_turns(&mut self, ctx: &mut Context) -> anyhow::Result<TurnsOutcome> {
        let mut summary_parts: Vec<String> = Vec::new();
        let mut run_cost = 0i64;

        loop {
            let label = if ctx.is_main {
                "Main context thinking...".to_string()
            } else {
                format!("  Subcontext '{}' thinking...", ctx.name)
            };
            self.ui.info(&label);

            // Catch up on guidance edits and commits from other contexts.
            if let Some(content) = self.guidance_content() {
                ctx.refresh_guidance(&self.logger, &content);
            }
            ctx.inject_head_delta(&self.workspace.path, &self.logger)
                .await?;

            let turn = match ctx.call(&*self.transport, &*self.progress, &self.logger).await {
                Ok(t) => t,
                Err(e) => {
                    let _ = self.logger.log(
                        &ctx.name,
                        &[("tag", json!("error")), ("error", json!(format!("{e:#}")))],
                    );
                    return Ok(TurnsOutcome {
                        end: TurnsEnd::TransportFailed(format!("{e:#}")),
                        summary: summary_parts.join("\n"),
                        cost_micro: run_cost,
                    });
                }
            };
            run_cost += turn.cost_micro;

            // Exactly one tool invocation per assistant turn.
            let invocation = match single_invocation(&turn.message) {
                Ok(inv) => inv.clone(),
                Err(0) => {
                    let _ = self.logger.log(
                        &ctx.name,
                        &[("tag", json!("protocol_error")), ("error", json!("no tool call"))],
                    );
                    ctx.push_user(
                        &self.logger,
                        "You must answer by calling the `respond` tool exactly once.",
                    );
                    continue;
                }
                Err(n) => {
                    let _ = self.logger.log(
                        &ctx.name,
                        &[
                            ("tag", json!("protocol_error")),
                            ("error", json!(format!("expected 1 tool call, got {n}"))),
                        ],
                    );
                    // Answer every reported call so the wire stays valid.
                    for tc in turn.message.tool_calls.clone() {
                        ctx.push_tool_result(
                            &self.logger,
                            &tc.id,
                            format!("status: error\nerror: expected exactly one respond invocation, got {n}"),
                        );
                    }
                    continue;
                }
            };

            let (text, rationale) = match parse_respond_arguments(&invocation.function.arguments) {
                Ok(pair) => pair,
                Err(reason) => {
                    let _ = self.logger.log(
                        &ctx.name,
                        &[("tag", json!("protocol_error")), ("error", json!(reason.clone()))],
                    );
                    ctx.push_tool_result(
                        &self.logger,
                        &invocation.id,
                        format!("status: error\nerror: {reason}"),
                    );
                    continue;
                }
            };

            let parsed = parse(&text);
            if !parsed.prose.is_empty() {
                self.ui.info(&parsed.prose);
                let _ = self.logger.log(
                    &ctx.name,
                    &[("tag", json!("thinking")), ("text", json!(parsed.prose.clone()))],
                );
            }

            let commands = effective_commands(parsed.commands);
            if commands.is_empty() {
                ctx.push_tool_result(
                    &self.logger,
                    &invocation.id,
                    "status: error\nerror: no commands found in your reply; every action \
                     must be a ~coda~ command",
                );
                continue;
            }

            // Dispatch.  Control commands are resolved after the plain ones
            // produced their slots, so result order matches command order.
            let mut slots: Vec<Slot> = Vec::new();
            for cmd in &commands {
                let _ = self.logger.log(
                    &ctx.name,
                    &[
                        ("tag", json!("command")),
                        ("verb", json!(cmd.verb.clone())),
                        ("id", json!(cmd.id)),
                    ],
                );
                // Unknown verbs fall through to the registry, which reports
                // them; the permitted-set check only applies to real verbs.
                let known = self.registry.verbs().contains(&cmd.verb.as_str());
                if known && !ctx.tools.iter().any(|t| t == &cmd.verb) {
                    slots.push(Slot::Ready(CommandResult::error(
                        cmd.id,
                        &cmd.verb,
                        format!("verb {} is not permitted in this context", cmd.verb),
                    )));
                    continue;
                }
                let dispatch = {
                    let tool_ctx = ToolCtx {
                        workspace: &self.workspace.path,
                        repo_root: &self.repo_root,
                        sandbox: &self.sandbox,
                        ui: &*self.ui,
                    };
                    self.registry.dispatch(&tool_ctx, cmd).await
                };
                slots.push(Slot::from(dispatch));
            }

            let mut results: Vec<CommandResult> = Vec::new();
            let mut end: Option<TurnsEnd> = None;
            let mut verbs: Vec<String> = Vec::new();

            for (slot, cmd) in slots.into_iter().zip(commands.iter()) {
                verbs.push(cmd.verb.clone());
                match slot {
                    Slot::Ready(result) => results.push(result),
                    Slot::Control(Dispatch::Spawn {
                        id,
                        unique_name,
                        kind,
                        task,
                        model,
                        budget,
                    }) => {
                        if !ctx.is_main {
                            results.push(CommandResult::error(
                                id,
                                "SPAWN_CONTEXT",
                                "subcontexts cannot spawn further contexts",
                            ));
                            continue;
                        }
                        let report = self
                            .spawn_subcontext(&unique_name, &kind, &task, model, budget)
                            .await;
                        results.push(sub_result(id, "SPAWN_CONTEXT", &unique_name, report));
                    }
                    Slot::Control(Dispatch::Continue {
                        id,
                        unique_name,
                        guidance,
                    }) => {
                        if !ctx.is_main {
                            results.push(CommandResult::error(
                                id,
                                "CONTINUE_CONTEXT",
                                "subcontexts cannot resume other contexts",
                            ));
                            continue;
                        }
                        let report = self.continue_subcontext(&unique_name, guidance).await;
                        results.push(sub_result(id, "CONTINUE_CONTEXT", &unique_name, report));
                    }
                    Slot::Control(Dispatch::Complete { id, result }) => {
                        if ctx.is_main {
                            results.push(CommandResult::error(
                                id,
                                "COMPLETE",
                                "COMPLETE is only valid in a subcontext; use PROPOSE_MERGE",
                            ));
                            continue;
                        }
                        results.push(CommandResult::success(id, "COMPLETE"));
                        end = Some(TurnsEnd::Complete { result });
                    }
                    Slot::Control(Dispatch::ProposeMerge { id, message }) => {
                        if !ctx.is_main {
                            results.push(CommandResult::error(
                                id,
                                "PROPOSE_MERGE",
                                "only the main context can propose a merge",
                            ));
                            continue;
                        }
                        results.push(CommandResult::success(id, "PROPOSE_MERGE"));
                        end = Some(TurnsEnd::Merge { message });
                    }
                    Slot::Control(Dispatch::Done(_)) => unreachable!("Done is Slot::Ready"),
                }
            }

            let result_text = format_results(&results, FormatMode::Normal);
            let _ = self.logger.log(
                &ctx.name,
                &[
                    ("tag", json!("tool_result")),
                    ("verbs", json!(verbs.join(", "))),
                    ("result", json!(result_text.clone())),
                ],
            );
            ctx.push_tool_result(&self.logger, &invocation.id, result_text.clone());

            // Commit anything the tools changed.
            let mut diff_stats = String::new();
            if coda_vcs::has_changes(&self.workspace.path).await? {
                diff_stats = coda_vcs::diff_stat(&self.workspace.path).await?;
                let commit_message = rationale
                    .clone()
                    .unwrap_or_else(|| verbs.join(", "));
                coda_vcs::commit(&self.workspace.path, &commit_message).await?;
                let _ = self.logger.log(
                    &ctx.name,
                    &[
                        ("tag", json!("commit")),
                        ("message", json!(commit_message)),
                        ("diff_stats", json!(diff_stats.clone())),
                    ],
                );
                self.ui.info("✓ Committed changes");

                // A commit may have touched the guidance file; other live
                // contexts receive the refresh once, here.
                if let Some(content) = self.guidance_content() {
                    for sub in self.subcontexts.values_mut() {
                        sub.refresh_guidance(&self.logger, &content);
                    }
                }
            }

            // One iteration summary (used when this run reports upward).
            let mut part = format!("Verbs: {}\n", verbs.join(", "));
            if let Some(r) = &rationale {
                part.push_str(&format!("Rationale: {r}\n"));
            }
            part.push_str(&format!(
                "Tokens: {}, Cost: {}μ$, Duration: {:.2}s\n",
                turn.usage.total_tokens(),
                turn.cost_micro,
                turn.duration_secs
            ));
            if !diff_stats.is_empty() {
                part.push_str(&format!("Changes:\n{diff_stats}\n"));
            }
            let excerpt: String = result_text.chars().take(SUMMARY_RESULT_CAP).collect();
            part.push_str(&format!("Result: {excerpt}\n"));
            summary_parts.push(part);

            if let Some(end) = end {
                if let TurnsEnd::Complete { result } = &end {
                    summary_parts.push(format!("Final result: {result}"));
                }
                let _ = self.logger.log(&ctx.name, &[("tag", json!("complete"))]);
                return Ok(TurnsOutcome {
                    end,
                    summary: summary_parts.join("\n"),
                    cost_micro: run_cost,
                });
            }

            if ctx.budget_exhausted() {
                let note = format!(
                    "Context '{}' budget exceeded (spent {}μ$ of {}μ$)",
                    ctx.name,
                    ctx.spent,
                    ctx.budget.unwrap_or(0)
                );
                self.ui.info(&format!("  {note}"));
                let _ = self
                    .logger
                    .log(&ctx.name, &[("tag", json!("budget_exhausted"))]);
                summary_parts.push(note);
                return Ok(TurnsOutcome {
                    end: TurnsEnd::BudgetExhausted,
                    summary: summary_parts.join("\n"),
                    cost_micro: run_cost,
                });
            }
        }
    }

    /// Create a subcontext, seed it with its task, and run it immediately.
    ///
    /// Boxed return type: this future re-enters [`run_turns`], and the
    /// erasure is what keeps the mutually recursive future types finite.
    fn spawn_subcontext<'a>(
        &'a mut self,
        unique_name: &'a str,
        kind: &'a str,
        task: &'a str,
        model: Option<String>,
        budget: Option<i64>,
    ) -> BoxFuture<'a, anyhow::Result<SubReport>> {
        Box::pin(async move {
            if unique_name == "main" || self.subcontexts.contains_key(unique_name) {
                anyhow::bail!("context name already in use: {unique_name}");
            }
            let mut sub = Context::new(
                unique_name,
                kind,
                false,
                model.as_deref().or(self.model_override.as_deref()),
                budget,
                &self.prompts,
                &self.workspace.path,
            )
            .await?;
            sub.push_user(&self.logger, task);
            self.ui
                .info(&format!("  Created subcontext: {unique_name} ({kind})"));

            let report = self.drive_subcontext(&mut sub).await?;
            self.subcontexts.insert(unique_name.to_string(), sub);
            Ok(report)
        })
    }

    /// Resume a named subcontext, optionally with fresh guidance.
    fn continue_subcontext<'a>(
        &'a mut self,
        unique_name: &'a str,
        guidance: Option<String>,
    ) -> BoxFuture<'a, anyhow::Result<SubReport>> {
        Box::pin(async move {
            let mut sub = self
                .subcontexts
                .remove(unique_name)
                .with_context(|| format!("unknown subcontext: {unique_name}"))?;
            // A resumed run gets a fresh budget window over the same
            // allowance.
            sub.spent = 0;
            if let Some(g) = guidance {
                sub.push_user(&self.logger, g);
            }
            self.ui
                .info(&format!("  Continuing subcontext: {unique_name}"));

            let report = self.drive_subcontext(&mut sub).await;
            self.subcontexts.insert(unique_name.to_string(), sub);
            report
        })
    }

    async fn drive_subcontext(&mut self, sub: &mut Context) -> anyhow::Result<SubReport> {
        let started = std::time::Instant::now();
        let outcome = self.run_turns(sub).await?;
        let duration_secs = started.elapsed().as_secs_f64();

        let (completed, mut summary) = match outcome.end {
            TurnsEnd::Complete { .. } => (true, outcome.summary),
            TurnsEnd::BudgetExhausted => (false, outcome.summary),
            TurnsEnd::TransportFailed(e) => {
                (false, format!("{}\nError during model call: {e}", outcome.summary))
            }
            TurnsEnd::Merge { .. } => {
                debug!(context = %sub.name, "subcontext attempted PROPOSE_MERGE");
                (false, outcome.summary)
            }
        };
        if summary.is_empty() {
            summary = "(no activity)".to_string();
        }

        Ok(SubReport {
            completed,
            summary,
            cost_micro: outcome.cost_micro,
            duration_secs,
        })
    }
}

enum Approval {
    Merged,
    Continue,
    Defer,
}

/// Slot for one command's outcome while control commands await resolution.
enum Slot {
    Ready(CommandResult),
    Control(Dispatch),
}

impl From<Dispatch> for Slot {
    fn from(d: Dispatch) -> Self {
        match d {
            Dispatch::Done(r) => Slot::Ready(r),
            other => Slot::Control(other),
        }
    }
}

/// Extract `text` and optional `rationale` from the respond invocation's
/// argument JSON.
fn parse_respond_arguments(arguments: &str) -> Result<(String, Option<String>), String> {
    let v: serde_json::Value = serde_json::from_str(arguments)
        .map_err(|e| format!("respond arguments were not valid JSON: {e}"))?;
    let text = v["text"]
        .as_str()
        .ok_or_else(|| "respond arguments are missing the `text` field".to_string())?
        .to_string();
    let rationale = v["rationale"].as_str().map(str::to_string);
    Ok((text, rationale))
}

/// Fold a subcontext report (or failure) into the parent's command result.
fn sub_result(
    id: u64,
    verb: &str,
    unique_name: &str,
    report: anyhow::Result<SubReport>,
) -> CommandResult {
    match report {
        Ok(r) => CommandResult::success(id, verb)
            .field("context", unique_name)
            .field("completed", r.completed.to_string())
            .field("cost", r.cost_micro.to_string())
            .field("duration", format!("{:.2}s", r.duration_secs))
            .field("summary", r.summary),
        Err(e) => CommandResult::error(id, verb, format!("{e:#}")),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respond_arguments_parse_text_and_rationale() {
        let (text, rationale) =
            parse_respond_arguments(r#"{"text": "hello", "rationale": "why"}"#).unwrap();
        assert_eq!(text, "hello");
        assert_eq!(rationale.as_deref(), Some("why"));
    }

    #[test]
    fn respond_arguments_without_rationale() {
        let (text, rationale) = parse_respond_arguments(r#"{"text": "x"}"#).unwrap();
        assert_eq!(text, "x");
        assert!(rationale.is_none());
    }

    #[test]
    fn respond_arguments_missing_text_is_an_error() {
        let err = parse_respond_arguments(r#"{"rationale": "only"}"#).unwrap_err();
        assert!(err.contains("text"));
    }

    #[test]
    fn respond_arguments_invalid_json_is_an_error() {
        let err = parse_respond_arguments("{not json").unwrap_err();
        assert!(err.contains("JSON"));
    }

    #[test]
    fn sub_result_reports_failure_as_error() {
        let r = sub_result(3, "SPAWN_CONTEXT", "helper", Err(anyhow::anyhow!("name taken")));
        assert_eq!(r.status, coda_protocol::Status::Error);
        assert!(r.fields["error"].contains("name taken"));
    }

    #[test]
    fn sub_result_carries_summary_fields() {
        let r = sub_result(
            3,
            "SPAWN_CONTEXT",
            "helper",
            Ok(SubReport {
                completed: false,
                summary: "budget exceeded".into(),
                cost_micro: 1_500_000,
                duration_secs: 1.25,
            }),
        );
        assert_eq!(r.fields["completed"], "false");
        assert_eq!(r.fields["cost"], "1500000");
        assert!(r.fields["summary"].contains("budget exceeded"));
    }
}
