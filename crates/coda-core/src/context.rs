// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! One conversational thread with the model.
//!
//! A context owns its message history, knows its permitted verb set and
//! model, and accounts for cost.  Before every call it injects a system
//! message describing commits that landed since its last call, so that
//! concurrent progress is visible without resending state.  The project
//! guidance file is tracked by content hash and refreshed as a unified
//! diff when it changes.

use std::path::Path;

use anyhow::Context as _;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::debug;

use coda_log::Logger;
use coda_model::{Message, ProgressSink, ToolSchema, Transport, Usage};

use crate::prompts::PromptStore;

/// Name of the project guidance file inside the workspace.
pub const GUIDANCE_FILE: &str = "AGENTS.md";

/// The single tool exposed to the model; its `text` argument carries the
/// command stream.
pub const RESPOND_TOOL: &str = "respond";

/// One conversational unit.
pub struct Context {
    /// Unique within the session; `main` for the main context.
    pub name: String,
    /// Descriptor kind (`main`, `worker`, …).
    pub kind: String,
    pub is_main: bool,
    pub model: String,
    pub messages: Vec<Message>,
    /// Permitted verb set from the descriptor.
    pub tools: Vec<String>,
    /// Budget in micro-units; `None` = unlimited (main context).
    pub budget: Option<i64>,
    /// Cost debited against the budget so far.
    pub spent: i64,
    pub cumulative_cost: i64,
    pub total_tokens: u64,
    last_head: Option<String>,
    guidance_hash: Option<String>,
    guidance: Option<String>,
}

/// The collected result of one model call on a context.
pub struct Turn {
    pub message: Message,
    pub cost_micro: i64,
    pub usage: Usage,
    pub duration_secs: f64,
}

impl Context {
    /// Create a context of the given kind.
    ///
    /// Loads the prompt descriptor (shared preamble first), appends the
    /// subcontext name directive for non-main contexts, picks up the
    /// guidance file, and initialises HEAD tracking against the workspace.
    pub async fn new(
        name: impl Into<String>,
        kind: &str,
        is_main: bool,
        model_override: Option<&str>,
        budget: Option<i64>,
        store: &PromptStore,
        workspace: &Path,
    ) -> anyhow::Result<Self> {
        let name = name.into();
        let descriptor = store.load(kind)?;

        let mut messages = Vec::new();
        if let Some(common) = store.common()? {
            messages.push(Message::system(common));
        }
        messages.push(Message::system(descriptor.system.clone()));

        if !is_main {
            messages.push(Message::system(format!(
                "# Your Context Info\n\nYour unique name: **{name}**\n\n\
                 Use it for guaranteed collision-free scratch files, e.g. \
                 `.scratch/{name}-output.txt`."
            )));
        }

        let model = match model_override {
            Some("auto") | None => descriptor.default_model.clone(),
            Some(m) => m.to_string(),
        };

        let mut ctx = Self {
            name,
            kind: kind.to_string(),
            is_main,
            model,
            messages,
            tools: descriptor.tools,
            budget,
            spent: 0,
            cumulative_cost: 0,
            total_tokens: 0,
            last_head: None,
            guidance_hash: None,
            guidance: None,
        };

        let guidance_path = workspace.join(GUIDANCE_FILE);
        if guidance_path.exists() {
            let content = std::fs::read_to_string(&guidance_path)
                .with_context(|| format!("reading {}", guidance_path.display()))?;
            ctx.messages.push(Message::system(format!(
                "# Project Context ({GUIDANCE_FILE})\n\n{content}"
            )));
            ctx.guidance_hash = Some(content_hash(&content));
            ctx.guidance = Some(content);
        }

        ctx.last_head = Some(coda_vcs::head_commit(workspace).await?);
        Ok(ctx)
    }

    /// Append a message to the history, mirroring it into the log.
    pub fn push(&mut self, logger: &Logger, message: Message) {
        let _ = logger.log(
            &self.name,
            &[
                ("tag", json!("message")),
                ("role", json!(format!("{:?}", message.role).to_lowercase())),
                ("content", json!(message.content.clone().unwrap_or_default())),
                (
                    "tool_calls",
                    serde_json::to_value(&message.tool_calls).unwrap_or(json!([])),
                ),
            ],
        );
        self.messages.push(message);
    }

    pub fn push_user(&mut self, logger: &Logger, text: impl Into<String>) {
        self.push(logger, Message::user(text));
    }

    pub fn push_system(&mut self, logger: &Logger, text: impl Into<String>) {
        self.push(logger, Message::system(text));
    }

    /// Append the tool-result record answering one invocation.
    pub fn push_tool_result(
        &mut self,
        logger: &Logger,
        call_id: &str,
        content: impl Into<String>,
    ) {
        self.push(logger, Message::tool_result(call_id, content));
    }

    /// If the workspace HEAD advanced since the last call on this context,
    /// inject a system message enumerating the new commits and changed
    /// paths, then update the tracked HEAD.
    pub async fn inject_head_delta(
        &mut self,
        workspace: &Path,
        logger: &Logger,
    ) -> anyhow::Result<()> {
        let current = coda_vcs::head_commit(workspace).await?;
        let Some(last) = self.last_head.clone() else {
            self.last_head = Some(current);
            return Ok(());
        };
        if current == last {
            return Ok(());
        }

        let commits = coda_vcs::commits_between(&last, &current, workspace).await?;
        let files = coda_vcs::changed_files_between(&last, &current, workspace).await?;

        if !commits.is_empty() || !files.is_empty() {
            let mut parts = vec![
                "# Repository Updates\n\nThe following changes have been made since you \
                 were last invoked:\n"
                    .to_string(),
            ];
            if !commits.is_empty() {
                parts.push("\n## New Commits\n".to_string());
                for c in &commits {
                    parts.push(format!("- `{}` {}", c.hash, c.subject));
                }
            }
            if !files.is_empty() {
                parts.push("\n\n## Changed Files\n".to_string());
                for f in &files {
                    parts.push(format!("- {f}"));
                }
            }
            self.push_system(logger, parts.join("\n"));
            debug!(context = self.name, commits = commits.len(), "injected HEAD delta");
        }

        self.last_head = Some(current);
        Ok(())
    }

    /// Refresh the guidance file: when its content changed, append a
    /// unified diff of the change and update the tracked content.
    /// Returns whether anything changed.
    pub fn refresh_guidance(&mut self, logger: &Logger, new_content: &str) -> bool {
        if self.guidance_hash.as_deref() == Some(content_hash(new_content)).as_deref() {
            return false;
        }
        let old = self.guidance.clone().unwrap_or_default();
        let diff = similar::TextDiff::from_lines(old.as_str(), new_content)
            .unified_diff()
            .header(
                &format!("{GUIDANCE_FILE} (previous)"),
                &format!("{GUIDANCE_FILE} (current)"),
            )
            .to_string();

        self.push_system(
            logger,
            format!(
                "# {GUIDANCE_FILE} Updated\n\nThe following changes were made to \
                 {GUIDANCE_FILE}:\n\n```diff\n{diff}\n```"
            ),
        );
        self.guidance_hash = Some(content_hash(new_content));
        self.guidance = Some(new_content.to_string());
        true
    }

    /// The single `respond` tool schema for this context.  Subcontexts get
    /// an additional required `rationale` argument.
    pub fn tool_schemas(&self) -> Vec<ToolSchema> {
        let mut properties = json!({
            "text": {
                "type": "string",
                "description": "Your full reply: prose interleaved with ~coda~ commands."
            }
        });
        let mut required = vec!["text"];
        if !self.is_main {
            properties["rationale"] = json!({
                "type": "string",
                "description": "One sentence on why this step moves the subtask forward."
            });
            required.push("rationale");
        }
        vec![ToolSchema {
            name: RESPOND_TOOL.to_string(),
            description: "Deliver your reply. All file operations, shell runs and other \
                          actions are expressed as ~coda~ commands inside `text`."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false
            }),
        }]
    }

    /// Issue one model call with the current history and record the turn.
    ///
    /// The assistant message is appended to the history and the call is
    /// summarised into the log.  Cost is added to the cumulative total and
    /// debited against the budget.
    pub async fn call(
        &mut self,
        transport: &dyn Transport,
        progress: &dyn ProgressSink,
        logger: &Logger,
    ) -> anyhow::Result<Turn> {
        let schemas = self.tool_schemas();
        let started = std::time::Instant::now();
        let completion = transport
            .call(&self.model, &self.messages, &schemas, progress)
            .await?;
        let duration_secs = started.elapsed().as_secs_f64();

        self.cumulative_cost += completion.cost_micro;
        self.spent += completion.cost_micro;
        self.total_tokens += completion.usage.total_tokens();

        let _ = logger.log(
            &self.name,
            &[
                ("tag", json!("llm_call")),
                ("model", json!(self.model)),
                ("cost", json!(completion.cost_micro)),
                ("prompt_tokens", json!(completion.usage.prompt_tokens)),
                ("completion_tokens", json!(completion.usage.completion_tokens)),
                ("duration", json!(duration_secs)),
            ],
        );

        self.push(logger, completion.message.clone());

        Ok(Turn {
            message: completion.message,
            cost_micro: completion.cost_micro,
            usage: completion.usage,
            duration_secs,
        })
    }

    /// Remaining budget, if this context carries one.
    pub fn budget_remaining(&self) -> Option<i64> {
        self.budget.map(|b| b - self.spent)
    }

    /// True once the budget is spent.  Never true for unbudgeted contexts.
    pub fn budget_exhausted(&self) -> bool {
        matches!(self.budget_remaining(), Some(r) if r <= 0)
    }
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Messages with `Role::Assistant` must answer with exactly one tool
/// invocation; return it or the offending count.
pub fn single_invocation(message: &Message) -> Result<&coda_model::ToolInvocation, usize> {
    match message.tool_calls.len() {
        1 => Ok(&message.tool_calls[0]),
        n => Err(n),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
