// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! User interaction surface of the orchestrator.
//!
//! The orchestrator blocks on these calls at its interactive suspension
//! points; the binary implements them on stdin/stdout and tests script
//! them.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;

/// The user's decision at the approval gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Merge into the main branch.
    Approve,
    /// Not satisfied; the feedback becomes the next user turn.
    Reject(String),
    /// Exit now, keeping the workspace for manual review.
    Defer,
}

/// Session statistics shown at the approval gate.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub cost_micro: i64,
    pub total_tokens: u64,
}

#[async_trait]
pub trait Ui: Send + Sync {
    /// Ask the user for the next task.  `None` ends the session.
    async fn task(&self) -> anyhow::Result<Option<String>>;

    /// Ask the user a free-form question on behalf of the model.
    async fn ask(&self, prompt: &str, presets: &[String]) -> anyhow::Result<String>;

    /// Present the model's merge proposal and collect a verdict.
    async fn approve(&self, proposal: &str, stats: &SessionStats) -> anyhow::Result<Verdict>;

    /// Collect the squash commit message, offering the model's proposal
    /// as the default.
    async fn commit_message(&self, default: &str) -> anyhow::Result<String>;

    /// One-way status output.
    fn info(&self, text: &str);
}

/// Scripted UI for tests: queues of canned answers, recorded output.
#[derive(Default)]
pub struct ScriptedUi {
    tasks: Mutex<VecDeque<String>>,
    answers: Mutex<VecDeque<String>>,
    verdicts: Mutex<VecDeque<Verdict>>,
    commit_messages: Mutex<VecDeque<String>>,
    pub output: Mutex<Vec<String>>,
}

impl ScriptedUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_task(&self, task: impl Into<String>) {
        self.tasks.lock().unwrap().push_back(task.into());
    }

    pub fn push_answer(&self, answer: impl Into<String>) {
        self.answers.lock().unwrap().push_back(answer.into());
    }

    pub fn push_verdict(&self, verdict: Verdict) {
        self.verdicts.lock().unwrap().push_back(verdict);
    }

    pub fn push_commit_message(&self, message: impl Into<String>) {
        self.commit_messages.lock().unwrap().push_back(message.into());
    }

    /// Everything printed through `info`, joined for assertions.
    pub fn printed(&self) -> String {
        self.output.lock().unwrap().join("\n")
    }
}

#[async_trait]
impl Ui for ScriptedUi {
    async fn task(&self) -> anyhow::Result<Option<String>> {
        Ok(self.tasks.lock().unwrap().pop_front())
    }

    async fn ask(&self, prompt: &str, _presets: &[String]) -> anyhow::Result<String> {
        match self.answers.lock().unwrap().pop_front() {
            Some(a) => Ok(a),
            None => bail!("scripted UI has no answer for: {prompt}"),
        }
    }

    async fn approve(&self, _proposal: &str, _stats: &SessionStats) -> anyhow::Result<Verdict> {
        match self.verdicts.lock().unwrap().pop_front() {
            Some(v) => Ok(v),
            None => bail!("scripted UI has no verdict queued"),
        }
    }

    async fn commit_message(&self, default: &str) -> anyhow::Result<String> {
        Ok(self
            .commit_messages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| default.to_string()))
    }

    fn info(&self, text: &str) {
        self.output.lock().unwrap().push(text.to_string());
    }
}
