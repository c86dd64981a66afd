// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Transport layer for the chat-completion model service.
//!
//! Issues streaming requests against an OpenAI-compatible endpoint,
//! accumulates the incremental fragments, reports live progress, converts
//! the reported dollar cost to integer micro-units, and enforces the
//! per-call retry policy.  A scripted driver provides deterministic
//! responses for tests.

mod openrouter;
mod scripted;
mod stream;
mod types;

pub use openrouter::OpenRouterTransport;
pub use scripted::{RecordedCall, ScriptedTransport};
pub use types::{
    Completion, FunctionCall, Message, Role, ToolInvocation, ToolSchema, Usage,
};

use async_trait::async_trait;

/// Typed transport failures that callers must be able to distinguish from
/// ordinary retryable trouble.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The exchange violated the protocol contract (empty message list,
    /// a response with neither content nor tool calls).  Never retried.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Receives live status while a response streams in.
///
/// `status` is a short human-readable phrase such as `receiving content`,
/// derived from a best-effort scan of the partial tool-call argument JSON;
/// `bytes` is the number of argument bytes received so far.
pub trait ProgressSink: Send + Sync {
    fn update(&self, status: &str, bytes: usize);
    /// Called once when the stream has finished.
    fn done(&self, bytes: usize) {
        let _ = bytes;
    }
}

/// A sink that discards all progress.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn update(&self, _status: &str, _bytes: usize) {}
}

/// A chat-completion transport.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue one completion call.  Retries are internal to the driver;
    /// when they are exhausted the error carries the last diagnostic.
    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<Completion>;
}

/// Convert a dollar amount reported by the service into integer
/// micro-units of cost.
pub fn dollars_to_micro(dollars: f64) -> i64 {
    (dollars * 1_000_000.0).round() as i64
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
