// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::stream::{drain_sse_data_lines, StreamCollector};
use crate::{
    dollars_to_micro, Completion, Message, ProgressSink, ToolSchema, Transport, TransportError,
};

const ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";
const API_KEY_ENV: &str = "OPENROUTER_API_KEY";
/// Attempts per call; the retry budget is per-call, not global.
const MAX_ATTEMPTS: u32 = 3;

/// Streaming transport against the OpenRouter chat-completion endpoint.
pub struct OpenRouterTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl OpenRouterTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: ENDPOINT.to_string(),
        }
    }

    /// Point the transport at a different endpoint (local test servers).
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    fn api_key(&self) -> anyhow::Result<String> {
        std::env::var(API_KEY_ENV)
            .with_context(|| format!("{API_KEY_ENV} environment variable not set"))
    }

    async fn attempt(
        &self,
        body: &Value,
        api_key: &str,
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<Completion> {
        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", "https://github.com/swedishembedded/coda")
            .header("X-Title", "coda coding assistant")
            .json(body)
            .send()
            .await
            .context("request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("model service error {status}: {text}");
        }

        let mut byte_stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut collector = StreamCollector::new();
        let mut done = false;

        while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.context("streaming read failed")?;
            buf.push_str(&String::from_utf8_lossy(&chunk));
            for data in drain_sse_data_lines(&mut buf) {
                match data {
                    None => {
                        done = true;
                    }
                    Some(payload) => {
                        if let Ok(v) = serde_json::from_str::<Value>(&payload) {
                            collector.apply(&v);
                        }
                    }
                }
            }
            progress.update(&collector.status(), collector.bytes_received());
            if done {
                break;
            }
        }
        progress.done(collector.bytes_received());

        let usage = collector.usage();
        let message = collector.into_message().ok_or_else(|| {
            anyhow!(TransportError::Protocol(
                "response carried neither a message nor any tool calls".into(),
            ))
        })?;

        Ok(Completion {
            message,
            cost_micro: dollars_to_micro(usage.cost),
            usage,
        })
    }
}

impl Default for OpenRouterTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for OpenRouterTransport {
    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        progress: &dyn ProgressSink,
    ) -> anyhow::Result<Completion> {
        if messages.is_empty() {
            bail!(TransportError::Protocol("empty message list".into()));
        }
        let api_key = self.api_key()?;

        let wrapped_tools: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "streamOptions": { "includeUsage": true },
            "usage": { "include": true },
        });
        if !wrapped_tools.is_empty() {
            body["tools"] = json!(wrapped_tools);
            body["tool_choice"] = json!("required");
        }

        debug!(model, message_count = messages.len(), "sending completion request");

        let mut last_error = None;
        for attempt in 1..=MAX_ATTEMPTS {
            match self.attempt(&body, &api_key, progress).await {
                Ok(completion) => return Ok(completion),
                Err(e) => {
                    if e.downcast_ref::<TransportError>().is_some() {
                        // Protocol violations are not retried; the caller
                        // decides what to do.
                        return Err(e);
                    }
                    warn!(attempt, "model call failed: {e:#}");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("model call failed")))
            .with_context(|| format!("model call failed after {MAX_ATTEMPTS} attempts"))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
