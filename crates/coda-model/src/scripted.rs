// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

use crate::{
    Completion, FunctionCall, Message, ProgressSink, Role, ToolInvocation, ToolSchema, Transport,
    Usage,
};

static CALL_ID: AtomicU64 = AtomicU64::new(1);

/// What one scripted call received, kept for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// Pre-scripted transport: each call pops the next canned completion.
/// Lets tests drive the whole orchestrator without network access.
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Completion>>,
    pub calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedTransport {
    pub fn new(completions: Vec<Completion>) -> Self {
        Self {
            queue: Mutex::new(completions.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Canned assistant turn carrying one `respond` invocation whose `text`
    /// argument is the given command stream.
    pub fn respond(text: &str, cost_micro: i64) -> Completion {
        let id = format!("call_{}", CALL_ID.fetch_add(1, Ordering::Relaxed));
        let arguments = json!({ "text": text }).to_string();
        Completion {
            message: Message {
                role: Role::Assistant,
                content: None,
                tool_calls: vec![ToolInvocation {
                    id,
                    kind: "function".into(),
                    function: FunctionCall {
                        name: "respond".into(),
                        arguments,
                    },
                }],
                tool_call_id: None,
            },
            cost_micro,
            usage: Usage {
                prompt_tokens: 100,
                completion_tokens: 50,
                cost: cost_micro as f64 / 1_000_000.0,
            },
        }
    }

    /// Number of completions not yet consumed.
    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn call(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolSchema],
        _progress: &dyn ProgressSink,
    ) -> anyhow::Result<Completion> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: model.to_string(),
            messages: messages.to_vec(),
            tool_names: tools.iter().map(|t| t.name.clone()).collect(),
        });
        let next = self.queue.lock().unwrap().pop_front();
        match next {
            Some(completion) => Ok(completion),
            None => bail!("scripted responses exhausted"),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NullProgress;

    #[tokio::test]
    async fn pops_completions_in_order_and_records_calls() {
        let t = ScriptedTransport::new(vec![
            ScriptedTransport::respond("~coda~ 1 OUTPUT\ntext: a\n", 100),
            ScriptedTransport::respond("~coda~ 1 OUTPUT\ntext: b\n", 200),
        ]);
        let first = t
            .call("m", &[Message::user("x")], &[], &NullProgress)
            .await
            .unwrap();
        assert_eq!(first.cost_micro, 100);
        let second = t
            .call("m", &[Message::user("y")], &[], &NullProgress)
            .await
            .unwrap();
        assert_eq!(second.cost_micro, 200);
        assert_eq!(t.calls.lock().unwrap().len(), 2);
        assert_eq!(t.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_queue_is_an_error() {
        let t = ScriptedTransport::new(vec![]);
        let err = t
            .call("m", &[Message::user("x")], &[], &NullProgress)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exhausted"));
    }

    #[test]
    fn respond_builds_a_single_tool_call() {
        let c = ScriptedTransport::respond("hello", 1500);
        assert_eq!(c.message.tool_calls.len(), 1);
        assert_eq!(c.message.tool_calls[0].function.name, "respond");
        assert!(c.message.tool_calls[0].function.arguments.contains("hello"));
        assert_eq!(c.cost_micro, 1500);
    }
}
