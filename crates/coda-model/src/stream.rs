// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Incremental accumulation of a streamed chat-completion response.
//!
//! SSE events can be split across TCP packets, so complete `data:` lines
//! are drained out of a carry-over buffer.  While tool-call argument JSON
//! streams in, a best-effort scan of the partial document yields the field
//! currently being produced, which the UI shows as live status.

use serde_json::Value;

use crate::types::{FunctionCall, Message, Role, ToolInvocation, Usage};

/// Drain all complete `\n`-terminated lines from `buf`, returning the
/// payloads of `data:` lines.  A trailing incomplete line stays in the
/// buffer for the next chunk.  `[DONE]` terminates the logical stream and
/// is returned as `None` in the last position.
pub(crate) fn drain_sse_data_lines(buf: &mut String) -> Vec<Option<String>> {
    let mut out = Vec::new();
    while let Some(nl) = buf.find('\n') {
        let line = buf[..nl].trim_end_matches('\r').trim().to_string();
        *buf = buf[nl + 1..].to_string();
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(data) = line.strip_prefix("data: ") {
            if data == "[DONE]" {
                out.push(None);
            } else {
                out.push(Some(data.to_string()));
            }
        }
    }
    out
}

/// Accumulates content and incremental tool-call fragments from SSE chunks.
#[derive(Default)]
pub(crate) struct StreamCollector {
    content: Option<String>,
    tool_calls: Vec<ToolInvocation>,
    usage: Option<Usage>,
    partial_args: String,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one parsed `data:` JSON object.
    pub fn apply(&mut self, v: &Value) {
        let delta = &v["choices"][0]["delta"];

        if let Some(text) = delta["content"].as_str() {
            self.content.get_or_insert_with(String::new).push_str(text);
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for tc in calls {
                let idx = tc["index"].as_u64().unwrap_or(0) as usize;
                while self.tool_calls.len() <= idx {
                    self.tool_calls.push(ToolInvocation {
                        id: String::new(),
                        kind: "function".into(),
                        function: FunctionCall {
                            name: String::new(),
                            arguments: String::new(),
                        },
                    });
                }
                let slot = &mut self.tool_calls[idx];
                if let Some(id) = tc["id"].as_str() {
                    slot.id = id.to_string();
                }
                if let Some(kind) = tc["type"].as_str() {
                    slot.kind = kind.to_string();
                }
                if let Some(name) = tc["function"]["name"].as_str() {
                    slot.function.name = name.to_string();
                }
                if let Some(args) = tc["function"]["arguments"].as_str() {
                    slot.function.arguments.push_str(args);
                    self.partial_args = slot.function.arguments.clone();
                }
            }
        }

        if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
            if let Ok(u) = serde_json::from_value::<Usage>(usage.clone()) {
                self.usage = Some(u);
            }
        }
    }

    /// Human-readable description of what is currently streaming.
    pub fn status(&self) -> String {
        if self.partial_args.is_empty() {
            return "receiving".to_string();
        }
        match current_json_path(&self.partial_args).first() {
            Some(field) => format!("receiving {}", field.replace('_', " ")),
            None => "receiving".to_string(),
        }
    }

    pub fn bytes_received(&self) -> usize {
        self.partial_args.len()
    }

    pub fn usage(&self) -> Usage {
        self.usage.clone().unwrap_or_default()
    }

    /// Finish the stream.  Returns `None` when nothing at all arrived.
    pub fn into_message(self) -> Option<Message> {
        if self.content.is_none() && self.tool_calls.is_empty() {
            return None;
        }
        // Empty accumulated content means "tool calls only" on the wire.
        let content = self.content.filter(|c| !c.is_empty());
        Some(Message {
            role: Role::Assistant,
            content,
            tool_calls: self.tool_calls,
            tool_call_id: None,
        })
    }
}

/// Scan a truncated JSON document and return the path of open object keys
/// and array indices leading to the point where it breaks off.  The first
/// element is the outermost field currently being produced.
pub(crate) fn current_json_path(json: &str) -> Vec<String> {
    #[derive(Debug)]
    enum Frame {
        Obj(String),
        Arr(usize),
    }

    let b = json.as_bytes();
    let mut stack: Vec<Frame> = Vec::new();
    let mut i = 0usize;

    while i < b.len() {
        while i < b.len() && b[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= b.len() {
            break;
        }

        match b[i] {
            b'"' => {
                let start = i;
                i += 1;
                while i < b.len() && b[i] != b'"' {
                    i += if b[i] == b'\\' { 2 } else { 1 };
                }
                if i >= b.len() {
                    break; // string still streaming
                }
                i += 1;
                // A string followed by `:` is a key; otherwise it is a value.
                let mut j = i;
                while j < b.len() && b[j].is_ascii_whitespace() {
                    j += 1;
                }
                if j < b.len() && b[j] == b':' {
                    let key = json[start + 1..i - 1]
                        .replace("\\\"", "\"")
                        .replace("\\\\", "\\");
                    stack.push(Frame::Obj(key));
                    i = j + 1;
                } else if matches!(stack.last(), Some(Frame::Obj(_))) {
                    stack.pop();
                }
            }
            b'{' => i += 1,
            b'[' => {
                stack.push(Frame::Arr(0));
                i += 1;
            }
            b']' => {
                if matches!(stack.last(), Some(Frame::Arr(_))) {
                    stack.pop();
                }
                i += 1;
            }
            b'}' => {
                if matches!(stack.last(), Some(Frame::Obj(_))) {
                    stack.pop();
                }
                i += 1;
            }
            b',' => {
                match stack.last_mut() {
                    Some(Frame::Arr(n)) => *n += 1,
                    Some(Frame::Obj(_)) => {
                        stack.pop();
                    }
                    None => {}
                }
                i += 1;
            }
            b'-' | b'0'..=b'9' => {
                i += 1;
                while i < b.len()
                    && (b[i].is_ascii_digit()
                        || matches!(b[i], b'.' | b'e' | b'E' | b'+' | b'-'))
                {
                    i += 1;
                }
                if i < b.len() {
                    if let Some(Frame::Obj(_)) = stack.last() {
                        stack.pop();
                    }
                }
            }
            _ => {
                if b[i..].starts_with(b"true") || b[i..].starts_with(b"null") {
                    i += 4;
                    if let Some(Frame::Obj(_)) = stack.last() {
                        stack.pop();
                    }
                } else if b[i..].starts_with(b"false") {
                    i += 5;
                    if let Some(Frame::Obj(_)) = stack.last() {
                        stack.pop();
                    }
                } else {
                    i += 1;
                }
            }
        }
    }

    stack
        .into_iter()
        .map(|f| match f {
            Frame::Obj(k) => k,
            Frame::Arr(n) => n.to_string(),
        })
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── SSE line draining ─────────────────────────────────────────────────────

    #[test]
    fn complete_lines_are_drained_incomplete_kept() {
        let mut buf = "data: {\"a\":1}\ndata: {\"b\"".to_string();
        let lines = drain_sse_data_lines(&mut buf);
        assert_eq!(lines, vec![Some("{\"a\":1}".to_string())]);
        assert_eq!(buf, "data: {\"b\"");
    }

    #[test]
    fn done_marker_yields_none() {
        let mut buf = "data: [DONE]\n".to_string();
        let lines = drain_sse_data_lines(&mut buf);
        assert_eq!(lines, vec![None]);
    }

    #[test]
    fn comments_and_blanks_are_skipped() {
        let mut buf = ": keep-alive\n\ndata: {}\n".to_string();
        let lines = drain_sse_data_lines(&mut buf);
        assert_eq!(lines, vec![Some("{}".to_string())]);
    }

    #[test]
    fn crlf_line_endings_are_handled() {
        let mut buf = "data: {\"x\":1}\r\n".to_string();
        let lines = drain_sse_data_lines(&mut buf);
        assert_eq!(lines, vec![Some("{\"x\":1}".to_string())]);
    }

    // ── Collector ─────────────────────────────────────────────────────────────

    #[test]
    fn collects_content_deltas() {
        let mut c = StreamCollector::new();
        c.apply(&json!({"choices": [{"delta": {"content": "Hel"}}]}));
        c.apply(&json!({"choices": [{"delta": {"content": "lo"}}]}));
        let m = c.into_message().unwrap();
        assert_eq!(m.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn collects_tool_call_fragments_across_chunks() {
        let mut c = StreamCollector::new();
        c.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "call_1", "type": "function",
             "function": {"name": "respond", "arguments": "{\"te"}}
        ]}}]}));
        c.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "xt\":\"hi\"}"}}
        ]}}]}));
        let m = c.into_message().unwrap();
        assert_eq!(m.tool_calls.len(), 1);
        assert_eq!(m.tool_calls[0].id, "call_1");
        assert_eq!(m.tool_calls[0].function.name, "respond");
        assert_eq!(m.tool_calls[0].function.arguments, "{\"text\":\"hi\"}");
    }

    #[test]
    fn usage_chunk_is_captured() {
        let mut c = StreamCollector::new();
        c.apply(&json!({"choices": [{"delta": {}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "cost": 0.002}}));
        let u = c.usage();
        assert_eq!(u.prompt_tokens, 10);
        assert_eq!(u.cost, 0.002);
    }

    #[test]
    fn empty_stream_yields_no_message() {
        let c = StreamCollector::new();
        assert!(c.into_message().is_none());
    }

    #[test]
    fn empty_content_with_tool_calls_is_dropped_to_none() {
        let mut c = StreamCollector::new();
        c.apply(&json!({"choices": [{"delta": {"content": ""}}]}));
        c.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "id": "c", "function": {"name": "respond", "arguments": "{}"}}
        ]}}]}));
        let m = c.into_message().unwrap();
        assert!(m.content.is_none());
        assert_eq!(m.tool_calls.len(), 1);
    }

    // ── Partial-JSON path scan ────────────────────────────────────────────────

    #[test]
    fn path_of_string_value_in_progress() {
        let path = current_json_path("{\"text\": \"some unfinished valu");
        assert_eq!(path, vec!["text"]);
    }

    #[test]
    fn path_of_nested_object() {
        let path = current_json_path("{\"outer\": {\"inner\": \"abc");
        assert_eq!(path, vec!["outer", "inner"]);
    }

    #[test]
    fn completed_value_pops_the_key() {
        let path = current_json_path("{\"done\": \"value\", \"next\": \"par");
        assert_eq!(path, vec!["next"]);
    }

    #[test]
    fn array_indices_appear_in_path() {
        let path = current_json_path("{\"items\": [\"a\", \"b\", \"c");
        assert_eq!(path, vec!["items", "2"]);
    }

    #[test]
    fn number_value_in_progress_keeps_key() {
        // The number may still be streaming, so the key stays open.
        let path = current_json_path("{\"count\": 123");
        assert_eq!(path, vec!["count"]);
    }

    #[test]
    fn complete_document_has_empty_path() {
        let path = current_json_path("{\"a\": 1, \"b\": \"x\"}");
        assert!(path.is_empty());
    }

    #[test]
    fn status_names_the_streaming_field() {
        let mut c = StreamCollector::new();
        c.apply(&json!({"choices": [{"delta": {"tool_calls": [
            {"index": 0, "function": {"arguments": "{\"file_content\": \"par"}}
        ]}}]}));
        assert_eq!(c.status(), "receiving file content");
    }

    #[test]
    fn status_is_generic_before_arguments() {
        let c = StreamCollector::new();
        assert_eq!(c.status(), "receiving");
    }
}
