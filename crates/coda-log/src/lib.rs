// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Append-only per-context session log.
//!
//! One file per context under the session's state directory.  A record is a
//! sequence of `key: value` lines terminated by a blank line.  Values that
//! span lines (or start with `<<<`) are framed as a heredoc whose delimiter
//! is chosen to not appear in the payload; non-string values are
//! JSON-encoded and their key carries a `!` suffix so readers know to
//! decode.  Every record gets a timestamp and a session-wide monotonic
//! sequence number.  The log never rotates or truncates; it is the single
//! source of truth for post-hoc session reconstruction.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::Context;
use serde_json::Value;

/// Default heredoc delimiter; replaced when the payload contains it.
const DEFAULT_DELIMITER: &str = "EOD";

/// One decoded log record: field name → value.  String-typed fields come
/// back as `Value::String`; `!`-flagged fields are decoded JSON.
pub type Record = serde_json::Map<String, Value>;

/// Shared session logger.  All contexts of a session log through the same
/// instance so that sequence numbers are totally ordered across files.
pub struct Logger {
    session_dir: PathBuf,
    seq: AtomicU64,
    files: Mutex<HashMap<String, File>>,
}

impl Logger {
    /// Create a logger rooted at `<session_dir>` (created if missing).
    pub fn new(session_dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let session_dir = session_dir.into();
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("creating log directory {}", session_dir.display()))?;
        Ok(Self {
            session_dir,
            seq: AtomicU64::new(0),
            files: Mutex::new(HashMap::new()),
        })
    }

    fn log_path(&self, context_id: &str) -> PathBuf {
        self.session_dir.join(format!("{context_id}.log"))
    }

    /// Append one record to the given context's log file.
    ///
    /// String values are written verbatim (heredoc-framed when needed);
    /// all other JSON values are encoded and flagged with a `!` key suffix.
    pub fn log(&self, context_id: &str, fields: &[(&str, Value)]) -> anyhow::Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");

        let mut lines = Vec::with_capacity(fields.len() + 2);
        lines.push(format!("timestamp: {timestamp}"));
        lines.push(format!("seq!: {seq}"));
        for (key, value) in fields {
            lines.push(format_field(key, value));
        }

        let mut files = self.files.lock().expect("logger mutex poisoned");
        let file = match files.get_mut(context_id) {
            Some(f) => f,
            None => {
                let f = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.log_path(context_id))
                    .with_context(|| format!("opening log for context {context_id}"))?;
                files.entry(context_id.to_string()).or_insert(f)
            }
        };
        file.write_all(lines.join("\n").as_bytes())?;
        file.write_all(b"\n\n")?;
        Ok(())
    }

    /// Read every record of a context's log back.  Returns an empty list
    /// when the context never logged anything.
    pub fn read(&self, context_id: &str) -> anyhow::Result<Vec<Record>> {
        read_log_file(&self.log_path(context_id))
    }
}

fn format_field(key: &str, value: &Value) -> String {
    match value {
        Value::String(s) => {
            if s.contains('\n') || s.starts_with("<<<") {
                let delimiter = pick_delimiter(s);
                format!("{key}: <<<{delimiter}\n{s}\n{delimiter}")
            } else {
                format!("{key}: {s}")
            }
        }
        other => format!("{key}!: {other}"),
    }
}

/// Pick a heredoc delimiter that does not occur as a full line in `value`.
fn pick_delimiter(value: &str) -> String {
    if !value.lines().any(|l| l == DEFAULT_DELIMITER) {
        return DEFAULT_DELIMITER.to_string();
    }
    // Collision: draw random uppercase/digit strings until one is free.
    loop {
        let candidate: String = uuid::Uuid::new_v4()
            .simple()
            .to_string()
            .to_uppercase()
            .chars()
            .take(10)
            .collect();
        if !value.lines().any(|l| l == candidate) {
            return candidate;
        }
    }
}

/// Parse a log file written by [`Logger::log`] back into records.
pub fn read_log_file(path: &Path) -> anyhow::Result<Vec<Record>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("reading log {}", path.display()))?;

    let mut records = Vec::new();
    let mut current = Record::new();
    let mut lines = content.split('\n').peekable();

    while let Some(line) = lines.next() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }

        let (raw_key, raw_value) = line
            .split_once(": ")
            .with_context(|| format!("malformed log line: {line}"))?;

        let mut value_text = raw_value.to_string();
        if let Some(delimiter) = raw_value.strip_prefix("<<<") {
            // Heredoc: consume lines until the delimiter.
            let mut payload: Vec<&str> = Vec::new();
            for body_line in lines.by_ref() {
                if body_line == delimiter {
                    break;
                }
                payload.push(body_line);
            }
            value_text = payload.join("\n");
        }

        if let Some(key) = raw_key.strip_suffix('!') {
            let decoded: Value = serde_json::from_str(&value_text)
                .with_context(|| format!("undecodable JSON value for key {key}"))?;
            current.insert(key.to_string(), decoded);
        } else {
            current.insert(raw_key.to_string(), Value::String(value_text));
        }
    }

    if !current.is_empty() {
        records.push(current);
    }
    Ok(records)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logger() -> (tempfile::TempDir, Logger) {
        let dir = tempfile::tempdir().unwrap();
        let logger = Logger::new(dir.path().join("1")).unwrap();
        (dir, logger)
    }

    #[test]
    fn simple_record_round_trips() {
        let (_dir, logger) = logger();
        logger
            .log("main", &[("tag", json!("llm_call")), ("model", json!("x/y"))])
            .unwrap();
        let records = logger.read("main").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["tag"], json!("llm_call"));
        assert_eq!(records[0]["model"], json!("x/y"));
    }

    #[test]
    fn non_string_values_are_json_flagged() {
        let (_dir, logger) = logger();
        logger
            .log(
                "main",
                &[
                    ("cost", json!(1500)),
                    ("completed", json!(true)),
                    ("usage", json!({"prompt_tokens": 10})),
                ],
            )
            .unwrap();
        let records = logger.read("main").unwrap();
        assert_eq!(records[0]["cost"], json!(1500));
        assert_eq!(records[0]["completed"], json!(true));
        assert_eq!(records[0]["usage"]["prompt_tokens"], json!(10));
    }

    #[test]
    fn multiline_value_round_trips() {
        let (_dir, logger) = logger();
        let text = "first line\nsecond line\n\nfourth line";
        logger.log("main", &[("output", json!(text))]).unwrap();
        let records = logger.read("main").unwrap();
        assert_eq!(records[0]["output"], json!(text));
    }

    #[test]
    fn value_containing_default_delimiter_round_trips_byte_identical() {
        let (_dir, logger) = logger();
        // The payload contains the default heredoc delimiter on its own
        // line, forcing a random delimiter.
        let text = "start\nEOD\nend";
        logger.log("main", &[("data", json!(text))]).unwrap();
        let records = logger.read("main").unwrap();
        assert_eq!(records[0]["data"], json!(text));
    }

    #[test]
    fn value_starting_with_heredoc_marker_is_framed() {
        let (_dir, logger) = logger();
        let text = "<<<looks like a heredoc";
        logger.log("main", &[("v", json!(text))]).unwrap();
        let records = logger.read("main").unwrap();
        assert_eq!(records[0]["v"], json!(text));
    }

    #[test]
    fn sequence_numbers_are_dense_from_one_across_contexts() {
        let (_dir, logger) = logger();
        logger.log("main", &[("tag", json!("a"))]).unwrap();
        logger.log("helper", &[("tag", json!("b"))]).unwrap();
        logger.log("main", &[("tag", json!("c"))]).unwrap();

        let main = logger.read("main").unwrap();
        let helper = logger.read("helper").unwrap();
        let mut seqs: Vec<i64> = main
            .iter()
            .chain(helper.iter())
            .map(|r| r["seq"].as_i64().unwrap())
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn records_are_separated_and_ordered() {
        let (_dir, logger) = logger();
        logger.log("main", &[("tag", json!("first"))]).unwrap();
        logger.log("main", &[("tag", json!("second"))]).unwrap();
        let records = logger.read("main").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["tag"], json!("first"));
        assert_eq!(records[1]["tag"], json!("second"));
        assert!(records[0]["seq"].as_i64() < records[1]["seq"].as_i64());
    }

    #[test]
    fn reading_unknown_context_yields_empty() {
        let (_dir, logger) = logger();
        assert!(logger.read("ghost").unwrap().is_empty());
    }

    #[test]
    fn timestamp_field_is_present() {
        let (_dir, logger) = logger();
        logger.log("main", &[("tag", json!("x"))]).unwrap();
        let records = logger.read("main").unwrap();
        let ts = records[0]["timestamp"].as_str().unwrap();
        assert_eq!(ts.len(), "2026-01-01 00:00:00".len());
    }

    #[test]
    fn pick_delimiter_prefers_default() {
        assert_eq!(pick_delimiter("no collision here"), "EOD");
    }

    #[test]
    fn pick_delimiter_avoids_collision() {
        let d = pick_delimiter("a\nEOD\nb");
        assert_ne!(d, "EOD");
        assert_eq!(d.len(), 10);
    }
}
