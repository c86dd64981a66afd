// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::fmt;

use crate::{is_closer_shaped, Command, CLOSER, OPENER, SENTINEL};

/// Fields whose payloads are replaced by `OMITTED` in long-term mode.
/// These carry the bulky data (file contents, search matches, command
/// output) that a memory snapshot keeps only as metadata.
pub const BULKY_FIELDS: [&str; 5] = ["content", "data", "output", "matches", "results"];

const OMITTED: &str = "OMITTED";

/// Outcome status of one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Success,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "success"),
            Status::Error => write!(f, "error"),
        }
    }
}

/// The structured reply for one dispatched command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub id: u64,
    pub verb: String,
    pub status: Status,
    pub fields: BTreeMap<String, String>,
}

impl CommandResult {
    pub fn success(id: u64, verb: impl Into<String>) -> Self {
        Self {
            id,
            verb: verb.into(),
            status: Status::Success,
            fields: BTreeMap::new(),
        }
    }

    /// Error result with the diagnostic under the `error` field.
    pub fn error(id: u64, verb: impl Into<String>, message: impl Into<String>) -> Self {
        let mut r = Self {
            id,
            verb: verb.into(),
            status: Status::Error,
            fields: BTreeMap::new(),
        };
        r.fields.insert("error".into(), message.into());
        r
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// How much of each result survives formatting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMode {
    /// Everything, verbatim.
    Normal,
    /// Bulky fields replaced by the omission sentinel; metadata kept.
    LongTerm,
}

/// Format results back into command-stream text for the model.
///
/// Each result becomes `~coda~ <id> <verb>`, a `status:` line, and one
/// line per field.  Multi-line values are framed with the opener/closer;
/// payload lines that would read as the closer are escaped with one `~`.
/// The output parses back to the same set of commands.
pub fn format_results(results: &[CommandResult], mode: FormatMode) -> String {
    let mut lines: Vec<String> = Vec::new();

    for result in results {
        lines.push(format!("{SENTINEL} {} {}", result.id, result.verb));
        lines.push(format!("status: {}", result.status));

        for (key, value) in &result.fields {
            if mode == FormatMode::LongTerm && BULKY_FIELDS.contains(&key.as_str()) {
                lines.push(format!("{key}: {OMITTED}"));
                continue;
            }
            // A single-line value equal to the opener must be framed too,
            // or it would open a block on re-parse.
            if value.contains('\n') || value == OPENER {
                lines.push(format!("{key}: {OPENER}"));
                for payload in value.split('\n') {
                    if is_closer_shaped(payload) {
                        lines.push(format!("~{payload}"));
                    } else {
                        lines.push(payload.to_string());
                    }
                }
                lines.push(CLOSER.to_string());
            } else {
                lines.push(format!("{key}: {value}"));
            }
        }

        lines.push(String::new());
    }

    lines.join("\n")
}

impl CommandResult {
    /// View of this result as the command the formatter's output parses to.
    pub fn as_command(&self) -> Command {
        let mut args = self.fields.clone();
        args.insert("status".into(), self.status.to_string());
        Command {
            id: self.id,
            verb: self.verb.clone(),
            args,
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
