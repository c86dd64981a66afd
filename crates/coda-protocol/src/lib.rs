// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Codec for the structured command stream exchanged with the model.
//!
//! The model emits free prose interleaved with commands.  A command is a
//! header line `~coda~ <id> <VERB>` followed by `name: value` argument
//! lines; a value of `~coda~start~` opens a multi-line block terminated by
//! `~coda~end~`.  A payload line that would itself read as the closer is
//! escaped with one extra `~`, stripped on read; the encoder and decoder
//! in this module are exact inverses of each other.

mod parse;
mod result;

pub use parse::{parse, Command, Parsed};
pub use result::{format_results, CommandResult, FormatMode, Status, BULKY_FIELDS};

use std::collections::HashSet;

/// Marker that starts every command header and result header line.
pub const SENTINEL: &str = "~coda~";
/// Argument value that opens a multi-line block.
pub const OPENER: &str = "~coda~start~";
/// Line that closes a multi-line block.
pub const CLOSER: &str = "~coda~end~";

/// Verb that removes another command from the current turn's dispatch set.
pub const CANCEL_VERB: &str = "CANCEL";

/// Returns true when `line` is a closer line, escaped or not: one or more
/// `~` followed by exactly `coda~end~`.
pub(crate) fn is_closer_shaped(line: &str) -> bool {
    let stripped = line.trim_start_matches('~');
    line.len() > stripped.len() && stripped == "coda~end~"
}

/// Collect the ids named by `CANCEL` commands in this turn.
///
/// A `CANCEL` whose `id` argument is missing or non-numeric is ignored.
pub fn cancelled_ids(commands: &[Command]) -> HashSet<u64> {
    commands
        .iter()
        .filter(|c| c.verb == CANCEL_VERB)
        .filter_map(|c| c.args.get("id"))
        .filter_map(|v| v.trim().parse::<u64>().ok())
        .collect()
}

/// Apply pre-dispatch cancellation: drop every `CANCEL` command and every
/// command whose id a `CANCEL` names.  Order of the survivors is preserved.
pub fn effective_commands(commands: Vec<Command>) -> Vec<Command> {
    let cancelled = cancelled_ids(&commands);
    commands
        .into_iter()
        .filter(|c| c.verb != CANCEL_VERB && !cancelled.contains(&c.id))
        .collect()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
