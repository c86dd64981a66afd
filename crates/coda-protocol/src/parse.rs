// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;

use tracing::debug;

use crate::{is_closer_shaped, OPENER, SENTINEL};

/// A parsed element of the model's output: an id-bearing verb with named
/// string arguments (possibly multi-line).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u64,
    pub verb: String,
    pub args: BTreeMap<String, String>,
}

/// Result of parsing one model turn.
#[derive(Debug, Clone, Default)]
pub struct Parsed {
    /// Commands in emission order.
    pub commands: Vec<Command>,
    /// All non-command text, for display and logging.
    pub prose: String,
}

/// Parse commands out of the model's mixed prose/command text.
///
/// A malformed header (missing verb, non-integer id) is demoted back into
/// prose; a malformed argument line (no `:`) inside a command is skipped.
/// An argument block left unterminated at end of input keeps everything
/// collected so far.
pub fn parse(text: &str) -> Parsed {
    let header_prefix = format!("{SENTINEL} ");
    let lines: Vec<&str> = text.split('\n').collect();
    let mut commands = Vec::new();
    let mut prose_lines: Vec<&str> = Vec::new();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let Some(header) = line.strip_prefix(&header_prefix) else {
            prose_lines.push(line);
            i += 1;
            continue;
        };

        // Header is `<id> <verb>`; anything else goes back to prose.
        let mut parts = header.trim().splitn(2, char::is_whitespace);
        let id = parts.next().and_then(|p| p.parse::<u64>().ok());
        let verb = parts.next().map(str::trim).filter(|v| !v.is_empty());
        let (Some(id), Some(verb)) = (id, verb) else {
            debug!(line, "malformed command header demoted to prose");
            prose_lines.push(line);
            i += 1;
            continue;
        };

        let mut args = BTreeMap::new();
        i += 1;

        // Argument lines run until a blank line or the next header.
        while i < lines.len() {
            let arg_line = lines[i];
            if arg_line.trim().is_empty() || arg_line.starts_with(&header_prefix) {
                break;
            }
            let Some((name, value)) = arg_line.split_once(':') else {
                debug!(line = arg_line, "malformed argument line skipped");
                i += 1;
                continue;
            };
            let name = name.trim().to_string();
            let mut value = value.trim().to_string();

            if value == OPENER {
                // Collect until the closer; `i` ends on the line after it,
                // so a directly following argument line is not lost.
                let mut block: Vec<&str> = Vec::new();
                i += 1;
                while i < lines.len() {
                    let content = lines[i];
                    if is_closer_shaped(content) {
                        if content.starts_with("~~") {
                            // Escaped closer: strip exactly one `~`.
                            block.push(&content[1..]);
                            i += 1;
                        } else {
                            i += 1;
                            break;
                        }
                    } else {
                        block.push(content);
                        i += 1;
                    }
                }
                value = block.join("\n");
            } else {
                i += 1;
            }

            args.insert(name, value);
        }

        commands.push(Command {
            id,
            verb: verb.to_string(),
            args,
        });
    }

    Parsed {
        commands,
        prose: prose_lines.join("\n").trim().to_string(),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_command_with_args() {
        let out = parse("~coda~ 1 READ\npath: src/main.rs\n");
        assert_eq!(out.commands.len(), 1);
        let c = &out.commands[0];
        assert_eq!(c.id, 1);
        assert_eq!(c.verb, "READ");
        assert_eq!(c.args["path"], "src/main.rs");
    }

    #[test]
    fn prose_around_commands_is_collected() {
        let text = "Let me look at the file.\n\n~coda~ 1 READ\npath: a.txt\n\nDone thinking.";
        let out = parse(text);
        assert_eq!(out.commands.len(), 1);
        assert!(out.prose.contains("Let me look at the file."));
        assert!(out.prose.contains("Done thinking."));
    }

    #[test]
    fn multiple_commands_in_order() {
        let text = "~coda~ 1 READ\npath: a\n\n~coda~ 2 READ\npath: b\n";
        let out = parse(text);
        assert_eq!(out.commands.len(), 2);
        assert_eq!(out.commands[0].id, 1);
        assert_eq!(out.commands[1].id, 2);
    }

    #[test]
    fn back_to_back_headers_terminate_arguments() {
        // No blank line between commands: the second header ends the first.
        let text = "~coda~ 1 READ\npath: a\n~coda~ 2 READ\npath: b\n";
        let out = parse(text);
        assert_eq!(out.commands.len(), 2);
        assert_eq!(out.commands[0].args["path"], "a");
        assert_eq!(out.commands[1].args["path"], "b");
    }

    #[test]
    fn non_integer_id_is_demoted_to_prose() {
        let out = parse("~coda~ one READ\npath: a\n");
        assert!(out.commands.is_empty());
        assert!(out.prose.contains("~coda~ one READ"));
    }

    #[test]
    fn missing_verb_is_demoted_to_prose() {
        let out = parse("~coda~ 1\nstatus: success\n");
        assert!(out.commands.is_empty());
        assert!(out.prose.contains("~coda~ 1"));
    }

    #[test]
    fn malformed_argument_line_is_skipped() {
        let out = parse("~coda~ 1 READ\nthis line has no separator\npath: a\n");
        assert_eq!(out.commands.len(), 1);
        assert_eq!(out.commands[0].args.len(), 1);
        assert_eq!(out.commands[0].args["path"], "a");
    }

    #[test]
    fn multiline_value_is_collected() {
        let text = "~coda~ 1 OVERWRITE\npath: hello.txt\ncontent: ~coda~start~\nHello, World!\n\n~coda~end~\n";
        let out = parse(text);
        assert_eq!(out.commands[0].args["content"], "Hello, World!\n");
    }

    #[test]
    fn argument_line_directly_after_a_block_is_kept() {
        let text = "~coda~ 1 UPDATE\npath: a.txt\nsearch: ~coda~start~\nold\n~coda~end~\nreplace: ~coda~start~\nnew\n~coda~end~\n";
        let out = parse(text);
        let c = &out.commands[0];
        assert_eq!(c.args["search"], "old");
        assert_eq!(c.args["replace"], "new");
        assert_eq!(c.args["path"], "a.txt");
    }

    #[test]
    fn escaped_closer_inside_block_is_unescaped() {
        let text =
            "~coda~ 1 OVERWRITE\npath: a\ncontent: ~coda~start~\nbefore\n~~coda~end~\nafter\n~coda~end~\n";
        let out = parse(text);
        assert_eq!(out.commands[0].args["content"], "before\n~coda~end~\nafter");
    }

    #[test]
    fn doubly_escaped_closer_strips_exactly_one_tilde() {
        let text = "~coda~ 1 X\nv: ~coda~start~\n~~~coda~end~\n~coda~end~\n";
        let out = parse(text);
        assert_eq!(out.commands[0].args["v"], "~~coda~end~");
    }

    #[test]
    fn unterminated_block_keeps_collected_lines() {
        let text = "~coda~ 1 X\nv: ~coda~start~\nline one\nline two";
        let out = parse(text);
        assert_eq!(out.commands[0].args["v"], "line one\nline two");
    }

    #[test]
    fn blank_lines_inside_block_are_preserved() {
        let text = "~coda~ 1 X\nv: ~coda~start~\na\n\nb\n~coda~end~\n";
        let out = parse(text);
        assert_eq!(out.commands[0].args["v"], "a\n\nb");
    }

    #[test]
    fn empty_input_yields_nothing() {
        let out = parse("");
        assert!(out.commands.is_empty());
        assert!(out.prose.is_empty());
    }
}
