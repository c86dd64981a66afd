// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Prompt descriptor loading.
//!
//! A descriptor is a markdown file with a small key/value header block
//! terminated by the first blank line; the remainder is the system
//! directive.  Unknown header keys are an error so drift in descriptor
//! files is caught at load time.

use std::path::PathBuf;

use anyhow::{bail, Context};

/// Kinds compiled into the binary.  A prompt directory can override or
/// extend these.
const BUILTIN_COMMON: &str = include_str!("../prompts/common.md");
const BUILTIN_MAIN: &str = include_str!("../prompts/main.md");
const BUILTIN_WORKER: &str = include_str!("../prompts/worker.md");

/// Parsed prompt descriptor for one context kind.
#[derive(Debug, Clone)]
pub struct PromptDescriptor {
    pub default_model: String,
    /// Permitted verb set, in declaration order.
    pub tools: Vec<String>,
    /// System directive body.
    pub system: String,
}

/// Resolves context kinds to descriptors, from an explicit directory or
/// the compiled-in defaults.
#[derive(Debug, Clone, Default)]
pub struct PromptStore {
    dir: Option<PathBuf>,
}

impl PromptStore {
    /// Use only the compiled-in descriptors.
    pub fn builtin() -> Self {
        Self { dir: None }
    }

    /// Load descriptors from `<dir>/<kind>.md`, with `<dir>/common.md`
    /// prepended to every system directive when present.
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    /// Shared preamble prepended to every context's system directive.
    pub fn common(&self) -> anyhow::Result<Option<String>> {
        match &self.dir {
            Some(dir) => {
                let path = dir.join("common.md");
                if path.exists() {
                    Ok(Some(std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?))
                } else {
                    Ok(None)
                }
            }
            None => Ok(Some(BUILTIN_COMMON.to_string())),
        }
    }

    /// Load and parse the descriptor for a context kind.  A missing
    /// descriptor is a configuration error.
    pub fn load(&self, kind: &str) -> anyhow::Result<PromptDescriptor> {
        let text = match &self.dir {
            Some(dir) => {
                let path = dir.join(format!("{kind}.md"));
                if !path.exists() {
                    bail!("prompt descriptor not found: {}", path.display());
                }
                std::fs::read_to_string(&path)
                    .with_context(|| format!("reading {}", path.display()))?
            }
            None => match kind {
                "main" => BUILTIN_MAIN.to_string(),
                "worker" => BUILTIN_WORKER.to_string(),
                other => bail!("prompt descriptor not found for context kind: {other}"),
            },
        };
        parse_descriptor(&text).with_context(|| format!("in prompt descriptor for kind {kind}"))
    }
}

/// Parse a descriptor: header lines up to the first blank line, then the
/// system directive.
pub fn parse_descriptor(text: &str) -> anyhow::Result<PromptDescriptor> {
    let Some((header, body)) = text.split_once("\n\n") else {
        bail!("descriptor must have a header block separated by a blank line");
    };

    let mut default_model = None;
    let mut tools = Vec::new();

    for line in header.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            bail!("invalid header line: {line}");
        };
        match key.trim() {
            "default_model" => default_model = Some(value.trim().to_string()),
            "tools" => {
                tools = value
                    .split(',')
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect();
            }
            other => bail!("unknown header key: {other}"),
        }
    }

    Ok(PromptDescriptor {
        default_model: default_model.context("descriptor missing default_model header")?,
        tools,
        system: body.to_string(),
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_header_and_body() {
        let d = parse_descriptor(
            "default_model: a/b\ntools: READ, OVERWRITE\n\nYou are a coding assistant.\nBe terse.",
        )
        .unwrap();
        assert_eq!(d.default_model, "a/b");
        assert_eq!(d.tools, vec!["READ", "OVERWRITE"]);
        assert!(d.system.starts_with("You are a coding assistant."));
    }

    #[test]
    fn unknown_header_key_is_an_error() {
        let err = parse_descriptor("default_model: x\nbanana: yes\n\nbody").unwrap_err();
        assert!(err.to_string().contains("unknown header key"));
    }

    #[test]
    fn missing_blank_line_is_an_error() {
        assert!(parse_descriptor("default_model: x").is_err());
    }

    #[test]
    fn missing_default_model_is_an_error() {
        let err = parse_descriptor("tools: READ\n\nbody").unwrap_err();
        assert!(err.to_string().contains("default_model"));
    }

    #[test]
    fn header_line_without_colon_is_an_error() {
        assert!(parse_descriptor("default_model x\n\nbody").is_err());
    }

    #[test]
    fn builtin_descriptors_parse() {
        let store = PromptStore::builtin();
        let main = store.load("main").unwrap();
        assert!(main.tools.iter().any(|t| t == "PROPOSE_MERGE"));
        let worker = store.load("worker").unwrap();
        assert!(worker.tools.iter().any(|t| t == "COMPLETE"));
        assert!(store.common().unwrap().is_some());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let store = PromptStore::builtin();
        assert!(store.load("nonexistent").is_err());
    }

    #[test]
    fn directory_store_loads_custom_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("custom.md"),
            "default_model: test/model\ntools: READ\n\nCustom directive.",
        )
        .unwrap();
        let store = PromptStore::from_dir(dir.path());
        let d = store.load("custom").unwrap();
        assert_eq!(d.default_model, "test/model");
        assert!(store.common().unwrap().is_none());
    }
}
