// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! File operations inside the workspace.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

use coda_protocol::{Command, CommandResult};

use super::{opt, req, ArgSpec, Dispatch, Handler, ToolCtx};

/// Directories never listed, searched, or read through the tools.
const HIDDEN_DIRS: [&str; 3] = [".git", ".coda", ".scratch"];

/// Upper bound on reported search matches.
const MAX_MATCHES: usize = 200;

/// Resolve `rel` against the workspace and reject anything that escapes
/// it, either lexically (`..`) or through a symlink.
pub fn check_path(workspace: &Path, rel: &str) -> Result<PathBuf, String> {
    let ws = workspace
        .canonicalize()
        .map_err(|e| format!("cannot resolve workspace: {e}"))?;

    let mut resolved = ws.clone();
    for comp in Path::new(rel).components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                if !resolved.pop() || !resolved.starts_with(&ws) {
                    return Err(format!("path escapes the workspace: {rel}"));
                }
            }
            Component::Normal(c) => resolved.push(c),
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("absolute paths are not allowed: {rel}"));
            }
        }
    }

    // A symlink inside the workspace may still point outside of it.
    if resolved.exists() {
        let canon = resolved
            .canonicalize()
            .map_err(|e| format!("cannot resolve path {rel}: {e}"))?;
        if !canon.starts_with(&ws) {
            return Err(format!("path resolves outside the workspace: {rel}"));
        }
    }
    Ok(resolved)
}

fn workspace_files(workspace: &Path) -> impl Iterator<Item = PathBuf> + '_ {
    WalkDir::new(workspace)
        .into_iter()
        .filter_entry(|e| {
            e.file_name()
                .to_str()
                .map(|n| !HIDDEN_DIRS.contains(&n))
                .unwrap_or(true)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(move |e| {
            e.path()
                .strip_prefix(workspace)
                .ok()
                .map(Path::to_path_buf)
        })
}

// ─── READ ────────────────────────────────────────────────────────────────────

pub struct ReadTool;

#[async_trait]
impl Handler for ReadTool {
    fn verb(&self) -> &'static str {
        "READ"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 1] = [req("path")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let rel = &cmd.args["path"];
        let path = match check_path(ctx.workspace, rel) {
            Ok(p) => p,
            Err(e) => return Dispatch::Done(CommandResult::error(cmd.id, "READ", e)),
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => Dispatch::Done(
                CommandResult::success(cmd.id, "READ")
                    .field("path", rel)
                    .field("content", content),
            ),
            Err(e) => Dispatch::Done(CommandResult::error(
                cmd.id,
                "READ",
                format!("cannot read {rel}: {e}"),
            )),
        }
    }
}

// ─── OVERWRITE ───────────────────────────────────────────────────────────────

pub struct OverwriteTool;

#[async_trait]
impl Handler for OverwriteTool {
    fn verb(&self) -> &'static str {
        "OVERWRITE"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 2] = [req("path"), req("content")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let rel = &cmd.args["path"];
        let path = match check_path(ctx.workspace, rel) {
            Ok(p) => p,
            Err(e) => return Dispatch::Done(CommandResult::error(cmd.id, "OVERWRITE", e)),
        };
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return Dispatch::Done(CommandResult::error(
                    cmd.id,
                    "OVERWRITE",
                    format!("cannot create parent directory for {rel}: {e}"),
                ));
            }
        }
        match std::fs::write(&path, &cmd.args["content"]) {
            Ok(()) => Dispatch::Done(CommandResult::success(cmd.id, "OVERWRITE").field("path", rel)),
            Err(e) => Dispatch::Done(CommandResult::error(
                cmd.id,
                "OVERWRITE",
                format!("cannot write {rel}: {e}"),
            )),
        }
    }
}

// ─── UPDATE ──────────────────────────────────────────────────────────────────

pub struct UpdateTool;

#[async_trait]
impl Handler for UpdateTool {
    fn verb(&self) -> &'static str {
        "UPDATE"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 3] = [req("path"), req("search"), req("replace")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let rel = &cmd.args["path"];
        let path = match check_path(ctx.workspace, rel) {
            Ok(p) => p,
            Err(e) => return Dispatch::Done(CommandResult::error(cmd.id, "UPDATE", e)),
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                return Dispatch::Done(CommandResult::error(
                    cmd.id,
                    "UPDATE",
                    format!("cannot read {rel}: {e}"),
                ))
            }
        };

        let search = &cmd.args["search"];
        let matches = content.matches(search.as_str()).count();
        if matches == 0 {
            return Dispatch::Done(CommandResult::error(
                cmd.id,
                "UPDATE",
                format!("search text not found in {rel}"),
            ));
        }
        if matches > 1 {
            return Dispatch::Done(CommandResult::error(
                cmd.id,
                "UPDATE",
                format!(
                    "search text is not unique in {rel} ({matches} matches); \
                     extend it with surrounding lines"
                ),
            ));
        }

        let updated = content.replacen(search.as_str(), cmd.args["replace"].as_str(), 1);
        match std::fs::write(&path, updated) {
            Ok(()) => Dispatch::Done(CommandResult::success(cmd.id, "UPDATE").field("path", rel)),
            Err(e) => Dispatch::Done(CommandResult::error(
                cmd.id,
                "UPDATE",
                format!("cannot write {rel}: {e}"),
            )),
        }
    }
}

// ─── LIST_FILES ──────────────────────────────────────────────────────────────

pub struct ListFilesTool;

#[async_trait]
impl Handler for ListFilesTool {
    fn verb(&self) -> &'static str {
        "LIST_FILES"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 1] = [opt("include")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let include = cmd.args.get("include").map(String::as_str).unwrap_or("");
        let mut files: Vec<String> = workspace_files(ctx.workspace)
            .map(|p| p.display().to_string())
            .filter(|p| include.is_empty() || include == "*" || p.contains(include))
            .collect();
        files.sort();
        let total = files.len();
        Dispatch::Done(
            CommandResult::success(cmd.id, "LIST_FILES")
                .field("total_count", total.to_string())
                .field("files", files.join("\n")),
        )
    }
}

// ─── SEARCH ──────────────────────────────────────────────────────────────────

pub struct SearchTool;

#[async_trait]
impl Handler for SearchTool {
    fn verb(&self) -> &'static str {
        "SEARCH"
    }
    fn args(&self) -> &'static [ArgSpec] {
        const ARGS: [ArgSpec; 2] = [req("pattern"), opt("include")];
        &ARGS
    }
    async fn dispatch(&self, ctx: &ToolCtx<'_>, cmd: &Command) -> Dispatch {
        let pattern = match regex::Regex::new(&cmd.args["pattern"]) {
            Ok(p) => p,
            Err(e) => {
                return Dispatch::Done(CommandResult::error(
                    cmd.id,
                    "SEARCH",
                    format!("invalid pattern: {e}"),
                ))
            }
        };
        let include = cmd.args.get("include").map(String::as_str).unwrap_or("");

        let mut matches = Vec::new();
        let mut total = 0usize;
        for rel in workspace_files(ctx.workspace) {
            let rel_str = rel.display().to_string();
            if !include.is_empty() && include != "*" && !rel_str.contains(include) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(ctx.workspace.join(&rel)) else {
                continue; // binary or unreadable
            };
            for (lineno, line) in content.lines().enumerate() {
                if pattern.is_match(line) {
                    total += 1;
                    if matches.len() < MAX_MATCHES {
                        matches.push(format!("{rel_str}:{}: {line}", lineno + 1));
                    }
                }
            }
        }

        Dispatch::Done(
            CommandResult::success(cmd.id, "SEARCH")
                .field("total_count", total.to_string())
                .field("matches", matches.join("\n")),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::ScriptedUi;
    use coda_protocol::Status;
    use coda_sandbox::Sandbox;
    use std::collections::BTreeMap;

    fn cmd(verb: &str, args: &[(&str, &str)]) -> Command {
        Command {
            id: 1,
            verb: verb.into(),
            args: args
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    async fn run(dir: &Path, command: Command) -> CommandResult {
        let registry = super::super::Registry::builtin();
        let sandbox = Sandbox::new();
        let ui = ScriptedUi::new();
        let ctx = ToolCtx {
            workspace: dir,
            repo_root: dir,
            sandbox: &sandbox,
            ui: &ui,
        };
        match registry.dispatch(&ctx, &command).await {
            Dispatch::Done(r) => r,
            other => panic!("expected Done, got {other:?}"),
        }
    }

    // ── check_path ────────────────────────────────────────────────────────────

    #[test]
    fn check_path_accepts_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = check_path(dir.path(), "src/lib.rs").unwrap();
        assert!(p.ends_with("src/lib.rs"));
    }

    #[test]
    fn check_path_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(check_path(dir.path(), "../outside.txt").is_err());
        assert!(check_path(dir.path(), "a/../../outside.txt").is_err());
        assert!(check_path(dir.path(), "/etc/passwd").is_err());
    }

    #[test]
    fn check_path_allows_internal_dotdot() {
        let dir = tempfile::tempdir().unwrap();
        let p = check_path(dir.path(), "a/../b.txt").unwrap();
        assert!(p.ends_with("b.txt"));
    }

    // ── READ / OVERWRITE / UPDATE ─────────────────────────────────────────────

    #[tokio::test]
    async fn overwrite_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let r = run(
            dir.path(),
            cmd("OVERWRITE", &[("path", "hello.txt"), ("content", "Hello, World!\n")]),
        )
        .await;
        assert_eq!(r.status, Status::Success);

        let r = run(dir.path(), cmd("READ", &[("path", "hello.txt")])).await;
        assert_eq!(r.status, Status::Success);
        assert_eq!(r.fields["content"], "Hello, World!\n");
    }

    #[tokio::test]
    async fn overwrite_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let r = run(
            dir.path(),
            cmd("OVERWRITE", &[("path", "deep/nested/file.txt"), ("content", "x")]),
        )
        .await;
        assert_eq!(r.status, Status::Success);
        assert!(dir.path().join("deep/nested/file.txt").exists());
    }

    #[tokio::test]
    async fn read_missing_file_is_a_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = run(dir.path(), cmd("READ", &[("path", "ghost.txt")])).await;
        assert_eq!(r.status, Status::Error);
        assert!(r.fields["error"].contains("ghost.txt"));
    }

    #[tokio::test]
    async fn update_replaces_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.md"), "# Test Project\n").unwrap();
        let r = run(
            dir.path(),
            cmd(
                "UPDATE",
                &[
                    ("path", "README.md"),
                    ("search", "# Test Project\n"),
                    ("replace", "# Test Project\n\nThis is a test.\n"),
                ],
            ),
        )
        .await;
        assert_eq!(r.status, Status::Success);
        let content = std::fs::read_to_string(dir.path().join("README.md")).unwrap();
        assert_eq!(content, "# Test Project\n\nThis is a test.\n");
    }

    #[tokio::test]
    async fn update_rejects_missing_search_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "content\n").unwrap();
        let r = run(
            dir.path(),
            cmd("UPDATE", &[("path", "a.txt"), ("search", "absent"), ("replace", "x")]),
        )
        .await;
        assert_eq!(r.status, Status::Error);
        assert!(r.fields["error"].contains("not found"));
    }

    #[tokio::test]
    async fn update_rejects_ambiguous_search_text() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "dup\ndup\n").unwrap();
        let r = run(
            dir.path(),
            cmd("UPDATE", &[("path", "a.txt"), ("search", "dup\n"), ("replace", "x\n")]),
        )
        .await;
        assert_eq!(r.status, Status::Error);
        assert!(r.fields["error"].contains("not unique"));
    }

    // ── LIST_FILES / SEARCH ───────────────────────────────────────────────────

    #[tokio::test]
    async fn list_files_skips_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("visible.txt"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join(".scratch")).unwrap();
        std::fs::write(dir.path().join(".scratch/tmp"), "x").unwrap();

        let r = run(dir.path(), cmd("LIST_FILES", &[])).await;
        assert_eq!(r.fields["total_count"], "1");
        assert_eq!(r.fields["files"], "visible.txt");
    }

    #[tokio::test]
    async fn search_reports_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "one\ntwo needle\nthree\n").unwrap();
        let r = run(dir.path(), cmd("SEARCH", &[("pattern", "needle")])).await;
        assert_eq!(r.fields["total_count"], "1");
        assert!(r.fields["matches"].contains("a.txt:2: two needle"));
    }

    #[tokio::test]
    async fn search_with_invalid_regex_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let r = run(dir.path(), cmd("SEARCH", &[("pattern", "([")])).await;
        assert_eq!(r.status, Status::Error);
    }
}
