// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};
use std::process::Output;

use anyhow::{bail, Context};
use tokio::process::Command;
use tracing::debug;

/// Run a git command in `cwd`, failing with the child's stderr when the
/// exit status is non-zero.
pub(crate) async fn git(args: &[&str], cwd: &Path) -> anyhow::Result<Output> {
    let output = git_unchecked(args, cwd).await?;
    if !output.status.success() {
        bail!(
            "git {} failed in {}: {}",
            args.join(" "),
            cwd.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

/// Run a git command without checking the exit status.  Only spawn/wait
/// failures are errors.
pub(crate) async fn git_unchecked(args: &[&str], cwd: &Path) -> anyhow::Result<Output> {
    debug!(cwd = %cwd.display(), args = ?args, "running git");
    Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .await
        .with_context(|| format!("spawning git {}", args.join(" ")))
}

fn stdout_line(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// True when `path` lies inside a git repository.
pub async fn is_git_repo(path: &Path) -> bool {
    git_unchecked(&["rev-parse", "--git-dir"], path)
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Initialise a repository with a placeholder commit so there is a branch
/// tip to anchor the first session on.
pub async fn init_repo(path: &Path) -> anyhow::Result<()> {
    git(&["init"], path).await?;
    let readme = path.join("README.md");
    if !readme.exists() {
        std::fs::write(&readme, "# Project\n\nInitialized by coda.\n")
            .with_context(|| format!("writing {}", readme.display()))?;
    }
    git(&["add", "README.md"], path).await?;
    git(&["commit", "-m", "Initial commit"], path).await?;
    Ok(())
}

/// Root directory of the repository containing `path`.
pub async fn repo_root(path: &Path) -> anyhow::Result<PathBuf> {
    let out = git(&["rev-parse", "--show-toplevel"], path).await?;
    Ok(PathBuf::from(stdout_line(&out)))
}

/// Name of the branch checked out in `cwd`.
pub async fn current_branch(cwd: &Path) -> anyhow::Result<String> {
    let out = git(&["rev-parse", "--abbrev-ref", "HEAD"], cwd).await?;
    Ok(stdout_line(&out))
}

/// Full hash of HEAD in `cwd`.
pub async fn head_commit(cwd: &Path) -> anyhow::Result<String> {
    let out = git(&["rev-parse", "HEAD"], cwd).await?;
    Ok(stdout_line(&out))
}

/// Short hash + subject of one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub hash: String,
    pub subject: String,
}

/// Commits in `old..new`, newest first.  Unknown revisions yield an empty
/// list rather than an error.
pub async fn commits_between(old: &str, new: &str, cwd: &Path) -> anyhow::Result<Vec<CommitInfo>> {
    let range = format!("{old}..{new}");
    let out = git_unchecked(&["log", "--format=%h %s", &range], cwd).await?;
    if !out.status.success() {
        return Ok(Vec::new());
    }
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .filter_map(|line| {
            let (hash, subject) = line.split_once(' ')?;
            Some(CommitInfo {
                hash: hash.to_string(),
                subject: subject.to_string(),
            })
        })
        .collect())
}

/// Paths changed between two commits.
pub async fn changed_files_between(
    old: &str,
    new: &str,
    cwd: &Path,
) -> anyhow::Result<Vec<String>> {
    let out = git_unchecked(&["diff", "--name-only", old, new], cwd).await?;
    if !out.status.success() {
        return Ok(Vec::new());
    }
    Ok(String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Pathspecs excluding everything a commit must never pick up: the
/// scratch directory, a nested state directory, and the session's own
/// audit logs (which live at the workspace root).
pub(crate) const EXCLUDES: [&str; 3] = [":!.scratch", ":!.coda", ":!*.log"];

/// True when the workspace has staged, unstaged, or untracked changes
/// outside the scratch and state directories.
pub async fn has_changes(workspace: &Path) -> anyhow::Result<bool> {
    let out = git(
        &["status", "--porcelain", "--", ".", EXCLUDES[0], EXCLUDES[1], EXCLUDES[2]],
        workspace,
    )
    .await?;
    Ok(!stdout_line(&out).is_empty())
}

/// Human-readable stat of the workspace's uncommitted and untracked
/// changes, used in subcontext summaries.  Best-effort: an empty string
/// when nothing changed.
pub async fn diff_stat(workspace: &Path) -> anyhow::Result<String> {
    let tracked = git_unchecked(
        &["diff", "--stat", "HEAD", "--", ".", EXCLUDES[0], EXCLUDES[1], EXCLUDES[2]],
        workspace,
    )
    .await?;
    let mut stat = String::from_utf8_lossy(&tracked.stdout).trim().to_string();
    let untracked = git_unchecked(
        &[
            "ls-files",
            "--others",
            "--exclude-standard",
            "--",
            ".",
            EXCLUDES[0],
            EXCLUDES[1],
            EXCLUDES[2],
        ],
        workspace,
    )
    .await?;
    for file in String::from_utf8_lossy(&untracked.stdout).lines() {
        if !stat.is_empty() {
            stat.push('\n');
        }
        stat.push_str(&format!(" {file} (new)"));
    }
    Ok(stat)
}
