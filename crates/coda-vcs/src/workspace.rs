// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use tracing::{debug, warn};

use crate::git::{current_branch, git, git_unchecked};
use crate::{state_dir, BRANCH_PREFIX, SCRATCH_DIR};

/// An isolated working copy bound to a session branch.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub session_id: u64,
    pub path: PathBuf,
    pub branch: String,
}

/// Outcome of [`integrate`].
#[derive(Debug)]
pub enum IntegrateOutcome {
    /// The main branch was fast-forwarded to the squashed commit.
    Integrated,
    /// The rebase onto the main branch hit a conflict.  The workspace is
    /// left intact (rebase aborted) and the diagnostic carries the rebase
    /// output for the user.
    RebaseConflict { diagnostic: String },
}

/// Allocate the next session id: max over the numeric entries of the
/// state directory, plus one.  Non-numeric entries are ignored.
pub fn next_session_id(repo_root: &Path) -> anyhow::Result<u64> {
    let dir = state_dir(repo_root);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("creating state directory {}", dir.display()))?;
    let mut max = 0u64;
    for entry in std::fs::read_dir(&dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(n) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
            max = max.max(n);
        }
    }
    Ok(max + 1)
}

/// Create the session worktree: a fresh branch `coda/<id>` at the current
/// branch tip, materialised at `.coda/<id>` with a scratch subdirectory.
/// Stale worktree registrations are pruned first.
pub async fn prepare(repo_root: &Path) -> anyhow::Result<Workspace> {
    let session_id = next_session_id(repo_root)?;
    let branch = format!("{BRANCH_PREFIX}/{session_id}");
    let path = state_dir(repo_root).join(session_id.to_string());

    let base = current_branch(repo_root).await?;
    git(&["worktree", "prune"], repo_root).await?;
    git(&["branch", "-f", &branch, &base], repo_root).await?;
    git(
        &["worktree", "add", path.to_str().context("non-utf8 workspace path")?, &branch],
        repo_root,
    )
    .await?;

    let scratch = path.join(SCRATCH_DIR);
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("creating scratch directory {}", scratch.display()))?;

    debug!(session_id, branch, path = %path.display(), "session workspace prepared");
    Ok(Workspace {
        session_id,
        path,
        branch,
    })
}

/// Stage everything except scratch/state and record a commit.  Returns
/// whether a commit was actually created; an empty change set is not an
/// error.
pub async fn commit(workspace: &Path, message: &str) -> anyhow::Result<bool> {
    git(&["add", "-A", ":!.scratch", ":!.coda", ":!*.log"], workspace).await?;
    let out = git_unchecked(&["commit", "-m", message], workspace).await?;
    Ok(out.status.success())
}

/// Derive a descriptive branch slug from the first line of a commit
/// message: strip a leading change verb, lowercase, hyphenate, cap at 40
/// characters.
pub fn slug_from_message(message: &str) -> String {
    let mut first = message.lines().next().unwrap_or("").trim().to_string();
    for prefix in ["Add ", "Update ", "Fix ", "Remove ", "Refactor ", "Implement "] {
        if let Some(rest) = first.strip_prefix(prefix) {
            first = rest.to_string();
            break;
        }
    }

    // Drop everything but alphanumerics, whitespace, and hyphens, then
    // turn separator runs into single hyphens.
    let lowered = first.to_lowercase();
    let mut slug = String::with_capacity(lowered.len());
    let mut last_hyphen = true; // suppress a leading hyphen
    for c in lowered.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_hyphen = false;
        } else if (c.is_whitespace() || c == '-') && !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    let mut slug = slug.trim_matches('-').to_string();
    slug.truncate(40);
    let slug = slug.trim_end_matches('-').to_string();

    if slug.is_empty() {
        "changes".to_string()
    } else {
        slug
    }
}

/// Squash-rebase-fast-forward the session branch into the main branch.
///
/// The preserved branch `<session>-<slug>` is created at the current
/// workspace tip *before* the squash, so it keeps the full chain of
/// intermediate commits.  On a rebase conflict the rebase is aborted and
/// the output returned as a diagnostic; the caller decides how to recover.
pub async fn integrate(
    repo_root: &Path,
    workspace: &Path,
    branch: &str,
    message: &str,
) -> anyhow::Result<IntegrateOutcome> {
    let root_branch = current_branch(repo_root).await?;

    // Preserve the intermediate chain.  Tolerate an existing branch so a
    // rerun after a resolved conflict does not move it off the chain.
    let preserved = format!("{branch}-{}", slug_from_message(message));
    let created = git_unchecked(&["branch", &preserved, "HEAD"], workspace).await?;
    if !created.status.success() {
        debug!(branch = preserved, "preserved branch already exists; reusing");
    }

    let base = git(&["merge-base", &root_branch, "HEAD"], workspace).await?;
    let base = String::from_utf8_lossy(&base.stdout).trim().to_string();

    let enhanced = format!(
        "{}\n\nThe original chain of session commits is kept in the {} branch.",
        message.trim_end(),
        preserved
    );

    git(&["reset", "--soft", &base], workspace).await?;
    git(&["add", "-A", ":!.scratch", ":!.coda", ":!*.log"], workspace).await?;
    let committed = git_unchecked(&["commit", "-m", &enhanced], workspace).await?;
    if !committed.status.success() {
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&committed.stdout),
            String::from_utf8_lossy(&committed.stderr)
        );
        if !combined.contains("nothing to commit") {
            bail!("git commit failed during integration: {}", combined.trim());
        }
    }

    let rebased = git_unchecked(&["rebase", &root_branch], workspace).await?;
    if !rebased.status.success() {
        let diagnostic = format!(
            "{}{}",
            String::from_utf8_lossy(&rebased.stdout),
            String::from_utf8_lossy(&rebased.stderr)
        );
        // Leave the workspace usable rather than mid-rebase.
        let _ = git_unchecked(&["rebase", "--abort"], workspace).await;
        warn!("rebase onto {root_branch} failed");
        return Ok(IntegrateOutcome::RebaseConflict { diagnostic });
    }

    git(&["merge", "--ff-only", branch], repo_root).await?;
    Ok(IntegrateOutcome::Integrated)
}

/// Remove the worktree and delete the session branch.  Both operations
/// are best-effort: an already-removed worktree must not fail the caller.
pub async fn discard(repo_root: &Path, workspace: &Path, branch: &str) {
    if let Some(path) = workspace.to_str() {
        match git_unchecked(&["worktree", "remove", "--force", path], repo_root).await {
            Ok(out) if !out.status.success() => {
                debug!(workspace = path, "worktree remove skipped: {}",
                    String::from_utf8_lossy(&out.stderr).trim());
            }
            Err(e) => warn!("worktree remove failed to spawn: {e}"),
            _ => {}
        }
    }
    match git_unchecked(&["branch", "-D", branch], repo_root).await {
        Ok(out) if !out.status.success() => {
            debug!(branch, "branch delete skipped: {}",
                String::from_utf8_lossy(&out.stderr).trim());
        }
        Err(e) => warn!("branch delete failed to spawn: {e}"),
        _ => {}
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Slug derivation ───────────────────────────────────────────────────────

    #[test]
    fn slug_strips_leading_verb_and_punctuation() {
        assert_eq!(slug_from_message("Add hello.txt"), "hellotxt");
    }

    #[test]
    fn slug_hyphenates_and_lowercases() {
        assert_eq!(
            slug_from_message("Fix the Broken Parser!"),
            "the-broken-parser"
        );
    }

    #[test]
    fn slug_collapses_repeated_separators() {
        assert_eq!(slug_from_message("Update  a -- b"), "a-b");
    }

    #[test]
    fn slug_uses_first_line_only() {
        assert_eq!(slug_from_message("Implement feature X\n\nLong body"), "feature-x");
    }

    #[test]
    fn slug_is_bounded_and_has_no_trailing_hyphen() {
        let long = format!("Add {}", "word ".repeat(20));
        let slug = slug_from_message(&long);
        assert!(slug.len() <= 40);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn slug_falls_back_for_empty_message() {
        assert_eq!(slug_from_message(""), "changes");
        assert_eq!(slug_from_message("!!!"), "changes");
    }

    // ── Session id allocation ─────────────────────────────────────────────────

    #[test]
    fn first_session_id_is_one() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(next_session_id(dir.path()).unwrap(), 1);
    }

    #[test]
    fn allocation_is_max_plus_one() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".coda/3")).unwrap();
        std::fs::create_dir_all(dir.path().join(".coda/7")).unwrap();
        assert_eq!(next_session_id(dir.path()).unwrap(), 8);
    }

    #[test]
    fn non_numeric_entries_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".coda/2")).unwrap();
        std::fs::create_dir_all(dir.path().join(".coda/history-backup")).unwrap();
        std::fs::write(dir.path().join(".coda/history"), "x").unwrap();
        assert_eq!(next_session_id(dir.path()).unwrap(), 3);
    }
}
