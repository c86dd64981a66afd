// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Version-control workspace management.
//!
//! Every session runs in a second working copy of the repository, a git
//! worktree anchored at a session branch under `.coda/`, so the user's
//! checkout is never touched until the final squash-rebase-fast-forward
//! integration.

mod git;
mod workspace;

pub use git::{
    changed_files_between, commits_between, current_branch, diff_stat, has_changes, head_commit,
    init_repo, is_git_repo, repo_root, CommitInfo,
};
pub use workspace::{
    commit, discard, integrate, next_session_id, prepare, slug_from_message, IntegrateOutcome,
    Workspace,
};

use std::path::{Path, PathBuf};

/// Dotted state directory under the repository root.
pub const STATE_DIR: &str = ".coda";
/// Branch namespace for session and preserved-history branches.
pub const BRANCH_PREFIX: &str = "coda";
/// Scratch subdirectory inside each workspace, excluded from every commit.
pub const SCRATCH_DIR: &str = ".scratch";

/// `<repo_root>/.coda`
pub fn state_dir(repo_root: &Path) -> PathBuf {
    repo_root.join(STATE_DIR)
}
