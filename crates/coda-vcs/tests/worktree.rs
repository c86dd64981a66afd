// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end tests of the workspace lifecycle against real git repos.

use std::path::{Path, PathBuf};
use std::process::Command;

use coda_vcs::{
    commit, discard, has_changes, head_commit, integrate, prepare, IntegrateOutcome,
};

fn run(repo: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(repo)
        .output()
        .expect("git spawns");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn test_repo() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let repo = dir.path().to_path_buf();
    run(&repo, &["init"]);
    run(&repo, &["config", "user.email", "test@example.com"]);
    run(&repo, &["config", "user.name", "Test User"]);
    run(&repo, &["config", "commit.gpgsign", "false"]);
    std::fs::write(repo.join("README.md"), "# Test Project\n").unwrap();
    run(&repo, &["add", "README.md"]);
    run(&repo, &["commit", "-m", "Initial commit"]);
    (dir, repo)
}

#[tokio::test]
async fn prepare_creates_worktree_branch_and_scratch() {
    let (_dir, repo) = test_repo();
    let ws = prepare(&repo).await.unwrap();

    assert_eq!(ws.session_id, 1);
    assert_eq!(ws.branch, "coda/1");
    assert!(ws.path.join("README.md").exists());
    assert!(ws.path.join(".scratch").is_dir());

    let branches = run(&repo, &["branch", "--list", "coda/1"]);
    assert!(branches.contains("coda/1"));
}

#[tokio::test]
async fn session_ids_increment() {
    let (_dir, repo) = test_repo();
    let a = prepare(&repo).await.unwrap();
    let b = prepare(&repo).await.unwrap();
    assert_eq!(a.session_id + 1, b.session_id);
}

#[tokio::test]
async fn commit_stages_changes_but_not_scratch() {
    let (_dir, repo) = test_repo();
    let ws = prepare(&repo).await.unwrap();

    std::fs::write(ws.path.join("new.txt"), "data\n").unwrap();
    std::fs::write(ws.path.join(".scratch/tmp.txt"), "temp\n").unwrap();

    assert!(has_changes(&ws.path).await.unwrap());
    assert!(commit(&ws.path, "add new file").await.unwrap());
    assert!(!has_changes(&ws.path).await.unwrap());

    let tracked = run(&ws.path, &["ls-files"]);
    assert!(tracked.contains("new.txt"));
    assert!(!tracked.contains(".scratch"));
}

#[tokio::test]
async fn empty_commit_returns_false() {
    let (_dir, repo) = test_repo();
    let ws = prepare(&repo).await.unwrap();
    assert!(!commit(&ws.path, "nothing happened").await.unwrap());
}

#[tokio::test]
async fn integrate_fast_forwards_main_and_preserves_chain() {
    let (_dir, repo) = test_repo();
    let before = head_commit(&repo).await.unwrap();
    let ws = prepare(&repo).await.unwrap();

    std::fs::write(ws.path.join("a.txt"), "one\n").unwrap();
    commit(&ws.path, "step one").await.unwrap();
    std::fs::write(ws.path.join("b.txt"), "two\n").unwrap();
    commit(&ws.path, "step two").await.unwrap();

    let outcome = integrate(&repo, &ws.path, &ws.branch, "Add a and b files")
        .await
        .unwrap();
    assert!(matches!(outcome, IntegrateOutcome::Integrated));

    // Main advanced and is a descendant of its previous tip.
    let after = head_commit(&repo).await.unwrap();
    assert_ne!(before, after);
    run(&repo, &["merge-base", "--is-ancestor", &before, &after]);

    // One squashed commit with the preservation note.
    let subject = run(&repo, &["log", "-1", "--pretty=%B"]);
    assert!(subject.contains("Add a and b files"));
    assert!(subject.contains("coda/1-a-and-b-files"));
    assert!(repo.join("a.txt").exists());
    assert!(repo.join("b.txt").exists());

    // The preserved branch kept both intermediate commits.
    let chain = run(&repo, &["log", "--format=%s", "coda/1-a-and-b-files"]);
    assert!(chain.contains("step one"));
    assert!(chain.contains("step two"));
}

#[tokio::test]
async fn integrate_reports_rebase_conflict_and_keeps_workspace() {
    let (_dir, repo) = test_repo();
    let ws = prepare(&repo).await.unwrap();

    // Session edits README…
    std::fs::write(ws.path.join("README.md"), "# Test Project\n\nsession text\n").unwrap();
    commit(&ws.path, "session change").await.unwrap();

    // …while main advances concurrently touching the same line.
    std::fs::write(repo.join("README.md"), "# Test Project\n\nmain text\n").unwrap();
    run(&repo, &["add", "README.md"]);
    run(&repo, &["commit", "-m", "concurrent main change"]);

    let outcome = integrate(&repo, &ws.path, &ws.branch, "Update README")
        .await
        .unwrap();
    match outcome {
        IntegrateOutcome::RebaseConflict { diagnostic } => {
            assert!(!diagnostic.is_empty());
        }
        other => panic!("expected rebase conflict, got {other:?}"),
    }

    // Workspace still exists and is not mid-rebase.
    assert!(ws.path.join("README.md").exists());
    assert!(!ws.path.join(".git/rebase-merge").exists());

    // Main still carries its own change.
    let readme = std::fs::read_to_string(repo.join("README.md")).unwrap();
    assert!(readme.contains("main text"));
}

#[tokio::test]
async fn discard_is_best_effort_and_idempotent() {
    let (_dir, repo) = test_repo();
    let ws = prepare(&repo).await.unwrap();

    discard(&repo, &ws.path, &ws.branch).await;
    assert!(!ws.path.exists());
    let branches = run(&repo, &["branch", "--list", "coda/1"]);
    assert!(branches.is_empty());

    // Second discard of the same session must not fail.
    discard(&repo, &ws.path, &ws.branch).await;
}
