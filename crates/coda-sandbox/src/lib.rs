// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sandboxed shell execution in ephemeral containers.
//!
//! Untrusted commands proposed by the model run inside a container with the
//! workspace bind-mounted at its real absolute path (so paths inside match
//! paths outside) and the repository's git metadata mounted read-only.
//! Prepared images (base image plus build steps) are cached per process
//! under a content-derived tag, so repeated runs with the same preparation
//! reuse the image.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context};
use sha2::{Digest, Sha256};
use tokio::process::Command;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

/// Default image when the caller does not name one.
pub const DEFAULT_IMAGE: &str = "debian:stable";
/// Default head/tail line windows for output elision.
pub const DEFAULT_HEAD: usize = 50;
pub const DEFAULT_TAIL: usize = 50;

/// A sandboxed command execution request.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    pub command: String,
    pub workspace: PathBuf,
    pub repo_root: PathBuf,
    pub base_image: String,
    /// Dockerfile `RUN …` lines executed at image build time.
    pub build_steps: Vec<String>,
    pub head: usize,
    pub tail: usize,
}

impl SandboxRequest {
    pub fn new(command: impl Into<String>, workspace: &Path, repo_root: &Path) -> Self {
        Self {
            command: command.into(),
            workspace: workspace.to_path_buf(),
            repo_root: repo_root.to_path_buf(),
            base_image: DEFAULT_IMAGE.to_string(),
            build_steps: Vec::new(),
            head: DEFAULT_HEAD,
            tail: DEFAULT_TAIL,
        }
    }
}

/// Result of one sandboxed run.  A non-zero exit code is not a runner
/// failure; it is reported here for the model to react to.
#[derive(Debug, Clone)]
pub struct SandboxResult {
    /// Combined stdout + stderr, elided to head/tail when oversized.
    pub output: String,
    pub exit_code: i32,
}

/// Container-backed sandbox with a process-local prepared-image cache.
pub struct Sandbox {
    runtime: OnceCell<&'static str>,
    /// cache key → image tag; write-once per key.
    images: Mutex<HashMap<String, String>>,
}

impl Sandbox {
    pub fn new() -> Self {
        Self {
            runtime: OnceCell::new(),
            images: Mutex::new(HashMap::new()),
        }
    }

    /// Detect the container runtime, preferring rootless podman.  The
    /// result is cached for the process lifetime; absence is a hard error.
    pub async fn runtime(&self) -> anyhow::Result<&'static str> {
        self.runtime
            .get_or_try_init(|| async {
                for candidate in ["podman", "docker"] {
                    let probe = Command::new(candidate)
                        .arg("--version")
                        .stdout(Stdio::null())
                        .stderr(Stdio::null())
                        .status()
                        .await;
                    if matches!(probe, Ok(status) if status.success()) {
                        debug!(runtime = candidate, "container runtime detected");
                        return Ok(candidate);
                    }
                }
                bail!("neither podman nor docker found in PATH")
            })
            .await
            .copied()
    }

    /// Build (or reuse) the prepared image for `base` + `steps` and return
    /// its tag.  A base image with no steps is used as-is.
    async fn ensure_image(&self, base: &str, steps: &[String]) -> anyhow::Result<String> {
        if steps.iter().all(|s| s.trim().is_empty()) {
            return Ok(base.to_string());
        }

        let key = image_cache_key(base, steps);
        {
            let images = self.images.lock().await;
            if let Some(tag) = images.get(&key) {
                return Ok(tag.clone());
            }
        }

        let runtime = self.runtime().await?;
        let tag = format!("coda-build-{key}");

        let mut dockerfile = format!("FROM {base}\n");
        for step in steps {
            if !step.trim().is_empty() {
                dockerfile.push_str(step);
                dockerfile.push('\n');
            }
        }

        let build_dir = tempfile::tempdir().context("creating image build context")?;
        let dockerfile_path = build_dir.path().join("Dockerfile");
        std::fs::write(&dockerfile_path, dockerfile).context("writing Dockerfile")?;

        info!(tag, base, "building sandbox image");
        let out = Command::new(runtime)
            .args([
                "build",
                "-t",
                &tag,
                "-f",
                dockerfile_path.to_str().context("non-utf8 build path")?,
                build_dir.path().to_str().context("non-utf8 build path")?,
            ])
            .output()
            .await
            .with_context(|| format!("spawning {runtime} build"))?;
        if !out.status.success() {
            bail!(
                "failed to build sandbox image:\n{}",
                String::from_utf8_lossy(&out.stderr)
            );
        }

        self.images.lock().await.insert(key, tag.clone());
        Ok(tag)
    }

    /// Execute a shell fragment in an ephemeral container.
    pub async fn run(&self, req: &SandboxRequest) -> anyhow::Result<SandboxResult> {
        let runtime = self.runtime().await?;
        let image = self.ensure_image(&req.base_image, &req.build_steps).await?;

        let workspace = req
            .workspace
            .canonicalize()
            .with_context(|| format!("resolving workspace {}", req.workspace.display()))?;
        let git_dir = req
            .repo_root
            .canonicalize()
            .with_context(|| format!("resolving repo root {}", req.repo_root.display()))?
            .join(".git");
        let ws = workspace.to_str().context("non-utf8 workspace path")?;
        let git = git_dir.to_str().context("non-utf8 git path")?;

        debug!(runtime, image, cmd = %req.command, "running sandboxed command");
        let out = Command::new(runtime)
            .args([
                "run",
                "--rm",
                "-v",
                &format!("{ws}:{ws}"),
                "-v",
                &format!("{git}:{git}:ro"),
                "-w",
                ws,
                &image,
                "sh",
                "-c",
                &req.command,
            ])
            .output()
            .await
            .with_context(|| format!("spawning {runtime} run"))?;

        let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&out.stderr));

        Ok(SandboxResult {
            output: elide_middle(&combined, req.head, req.tail),
            exit_code: out.status.code().unwrap_or(-1),
        })
    }
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable cache key over the base image and preparation steps.
fn image_cache_key(base: &str, steps: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base.as_bytes());
    for step in steps {
        hasher.update(b":");
        hasher.update(step.as_bytes());
    }
    hex::encode(hasher.finalize())[..12].to_string()
}

/// Keep the first `head` and last `tail` lines; replace the middle with a
/// single notice line stating how many lines were dropped.  Output is at
/// most `head + tail + 1` lines.
pub fn elide_middle(output: &str, head: usize, tail: usize) -> String {
    let lines: Vec<&str> = output.split('\n').collect();
    if lines.len() <= head + tail {
        return output.to_string();
    }

    let dropped = lines.len() - head - tail;
    let mut kept: Vec<&str> = Vec::with_capacity(head + tail + 1);
    kept.extend(&lines[..head]);
    let notice = format!(
        "... {dropped} lines stripped (change head/tail to see them, or grep for specific output) ..."
    );
    kept.push(&notice);
    kept.extend(&lines[lines.len() - tail..]);
    kept.join("\n")
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_is_untouched() {
        let s = "a\nb\nc";
        assert_eq!(elide_middle(s, 5, 5), s);
    }

    #[test]
    fn boundary_exactly_head_plus_tail_is_untouched() {
        let s = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        assert_eq!(elide_middle(&s, 5, 5), s);
    }

    #[test]
    fn oversized_output_is_elided_to_head_tail_plus_notice() {
        let s = (0..100).map(|i| format!("line{i}")).collect::<Vec<_>>().join("\n");
        let result = elide_middle(&s, 5, 5);
        let lines: Vec<&str> = result.split('\n').collect();
        assert_eq!(lines.len(), 11);
        assert_eq!(lines[0], "line0");
        assert_eq!(lines[4], "line4");
        assert!(lines[5].contains("90 lines stripped"));
        assert_eq!(lines[6], "line95");
        assert_eq!(lines[10], "line99");
    }

    #[test]
    fn zero_tail_keeps_only_head_and_notice() {
        let s = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let result = elide_middle(&s, 3, 0);
        let lines: Vec<&str> = result.split('\n').collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[3].contains("7 lines stripped"));
    }

    #[test]
    fn cache_key_is_stable_and_content_sensitive() {
        let a = image_cache_key("debian:stable", &["RUN apt-get update".into()]);
        let b = image_cache_key("debian:stable", &["RUN apt-get update".into()]);
        let c = image_cache_key("debian:stable", &["RUN apt-get upgrade".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn cache_key_distinguishes_base_images() {
        let a = image_cache_key("debian:stable", &[]);
        let b = image_cache_key("alpine:3", &[]);
        assert_ne!(a, b);
    }
}
