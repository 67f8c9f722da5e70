//! Workspace materialization: clone the pinned repository into a scoped
//! temporary directory and apply the agent's diff on top of it.
//!
//! Clone and checkout failures are fatal. A diff that does not apply leaves
//! the workspace at the pinned commit; dependency installation is
//! best-effort.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::error::{EvalError, Result};
use crate::domain::result::PatchStatus;
use crate::domain::task::RepoPin;

/// Materializer settings.
#[derive(Debug, Clone)]
pub struct MaterializeConfig {
    /// Run `pip install` / `npm install` when the workspace declares deps.
    pub install_dependencies: bool,
    pub install_timeout_secs: u64,
    pub git_timeout_secs: u64,
}

impl Default for MaterializeConfig {
    fn default() -> Self {
        Self {
            install_dependencies: true,
            install_timeout_secs: 600,
            git_timeout_secs: 300,
        }
    }
}

/// An isolated copy of the repository with the agent's diff applied.
///
/// Owns its temporary directory; dropping the workspace removes it.
#[derive(Debug)]
pub struct Workspace {
    _dir: TempDir,
    root: PathBuf,
    patch_status: PatchStatus,
    baseline_sha: String,
}

impl Workspace {
    /// Repository root inside the temporary directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patch_status(&self) -> PatchStatus {
        self.patch_status
    }

    /// Commit the diff was applied against.
    pub fn baseline_sha(&self) -> &str {
        &self.baseline_sha
    }
}

/// Clone `repo` (or initialise an empty repository when there is no pin),
/// check out the pinned commit and apply `diff`.
pub async fn materialize(
    repo: Option<&RepoPin>,
    diff: &str,
    config: &MaterializeConfig,
) -> Result<Workspace> {
    let dir = tempfile::Builder::new()
        .prefix("grader-ws-")
        .tempdir()
        .map_err(|e| EvalError::Materialize(format!("failed to create temp dir: {e}")))?;
    let root = dir.path().join("repo");
    let git_timeout = Duration::from_secs(config.git_timeout_secs);

    match repo {
        Some(pin) => clone_pinned(pin, &root, git_timeout).await?,
        None => init_empty(&root, git_timeout).await?,
    }

    let baseline_sha = capture_head_sha(&root).await?;
    info!(root = %root.display(), baseline = %baseline_sha, "workspace materialized");

    let patch_status = apply_diff(&root, dir.path(), diff, git_timeout).await;
    if config.install_dependencies {
        install_dependencies(&root, Duration::from_secs(config.install_timeout_secs)).await;
    }

    Ok(Workspace {
        _dir: dir,
        root,
        patch_status,
        baseline_sha,
    })
}

async fn clone_pinned(pin: &RepoPin, root: &Path, timeout: Duration) -> Result<()> {
    let parent = root.parent().unwrap_or(root);
    let dest = root.to_string_lossy().to_string();

    let mut args = vec!["clone", "--quiet"];
    if let Some(branch) = pin.branch.as_deref() {
        args.extend(["--branch", branch]);
    }
    args.extend([pin.url.as_str(), dest.as_str()]);

    info!(url = %pin.url, branch = ?pin.branch, "cloning repository");
    let output = run_git(parent, &args, timeout)
        .await
        .map_err(EvalError::Materialize)?;
    if !output.status.success() {
        return Err(EvalError::Materialize(format!(
            "git clone {} failed: {}",
            pin.url,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    if let Some(commit) = pin.commit.as_deref() {
        let checkout = run_git(root, &["checkout", "--quiet", commit], timeout)
            .await
            .map_err(EvalError::Materialize)?;
        if !checkout.status.success() {
            // The commit may live outside the cloned branch's history.
            debug!(commit, "checkout failed; fetching commit explicitly");
            let fetch = run_git(root, &["fetch", "--quiet", "origin", commit], timeout)
                .await
                .map_err(EvalError::Materialize)?;
            let retry = run_git(root, &["checkout", "--quiet", commit], timeout)
                .await
                .map_err(EvalError::Materialize)?;
            if !fetch.status.success() || !retry.status.success() {
                return Err(EvalError::Materialize(format!(
                    "git checkout {commit} failed: {}",
                    String::from_utf8_lossy(&retry.stderr).trim()
                )));
            }
        }
    }

    Ok(())
}

async fn init_empty(root: &Path, timeout: Duration) -> Result<()> {
    std::fs::create_dir_all(root)?;
    for args in [
        &["init", "--quiet"][..],
        &["config", "user.name", "agent-grader"][..],
        &["config", "user.email", "grader@localhost"][..],
        &["commit", "--quiet", "--allow-empty", "-m", "baseline"][..],
    ] {
        let output = run_git(root, args, timeout)
            .await
            .map_err(EvalError::Materialize)?;
        if !output.status.success() {
            return Err(EvalError::Materialize(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
    }
    Ok(())
}

/// Capture the HEAD commit SHA of a repository.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| EvalError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(EvalError::GitError(format!(
            "git rev-parse HEAD failed: {stderr}"
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(EvalError::GitError(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }

    Ok(sha)
}

/// Apply the diff: plain apply, then `--3way`, then give up and reset.
async fn apply_diff(root: &Path, scratch: &Path, diff: &str, timeout: Duration) -> PatchStatus {
    if diff.trim().is_empty() {
        return PatchStatus::Empty;
    }

    let patch_file = scratch.join("agent.diff");
    // git apply rejects a final hunk without a trailing newline
    let mut contents = diff.to_string();
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    if let Err(e) = std::fs::write(&patch_file, contents) {
        warn!(error = %e, "failed to stage diff; continuing with unpatched workspace");
        return PatchStatus::Failed;
    }
    let patch = patch_file.to_string_lossy().to_string();

    match run_git(root, &["apply", "--whitespace=nowarn", &patch], timeout).await {
        Ok(out) if out.status.success() => return PatchStatus::Clean,
        Ok(out) => debug!(
            stderr = %String::from_utf8_lossy(&out.stderr).trim(),
            "git apply failed, trying --3way"
        ),
        Err(e) => debug!(error = %e, "git apply failed, trying --3way"),
    }

    match run_git(root, &["apply", "--3way", "--whitespace=nowarn", &patch], timeout).await {
        Ok(out) if out.status.success() => return PatchStatus::ThreeWay,
        Ok(out) => warn!(
            stderr = %String::from_utf8_lossy(&out.stderr).trim(),
            "diff did not apply; continuing with unpatched workspace"
        ),
        Err(e) => warn!(error = %e, "diff did not apply; continuing with unpatched workspace"),
    }

    // --3way can leave conflict markers behind
    for args in [&["reset", "--hard", "--quiet", "HEAD"][..], &["clean", "-fdq"][..]] {
        if let Err(e) = run_git(root, args, timeout).await {
            warn!(error = %e, "failed to reset workspace after rejected diff");
        }
    }
    PatchStatus::Failed
}

/// Best-effort dependency installation; failures are logged only.
async fn install_dependencies(root: &Path, timeout: Duration) {
    let mut steps: Vec<(&str, Vec<&str>)> = Vec::new();
    if root.join("requirements.txt").is_file() {
        steps.push((
            "python3",
            vec!["-m", "pip", "install", "--quiet", "-r", "requirements.txt"],
        ));
    }
    if root.join("package.json").is_file() {
        steps.push(("npm", vec!["install", "--silent"]));
    }

    for (program, args) in steps {
        info!(program, "installing workspace dependencies");
        match run_command(root, program, &args, timeout).await {
            Ok(out) if out.status.success() => {}
            Ok(out) => warn!(
                program,
                code = ?out.status.code(),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "dependency install failed"
            ),
            Err(e) => warn!(program, error = %e, "dependency install failed"),
        }
    }
}

async fn run_git(dir: &Path, args: &[&str], timeout: Duration) -> std::result::Result<Output, String> {
    run_command(dir, "git", args, timeout).await
}

async fn run_command(
    dir: &Path,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> std::result::Result<Output, String> {
    let child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn {program}: {e}"))?;

    tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| format!("{program} {} timed out after {}s", args.join(" "), timeout.as_secs()))?
        .map_err(|e| format!("{program} failed: {e}"))
}
