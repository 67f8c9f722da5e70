//! Deterministic test execution inside a materialized workspace.
//!
//! Each script is written into the workspace at its declared path and run in
//! its own child process. Nothing a single script does (escape the root,
//! crash, hang, fail to spawn) stops the remaining scripts from running.

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use grader_core::metrics::METRICS;
use grader_core::obs;
use grader_core::text::truncate_utf8;
use grader_core::{TestOutcome, TestScript};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::stage::TestStage;

/// Default cap on captured test output.
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 8_000;

/// Runs test scripts sequentially against one workspace root.
pub struct TestRunner {
    root: PathBuf,
    timeout_secs: u64,
    max_output_bytes: usize,
}

impl TestRunner {
    pub fn new(root: impl Into<PathBuf>, timeout_secs: u64) -> Self {
        Self {
            root: root.into(),
            timeout_secs,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
        }
    }

    pub fn with_max_output_bytes(mut self, max_output_bytes: usize) -> Self {
        self.max_output_bytes = max_output_bytes;
        self
    }

    /// Run every script once, in order. One outcome per script.
    pub async fn run_all(&self, scripts: &[TestScript]) -> Vec<TestOutcome> {
        let mut outcomes = Vec::with_capacity(scripts.len());
        for script in scripts {
            outcomes.push(self.run(script).await);
        }
        outcomes
    }

    /// Place and run a single script.
    pub async fn run(&self, script: &TestScript) -> TestOutcome {
        let target = match resolve_in_root(&self.root, &script.path) {
            Ok(target) => target,
            Err(reason) => {
                warn!(path = %script.path, reason = %reason, "rejecting test script");
                METRICS.inc_tests_rejected();
                obs::emit_test_completed(&script.path, &script.rubric_id, false, 0);
                return TestOutcome::failed(
                    &script.path,
                    &script.rubric_id,
                    format!(
                        "rejected: test script path '{}' escapes the workspace root",
                        script.path
                    ),
                );
            }
        };

        if let Err(e) = place_script(&target, &script.content) {
            METRICS.inc_tests_rejected();
            obs::emit_test_completed(&script.path, &script.rubric_id, false, 0);
            return TestOutcome::failed(
                &script.path,
                &script.rubric_id,
                format!("failed to write test script: {e}"),
            );
        }

        let stage = TestStage::for_script(script, self.timeout_secs);
        let outcome = self.execute(&stage).await;
        obs::emit_test_completed(
            &outcome.path,
            &outcome.rubric_id,
            outcome.success,
            outcome.duration_ms.unwrap_or(0),
        );
        outcome
    }

    async fn execute(&self, stage: &TestStage) -> TestOutcome {
        let start = Instant::now();
        METRICS.inc_tests_executed();
        debug!(path = %stage.path, interpreter = stage.interpreter.name(), "executing test");

        let (exe, args) = match stage.command.split_first() {
            Some(split) => split,
            None => {
                return TestOutcome::failed(&stage.path, &stage.rubric_id, "empty test command".to_string())
            }
        };

        let child = Command::new(exe)
            .args(args)
            .current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return TestOutcome {
                    duration_ms: Some(start.elapsed().as_millis() as u64),
                    ..TestOutcome::failed(
                        &stage.path,
                        &stage.rubric_id,
                        format!("failed to spawn {exe}: {e}"),
                    )
                }
            }
        };

        let waited = tokio::time::timeout(
            Duration::from_secs(stage.timeout_secs),
            child.wait_with_output(),
        )
        .await;
        let duration_ms = Some(start.elapsed().as_millis() as u64);

        let output = match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return TestOutcome {
                    duration_ms,
                    ..TestOutcome::failed(&stage.path, &stage.rubric_id, format!("test execution failed: {e}"))
                }
            }
            Err(_) => {
                return TestOutcome {
                    duration_ms,
                    ..TestOutcome::failed(
                        &stage.path,
                        &stage.rubric_id,
                        format!("test timed out after {}s", stage.timeout_secs),
                    )
                }
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        TestOutcome {
            path: stage.path.clone(),
            rubric_id: stage.rubric_id.clone(),
            success: output.status.success(),
            output: truncate_utf8(&combined, self.max_output_bytes).to_string(),
            exit_code: output.status.code(),
            duration_ms,
        }
    }
}

/// Resolve `rel` under `root`, refusing anything that lands outside it.
///
/// Absolute paths and `..` components that climb above the root are refused
/// lexically. The deepest existing ancestor of the target is then
/// canonicalized so a symlinked directory cannot lead outside either.
pub fn resolve_in_root(root: &Path, rel: &str) -> Result<PathBuf, String> {
    let rel_path = Path::new(rel);
    let mut normalized = PathBuf::new();
    for component in rel_path.components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(format!("'{rel}' climbs above the workspace root"));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("'{rel}' is absolute"));
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(format!("'{rel}' does not name a file"));
    }

    let canonical_root = root
        .canonicalize()
        .map_err(|e| format!("workspace root unavailable: {e}"))?;
    let target = canonical_root.join(&normalized);

    let mut probe = target.as_path();
    loop {
        if probe.symlink_metadata().is_ok() {
            let resolved = probe
                .canonicalize()
                .map_err(|e| format!("cannot resolve '{}': {e}", probe.display()))?;
            if !resolved.starts_with(&canonical_root) {
                return Err(format!("'{rel}' resolves outside the workspace root"));
            }
            break;
        }
        match probe.parent() {
            Some(parent) => probe = parent,
            None => break,
        }
    }

    Ok(target)
}

fn place_script(target: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(target, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner(dir: &Path) -> TestRunner {
        TestRunner::new(dir, 30)
    }

    #[test]
    fn test_resolve_rejects_escapes() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_in_root(dir.path(), "../../etc/passwd").is_err());
        assert!(resolve_in_root(dir.path(), "/etc/passwd").is_err());
        assert!(resolve_in_root(dir.path(), "tests/../../x.sh").is_err());
        assert!(resolve_in_root(dir.path(), ".").is_err());
    }

    #[test]
    fn test_resolve_allows_inner_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_in_root(dir.path(), "tests/unit/../test_a.sh").unwrap();
        assert!(resolved.ends_with("tests/test_a.sh"));
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_rejects_symlinked_parent() {
        let outside = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        let err = resolve_in_root(dir.path(), "link/evil.sh").unwrap_err();
        assert!(err.contains("outside"));
    }

    #[tokio::test]
    async fn test_passing_and_failing_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = vec![
            TestScript::new("tests/pass.sh", "r1", "echo hello\nexit 0\n"),
            TestScript::new("tests/fail.sh", "r2", "echo oops >&2\nexit 3\n"),
        ];

        let outcomes = runner(dir.path()).run_all(&scripts).await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes[0].success);
        assert_eq!(outcomes[0].exit_code, Some(0));
        assert!(outcomes[0].output.contains("hello"));
        assert!(!outcomes[1].success);
        assert_eq!(outcomes[1].exit_code, Some(3));
        assert!(outcomes[1].output.contains("oops"));
        assert!(dir.path().join("tests/pass.sh").is_file());
    }

    #[tokio::test]
    async fn test_scripts_run_from_workspace_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "present").unwrap();
        let script = TestScript::new("tests/check.sh", "r1", "test -f marker.txt\n");
        let outcome = runner(dir.path()).run(&script).await;
        assert!(outcome.success, "output: {}", outcome.output);
    }

    #[tokio::test]
    async fn test_escaping_script_never_executes() {
        let outer = tempfile::tempdir().unwrap();
        let root = outer.path().join("ws");
        std::fs::create_dir(&root).unwrap();

        let script = TestScript::new("../escaped.sh", "r1", "touch pwned\n");
        let outcome = runner(&root).run(&script).await;

        assert!(!outcome.success);
        assert_eq!(
            outcome.output,
            "rejected: test script path '../escaped.sh' escapes the workspace root"
        );
        assert!(!outer.path().join("escaped.sh").exists());
        assert!(!root.join("pwned").exists());
    }

    #[tokio::test]
    async fn test_timeout_does_not_stop_later_tests() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = vec![
            TestScript::new("slow.sh", "r1", "sleep 30\n"),
            TestScript::new("fast.sh", "r1", "exit 0\n"),
        ];
        let outcomes = TestRunner::new(dir.path(), 1).run_all(&scripts).await;
        assert!(!outcomes[0].success);
        assert_eq!(outcomes[0].output, "test timed out after 1s");
        assert!(outcomes[1].success);
    }

    #[tokio::test]
    async fn test_output_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let script = TestScript::new("noisy.sh", "r1", "for i in $(seq 1 500); do echo line-$i; done\n");
        let outcome = runner(dir.path()).with_max_output_bytes(64).run(&script).await;
        assert!(outcome.success);
        assert_eq!(outcome.output.len(), 64);
    }
}
