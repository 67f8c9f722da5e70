//! Test stage definitions: which interpreter runs which script.

use std::path::Path;

use grader_core::TestScript;
use serde::{Deserialize, Serialize};

/// Interpreter chosen from a test script's file name.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Interpreter {
    /// python3 -m pytest -q <path>
    Pytest,

    /// python3 <path>
    Python,

    /// bash <path>
    Bash,

    /// node <path>
    Node,
}

impl Interpreter {
    /// Pick the interpreter for a script path. Unknown kinds run under bash.
    pub fn for_path(path: &str) -> Self {
        let name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if let Some(stem) = name.strip_suffix(".py") {
            if stem.starts_with("test_") || stem.ends_with("_test") {
                Interpreter::Pytest
            } else {
                Interpreter::Python
            }
        } else if name.ends_with(".js") || name.ends_with(".mjs") || name.ends_with(".cjs") {
            Interpreter::Node
        } else {
            Interpreter::Bash
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Interpreter::Pytest => "pytest",
            Interpreter::Python => "python",
            Interpreter::Bash => "bash",
            Interpreter::Node => "node",
        }
    }

    /// Full command line for running `path` (first element is the executable).
    pub fn command(&self, path: &str) -> Vec<String> {
        let mut cmd: Vec<String> = match self {
            Interpreter::Pytest => vec!["python3".into(), "-m".into(), "pytest".into(), "-q".into()],
            Interpreter::Python => vec!["python3".into()],
            Interpreter::Bash => vec!["bash".into()],
            Interpreter::Node => vec!["node".into()],
        };
        cmd.push(path.to_string());
        cmd
    }
}

/// One test script ready to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestStage {
    /// Script path relative to the workspace root.
    pub path: String,

    pub rubric_id: String,

    pub interpreter: Interpreter,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Timeout in seconds.
    pub timeout_secs: u64,
}

impl TestStage {
    pub fn for_script(script: &TestScript, timeout_secs: u64) -> Self {
        let interpreter = Interpreter::for_path(&script.path);
        Self {
            path: script.path.clone(),
            rubric_id: script.rubric_id.clone(),
            interpreter,
            command: interpreter.command(&script.path),
            timeout_secs,
        }
    }
}
