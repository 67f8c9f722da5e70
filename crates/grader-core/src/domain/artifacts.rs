//! Completed-run artifacts read from a run directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{EvalError, Result};
use super::keyed;
use super::result::{LmEvaluation, TestOutcome};

/// Diff file names, in lookup order.
pub const DIFF_FILE_CANDIDATES: &[&str] = &["patch.diff", "diff.patch", "agent.diff", "changes.diff"];

/// Result computed by an earlier pass (e.g. inside the agent container).
pub const PRIOR_RESULT_FILE: &str = "evaluation.json";

/// Line-oriented agent transcript.
pub const TRANSCRIPT_FILE: &str = "transcript.log";

/// Structured event log, one JSON object per line.
pub const EVENTS_FILE: &str = "events.jsonl";

/// Externally produced before/after comparison.
pub const BASELINE_FILE: &str = "baseline_comparison.json";

/// Result record written by the grader.
pub const RESULT_FILE: &str = "evaluation_result.json";

/// Markdown report written by the grader.
pub const REPORT_FILE: &str = "report.md";

/// Externally supplied baseline comparison, passed through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BaselineComparison {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_lift: Option<f64>,
}

impl BaselineComparison {
    /// `after - before` when both are known.
    pub fn delta(&self) -> Option<f64> {
        match (self.before_score, self.after_score) {
            (Some(before), Some(after)) => Some(after - before),
            _ => None,
        }
    }
}

/// A previously computed evaluation found in the run directory.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorResult {
    /// The raw `{rubrics, total_score}` object.
    pub evaluation: serde_json::Value,
    pub total_score: f64,
    pub test_results: Vec<TestOutcome>,
    pub lm_evaluation: Option<LmEvaluation>,
}

impl PriorResult {
    /// Interpret a prior result document.
    ///
    /// Accepts either a full result record (`{evaluation: {...}, ...}`) or a
    /// bare `{rubrics, total_score}` object. Returns `None` when no numeric
    /// `total_score` can be found.
    pub fn from_value(doc: serde_json::Value) -> Option<Self> {
        let evaluation = match doc.get("evaluation") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => doc.clone(),
        };
        let total_score = evaluation.get("total_score")?.as_f64()?;

        #[derive(Deserialize)]
        struct Tests {
            #[serde(with = "keyed")]
            test_results: Vec<TestOutcome>,
        }

        let test_results = serde_json::from_value::<Tests>(doc.clone())
            .map(|t| t.test_results)
            .unwrap_or_default();
        let lm_evaluation = doc
            .get("lm_evaluation")
            .and_then(|v| serde_json::from_value::<LmEvaluation>(v.clone()).ok());

        Some(Self {
            evaluation,
            total_score,
            test_results,
            lm_evaluation,
        })
    }
}

/// Read-only inputs describing a finished agent run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub run_id: String,
    /// Unified diff; empty means the agent made no changes.
    pub diff: String,
    pub diff_path: Option<PathBuf>,
    pub prior_result: Option<PriorResult>,
    pub baseline: Option<BaselineComparison>,
}

impl RunArtifacts {
    /// Load artifacts from a run directory. Only a missing directory is fatal.
    pub fn load(run_dir: &Path) -> Result<Self> {
        if !run_dir.is_dir() {
            return Err(EvalError::InvalidRunDir(format!(
                "{} is not a directory",
                run_dir.display()
            )));
        }

        let run_id = run_dir
            .canonicalize()
            .unwrap_or_else(|_| run_dir.to_path_buf())
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "run".to_string());

        let diff_path = DIFF_FILE_CANDIDATES
            .iter()
            .map(|name| run_dir.join(name))
            .find(|p| p.is_file());
        let diff = match &diff_path {
            Some(path) => {
                let bytes = std::fs::read(path)?;
                String::from_utf8_lossy(&bytes).to_string()
            }
            None => {
                debug!(run_id = %run_id, "no diff file found; treating as empty change-set");
                String::new()
            }
        };

        let prior_result = read_json(&run_dir.join(PRIOR_RESULT_FILE)).and_then(|doc| {
            let prior = PriorResult::from_value(doc);
            if prior.is_none() {
                warn!(
                    run_id = %run_id,
                    file = PRIOR_RESULT_FILE,
                    "prior result has no numeric total_score; re-scoring"
                );
            }
            prior
        });

        let baseline = read_json(&run_dir.join(BASELINE_FILE)).and_then(|doc| {
            serde_json::from_value::<BaselineComparison>(doc)
                .map_err(|e| warn!(file = BASELINE_FILE, error = %e, "ignoring malformed baseline comparison"))
                .ok()
        });

        Ok(Self {
            run_dir: run_dir.to_path_buf(),
            run_id,
            diff,
            diff_path,
            prior_result,
            baseline,
        })
    }

    /// Artifacts with an in-memory diff and nothing else.
    pub fn from_diff(run_id: impl Into<String>, diff: impl Into<String>) -> Self {
        Self {
            run_dir: PathBuf::new(),
            run_id: run_id.into(),
            diff: diff.into(),
            diff_path: None,
            prior_result: None,
            baseline: None,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.diff.trim().is_empty()
    }

    pub fn diff_lines(&self) -> usize {
        self.diff.lines().count()
    }

    /// Paths touched by the diff (`+++ b/<path>` headers, deletions excluded).
    pub fn changed_files(&self) -> Vec<String> {
        let mut files: Vec<String> = Vec::new();
        for line in self.diff.lines() {
            if let Some(rest) = line.strip_prefix("+++ ") {
                let path = rest.split('\t').next().unwrap_or(rest).trim();
                if path == "/dev/null" {
                    continue;
                }
                let path = path.strip_prefix("b/").unwrap_or(path).to_string();
                if !files.contains(&path) {
                    files.push(path);
                }
            }
        }
        files
    }
}

/// Read a JSON document, logging and returning `None` on any failure.
fn read_json(path: &Path) -> Option<serde_json::Value> {
    if !path.is_file() {
        return None;
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| warn!(path = %path.display(), error = %e, "failed to read JSON artifact"))
        .ok()?;
    serde_json::from_str(&raw)
        .map_err(|e| warn!(path = %path.display(), error = %e, "failed to parse JSON artifact"))
        .ok()
}
