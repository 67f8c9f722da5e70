//! Domain-level error taxonomy for agent-grader.
//!
//! Every variant here is fatal for an evaluation: it means no score could be
//! produced. Recoverable failures (a single test, a single judgment) are
//! converted into degraded values at the point of failure instead.

use std::path::PathBuf;

/// Fatal evaluation errors.
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("invalid task spec: {0}")]
    InvalidTaskSpec(String),

    #[error("failed to read task spec {path:?}: {source}")]
    TaskSpecIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse task spec {path:?}: {reason}")]
    TaskSpecParse { path: PathBuf, reason: String },

    #[error("invalid run directory: {0}")]
    InvalidRunDir(String),

    #[error("workspace materialization failed: {0}")]
    Materialize(String),

    #[error("judging backend unavailable: {0}")]
    JudgeUnavailable(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for agent-grader domain operations.
pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_error_display() {
        let err = EvalError::InvalidTaskSpec("no rubrics".to_string());
        assert!(err.to_string().contains("invalid task spec"));

        let err = EvalError::Materialize("clone failed".to_string());
        assert!(err.to_string().contains("workspace materialization failed"));
        assert!(err.to_string().contains("clone failed"));
    }

    #[test]
    fn test_task_spec_parse_error_names_path() {
        let err = EvalError::TaskSpecParse {
            path: PathBuf::from("tasks/broken.yaml"),
            reason: "expected mapping".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("broken.yaml"));
        assert!(msg.contains("expected mapping"));
    }

    #[test]
    fn test_judge_unavailable_error() {
        let err = EvalError::JudgeUnavailable("no api key configured".to_string());
        assert!(err.to_string().contains("judging backend unavailable"));
    }
}
