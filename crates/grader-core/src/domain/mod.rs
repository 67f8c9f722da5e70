//! Domain models for agent-grader.
//!
//! Canonical definitions for the core entities:
//! - `TaskSpec`: rubrics, test scripts, instructions and repository pin
//! - `RunArtifacts`: the agent's diff plus optional prior/baseline records
//! - `EvaluationResult`: the durable, once-per-invocation result record

pub mod artifacts;
pub mod error;
pub mod keyed;
pub mod result;
pub mod task;

// Re-export main types and errors
pub use artifacts::{BaselineComparison, PriorResult, RunArtifacts};
pub use error::{EvalError, Result};
pub use result::{
    AgentMetrics, Evaluation, EvaluationRecord, EvaluationResult, LmEvaluation, LmJudgment,
    PatchStatus, RubricResult, ScoringMethod, TestOutcome, MANUAL_REVIEW_SUGGESTION,
};
pub use task::{EvaluationSpec, RepoPin, Rubric, TaskSpec, TestScript};
